//! Node naming and id assignment (spec.md §4.2), grounded on
//! `assign_names_and_ids_to_nodes`.
//!
//! Names are derived from the CamelCase behavior type name without the
//! `regex` crate: a hand-rolled tokenizer splits on case boundaries the
//! same way the reference implementation's `NODE_NAME_REGEX` does, then
//! joins the pieces with underscores and lowercases them. A user-supplied
//! name (`Node::with_name`) is always left untouched.

use std::collections::HashMap;

use crate::item::Item;

use super::node::Node;

/// Split a CamelCase/PascalCase identifier into lowercase words, e.g.
/// `HTTPResponseParser` -> `["http", "response", "parser"]`.
fn tokenize(type_name: &str) -> Vec<String> {
    let chars: Vec<char> = type_name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next = chars.get(i + 1);
            // Boundary before an uppercase letter that follows a lowercase
            // letter ("fooBar" -> "foo", "Bar"), or that starts a new word
            // within a run of capitals ("HTTPResponse" -> "HTTP", "Response").
            let boundary = prev.is_lowercase() || prev.is_numeric()
                || next.map(|n| n.is_lowercase()).unwrap_or(false);
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }

        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Derive the default node name (`"http_response_parser"`) from a behavior
/// type name (`"HTTPResponseParser"`).
pub fn derive_name(type_name: &str) -> String {
    tokenize(type_name).join("_")
}

/// Assign ids (`"node_1"`, `"node_2"`, ...) and, to any node without a
/// user-supplied name, a default name derived from its type. When more than
/// one unnamed node shares a derived name, every one of them gets a
/// 1-based, discovery-order suffix (`"simple_extractor_1"`,
/// `"simple_extractor_2"`) — mirroring
/// `assign_names_and_ids_to_nodes`'s two-pass counting (first pass tallies
/// how many unnamed nodes derive each name, second pass only suffixes the
/// ones whose tally is greater than one).
///
/// `nodes` must already be in a stable, deterministic order (discovery
/// order); this function only assigns, it doesn't traverse.
pub fn assign_names_and_ids<I: Item>(nodes: &[Node<I>]) {
    for (index, node) in nodes.iter().enumerate() {
        node.assign_id(format!("node_{}", index + 1));
    }

    let mut totals: HashMap<String, usize> = HashMap::new();
    for node in nodes {
        if node.name().is_none() {
            *totals.entry(derive_name(node.type_name())).or_insert(0) += 1;
        }
    }

    let mut running: HashMap<String, usize> = HashMap::new();
    for node in nodes {
        if node.name().is_some() {
            continue;
        }
        let default_name = derive_name(node.type_name());
        let count = running.entry(default_name.clone()).or_insert(0);
        *count += 1;

        let name = if totals[&default_name] == 1 {
            default_name
        } else {
            format!("{default_name}_{count}")
        };
        node.assign_name_if_absent(name);
    }
}
