//! Termination-signal handling (spec.md §4's interruption handler),
//! grounded on `InterruptionHandler` for which signals to listen on and on
//! `orca::shutdown::ShutdownCoordinator` for how to listen on them from a
//! dedicated tokio runtime rather than blocking the engine's own threads.
//!
//! One divergence from `InterruptionHandler`: this doesn't literally
//! restore the process's original signal dispositions on drop (tokio's
//! signal streams, once installed for a process, stay installed for its
//! lifetime). Instead, dropping the guard stops this crate from reacting
//! to further signals — functionally equivalent for the one thing the
//! engine cares about, which is not double-handling a signal after a run
//! has already finished.

use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use crate::sync::EventFlag;

/// Owns the background thread listening for termination signals. Dropping
/// it stops the listener and joins its thread.
pub struct SignalGuard {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SignalGuard {
    /// Start listening for SIGINT/SIGTERM/SIGQUIT/SIGHUP (SIGINT/Ctrl+C
    /// only on non-Unix targets) and raise `stop_event` the first time one
    /// arrives.
    pub fn install(stop_event: EventFlag) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = thread::Builder::new()
            .name("conflux-signal".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .build()
                    .expect("failed to build the signal-handling runtime");
                runtime.block_on(listen(stop_event, shutdown_rx));
            })
            .expect("failed to spawn the signal-handling thread");

        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn raise_once(stop_event: &EventFlag, name: &str) {
    if !stop_event.is_raised() {
        tracing::warn!(
            target: "conflux::signal",
            signal = name,
            "interruption signal detected, stopping the ETL run"
        );
        stop_event.raise();
    }
}

#[cfg(unix)]
async fn listen(stop_event: EventFlag, mut shutdown_rx: oneshot::Receiver<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    loop {
        tokio::select! {
            _ = sigint.recv() => raise_once(&stop_event, "SIGINT"),
            _ = sigterm.recv() => raise_once(&stop_event, "SIGTERM"),
            _ = sigquit.recv() => raise_once(&stop_event, "SIGQUIT"),
            _ = sighup.recv() => raise_once(&stop_event, "SIGHUP"),
            _ = &mut shutdown_rx => break,
        }
    }
}

#[cfg(not(unix))]
async fn listen(stop_event: EventFlag, mut shutdown_rx: oneshot::Receiver<()>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => raise_once(&stop_event, "Ctrl+C"),
        _ = &mut shutdown_rx => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn guard_installs_and_tears_down_cleanly() {
        let stop_event = EventFlag::new();
        let guard = SignalGuard::install(stop_event.clone());
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(!stop_event.is_raised());
    }
}
