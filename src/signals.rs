//! Shutdown signal delivery.
//!
//! The main task parks on [`SignalWatcher::recv`] once setup is done. Signals
//! reach it through a channel with capacity 1. The producers are the OS
//! forwarder installed by [`SignalWatcher::install`] and any
//! [`ShutdownHandle`] held by the app. They only ever `try_send`, so a signal
//! arriving while one is already queued is dropped instead of blocking.
//!
//! On Unix the watcher listens for **SIGINT** (Ctrl-C) and **SIGTERM** (sent by
//! `kill` and by Kubernetes when a pod is terminated). On other platforms only
//! Ctrl-C is available.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Why the process is being asked to stop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// A handler reported a failure the process cannot recover from.
    Requested,
}

impl ShutdownSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Requested => "requested",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sending half of the shutdown channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<ShutdownSignal>,
}

impl ShutdownHandle {
    /// Queues `signal` for the main task. Never blocks.
    ///
    /// Returns `false` when a signal is already pending or the watcher is gone.
    pub fn signal(&self, signal: ShutdownSignal) -> bool {
        self.tx.try_send(signal).is_ok()
    }
}

/// Receiving half of the shutdown channel, plus the OS forwarder task.
#[derive(Debug)]
pub struct SignalWatcher {
    tx: mpsc::Sender<ShutdownSignal>,
    rx: mpsc::Receiver<ShutdownSignal>,
    forwarder: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    /// A watcher with no OS hooks; only [`ShutdownHandle`]s can trigger it.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx, forwarder: None }
    }

    /// Registers SIGINT and SIGTERM and starts forwarding them.
    ///
    /// Registration happens before this returns, so a signal delivered right
    /// after is not lost. Must be called from within a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        let mut watcher = Self::new();
        let mut os = OsSignals::register()?;
        let tx = watcher.tx.clone();

        watcher.forwarder = Some(tokio::spawn(async move {
            loop {
                let signal = os.next().await;
                if tx.try_send(signal).is_err() {
                    debug!(%signal, "shutdown already pending, signal dropped");
                }
            }
        }));

        Ok(watcher)
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.tx.clone() }
    }

    /// Waits for the next shutdown signal.
    pub async fn recv(&mut self) -> ShutdownSignal {
        match self.rx.recv().await {
            Some(signal) => signal,
            // The watcher keeps its own sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    /// Waits for the next signal from outside the process.
    ///
    /// `Requested` signals are consumed and skipped: once shutdown is under
    /// way, more handlers asking for it must not cut the drain short.
    pub async fn recv_external(&mut self) -> ShutdownSignal {
        loop {
            match self.recv().await {
                ShutdownSignal::Requested => debug!("shutdown already in progress, request ignored"),
                signal => return signal,
            }
        }
    }
}

impl Default for SignalWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

// ── OS hooks ──────────────────────────────────────────────────────────────────

#[cfg(unix)]
struct OsSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn next(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
        }
    }
}

#[cfg(not(unix))]
struct OsSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl OsSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self { ctrl_c: tokio::signal::windows::ctrl_c()? })
    }

    async fn next(&mut self) -> ShutdownSignal {
        self.ctrl_c.recv().await;
        ShutdownSignal::Interrupt
    }
}
