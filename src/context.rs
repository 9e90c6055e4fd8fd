//! Per-request values handed to every handler.

use std::net::SocketAddr;
use std::time::Instant;

use uuid::Uuid;

/// Values that live for the duration of one request.
///
/// Created by the server before routing. Middleware and handlers receive it by
/// value; it is cheap to clone.
#[derive(Clone, Debug)]
pub struct Context {
    trace_id: Uuid,
    started: Instant,
    remote_addr: SocketAddr,
}

impl Context {
    /// A fresh context with a new trace id, started now.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self { trace_id: Uuid::new_v4(), started: Instant::now(), remote_addr }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}
