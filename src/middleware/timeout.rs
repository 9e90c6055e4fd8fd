//! Handler deadline.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::context::Context;
use crate::error::HandlerError;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

use super::Middleware;

/// Fails a request with [`HandlerError::Timeout`] when the handler has not
/// produced a response within `limit`. The handler future is dropped.
///
/// Sits inside [`Metrics`](super::Metrics) and [`Errors`](super::Errors) so
/// a timeout is counted and logged like any other failure.
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
    limit: Duration,
}

impl Timeout {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

impl Middleware for Timeout {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let limit = self.limit;
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            async move {
                let trace_id = ctx.trace_id();
                match tokio::time::timeout(limit, next.call(ctx, req)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(%trace_id, timeout = ?limit, "handler timed out");
                        Err(HandlerError::Timeout(limit))
                    }
                }
            }
        })
        .into_boxed_handler()
    }
}
