//! Request start/complete logging.

use std::sync::Arc;

use tracing::info;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

use super::Middleware;

/// Logs one line when a request starts and one when it completes.
///
/// Runs outermost so the completed line reports the status the client will
/// actually see.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logger;

impl Middleware for Logger {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            async move {
                let trace_id = ctx.trace_id();
                let started = ctx.started();
                let method = req.method().clone();
                let path = match req.uri().query() {
                    Some(query) => format!("{}?{query}", req.path()),
                    None => req.path().to_owned(),
                };

                info!(%trace_id, %method, %path, remote_addr = %ctx.remote_addr(), "request started");

                let result = next.call(ctx, req).await;

                let status = match &result {
                    Ok(resp) => resp.status_code(),
                    Err(err) => err.status(),
                };
                info!(
                    %trace_id,
                    %method,
                    %path,
                    status = status.as_u16(),
                    since = ?started.elapsed(),
                    "request completed"
                );

                result
            }
        })
        .into_boxed_handler()
    }
}
