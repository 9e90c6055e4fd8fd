//! Handler failure → HTTP error response.

use std::sync::Arc;

use tracing::{error, warn};

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

use super::Middleware;

/// Translates a [`HandlerError`](crate::HandlerError) into its JSON error
/// envelope and logs it with the request's trace id.
///
/// Shutdown failures are returned untouched so the app envelope can stop the
/// process.
#[derive(Clone, Copy, Debug, Default)]
pub struct Errors;

impl Middleware for Errors {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            async move {
                let trace_id = ctx.trace_id();

                match next.call(ctx, req).await {
                    Err(err) if err.is_shutdown() => Err(err),
                    Err(err) => {
                        let status = err.status();
                        if status.is_server_error() {
                            error!(%trace_id, status = status.as_u16(), error = %err, "request failed");
                        } else {
                            warn!(%trace_id, status = status.as_u16(), error = %err, "request rejected");
                        }
                        Ok(err.to_response())
                    }
                    ok => ok,
                }
            }
        })
        .into_boxed_handler()
    }
}
