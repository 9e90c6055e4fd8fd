//! Panic recovery.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::error;

use crate::context::Context;
use crate::error::HandlerError;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

use super::Middleware;

/// Catches a panic raised while running the handler and reports it as
/// [`HandlerError::Panic`]. Without it the panic would only take down the
/// connection task and the client would see a reset.
#[derive(Clone, Copy, Debug, Default)]
pub struct Panics;

impl Middleware for Panics {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            async move {
                let trace_id = ctx.trace_id();

                // The call itself goes inside the guarded future so a handler
                // that panics before its first await is caught too.
                match AssertUnwindSafe(async move { next.call(ctx, req).await }).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(%trace_id, panic = %message, "handler panicked");
                        Err(HandlerError::Panic(message))
                    }
                }
            }
        })
        .into_boxed_handler()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
