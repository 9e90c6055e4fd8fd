//! Request counters.

use std::sync::Arc;

use ::metrics::{counter, histogram};

use crate::context::Context;
use crate::error::HandlerError;
use crate::expvar::Expvar;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

use super::Middleware;

/// Counts requests, failures and panics.
///
/// Updates the process [`Expvar`] served on `/debug/vars` and emits the
/// `sales_*` series through the `metrics` facade (a no-op when no recorder is
/// installed). Sits inside [`Errors`](super::Errors) so it still sees the
/// raw failure.
#[derive(Clone, Debug)]
pub struct Metrics {
    vars: Arc<Expvar>,
}

impl Metrics {
    pub fn new(vars: Arc<Expvar>) -> Self {
        Self { vars }
    }
}

impl Middleware for Metrics {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let vars = Arc::clone(&self.vars);
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            let vars = Arc::clone(&vars);
            async move {
                let _in_flight = vars.enter();
                vars.add_request();

                let started = ctx.started();
                let method = req.method().to_string();
                let result = next.call(ctx, req).await;

                let status = match &result {
                    Ok(resp) => resp.status_code(),
                    Err(err) => {
                        vars.add_error();
                        counter!("sales_errors_total").increment(1);
                        if matches!(err, HandlerError::Panic(_)) {
                            vars.add_panic();
                            counter!("sales_panics_total").increment(1);
                        }
                        err.status()
                    }
                };

                counter!("sales_requests_total", "method" => method, "status" => status.as_str().to_owned())
                    .increment(1);
                histogram!("sales_request_duration_seconds").record(started.elapsed().as_secs_f64());

                result
            }
        })
        .into_boxed_handler()
    }
}
