//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the one place for
//! cross-cutting concerns. A layer takes the next [`BoxedHandler`] and returns
//! a new one that wraps it:
//!
//! ```text
//! Logger → Errors → Metrics → Timeout → Panics → handler
//! ```
//!
//! Layers added to an [`App`](crate::App) first run outermost. The standard
//! stack above is what [`handlers::api_mux`](crate::handlers::api_mux)
//! installs:
//!
//! - [`Logger`]: `request started` / `request completed` lines
//! - [`Errors`]: turns a [`HandlerError`](crate::HandlerError) into the JSON
//!   error envelope
//! - [`Metrics`]: request, error and panic counters
//! - [`Timeout`]: fails a handler that runs past its deadline
//! - [`Panics`]: converts a handler panic into a `HandlerError::Panic`

mod errors;
mod logger;
mod metrics;
mod panics;
mod timeout;

use std::sync::Arc;

use crate::handler::BoxedHandler;

pub use errors::Errors;
pub use logger::Logger;
pub use self::metrics::Metrics;
pub use panics::Panics;
pub use timeout::Timeout;

/// A layer that wraps a handler.
///
/// Any `Fn(BoxedHandler) -> BoxedHandler` closure is also a middleware.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// Applies `layers` around `handler`; `layers[0]` ends up outermost.
pub(crate) fn wrap(layers: &[Arc<dyn Middleware>], handler: BoxedHandler) -> BoxedHandler {
    layers.iter().rev().fold(handler, |next, layer| layer.wrap(next))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::context::Context;
    use crate::error::HandlerError;
    use crate::expvar::Expvar;
    use crate::handler::Handler;
    use crate::request::Request;
    use crate::response::Response;

    fn ctx() -> Context {
        Context::new(([127, 0, 0, 1], 9000).into())
    }

    fn req() -> Request {
        http::Request::builder().uri("/test").body(Bytes::new()).unwrap().into()
    }

    async fn ok(_ctx: Context, _req: Request) -> Result<Response, HandlerError> {
        Ok(Response::text("ok"))
    }

    async fn not_found(_ctx: Context, _req: Request) -> Result<Response, HandlerError> {
        Err(HandlerError::request(StatusCode::NOT_FOUND, "no such user"))
    }

    async fn corrupt(_ctx: Context, _req: Request) -> Result<Response, HandlerError> {
        Err(HandlerError::shutdown("integrity violation"))
    }

    async fn sleepy(_ctx: Context, _req: Request) -> Result<Response, HandlerError> {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        Ok(Response::text("late"))
    }

    async fn boom(_ctx: Context, _req: Request) -> Result<Response, HandlerError> {
        panic!("boom")
    }

    fn recording(trace: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Arc<dyn Middleware> {
        let trace = Arc::clone(trace);
        Arc::new(move |next: BoxedHandler| {
            let trace = Arc::clone(&trace);
            (move |ctx: Context, req: Request| {
                let next = Arc::clone(&next);
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().unwrap().push(name);
                    next.call(ctx, req).await
                }
            })
            .into_boxed_handler()
        })
    }

    #[tokio::test]
    async fn first_layer_runs_outermost() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let layers = vec![recording(&trace, "outer"), recording(&trace, "inner")];

        let handler = wrap(&layers, ok.into_boxed_handler());
        handler.call(ctx(), req()).await.unwrap();

        assert_eq!(*trace.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn errors_layer_writes_the_error_envelope() {
        let layers: Vec<Arc<dyn Middleware>> = vec![Arc::new(Errors)];
        let handler = wrap(&layers, not_found.into_boxed_handler());

        let resp = handler.call(ctx(), req()).await.unwrap();
        assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(resp.body(), br#"{"error":"no such user"}"#);
    }

    #[tokio::test]
    async fn errors_layer_lets_shutdown_through() {
        let layers: Vec<Arc<dyn Middleware>> = vec![Arc::new(Errors)];
        let handler = wrap(&layers, corrupt.into_boxed_handler());

        let err = handler.call(ctx(), req()).await.unwrap_err();
        assert!(err.is_shutdown());
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let layers: Vec<Arc<dyn Middleware>> = vec![Arc::new(Panics)];
        let handler = wrap(&layers, boom.into_boxed_handler());

        match handler.call(ctx(), req()).await {
            Err(HandlerError::Panic(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected a panic error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn metrics_count_requests_errors_and_panics() {
        let vars = Arc::new(Expvar::new());
        let layers: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(Metrics::new(Arc::clone(&vars))), Arc::new(Panics)];

        wrap(&layers, ok.into_boxed_handler()).call(ctx(), req()).await.unwrap();
        wrap(&layers, not_found.into_boxed_handler()).call(ctx(), req()).await.unwrap_err();
        wrap(&layers, boom.into_boxed_handler()).call(ctx(), req()).await.unwrap_err();

        let snap = vars.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.errors, 2);
        assert_eq!(snap.panics, 1);
        assert_eq!(snap.in_flight, 0);
    }

    #[tokio::test]
    async fn timeout_is_counted_and_translated() {
        let vars = Arc::new(Expvar::new());
        let limit = std::time::Duration::from_millis(50);
        let layers: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Logger),
            Arc::new(Errors),
            Arc::new(Metrics::new(Arc::clone(&vars))),
            Arc::new(Timeout::new(limit)),
            Arc::new(Panics),
        ];

        let resp = wrap(&layers, sleepy.into_boxed_handler()).call(ctx(), req()).await.unwrap();
        assert_eq!(resp.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.body(), br#"{"error":"request timed out"}"#);

        let snap = vars.snapshot();
        assert_eq!(snap.requests, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.in_flight, 0);
    }

    #[tokio::test]
    async fn fast_handler_beats_the_deadline() {
        let layers: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(Timeout::new(std::time::Duration::from_secs(1)))];
        let resp = wrap(&layers, ok.into_boxed_handler()).call(ctx(), req()).await.unwrap();
        assert_eq!(resp.body(), b"ok");
    }

    #[tokio::test]
    async fn full_stack_turns_a_panic_into_a_500() {
        let vars = Arc::new(Expvar::new());
        let layers: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Logger),
            Arc::new(Errors),
            Arc::new(Metrics::new(vars)),
            Arc::new(Panics),
        ];

        let resp = wrap(&layers, boom.into_boxed_handler()).call(ctx(), req()).await.unwrap();
        assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.body(), br#"{"error":"Internal Server Error"}"#);
    }
}
