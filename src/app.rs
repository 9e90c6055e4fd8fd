//! The application: route table, middleware and the request envelope.
//!
//! One radix tree per HTTP method (via [`matchit`]), O(path-length) lookup.
//! Every handler is wrapped twice before it lands in a tree:
//!
//! 1. in the app's middleware chain (logging, error translation, ...);
//! 2. in the *envelope*, which is the native `(Context, Request) -> Response`
//!    shape the tree stores. A failure that gets through the middleware is
//!    translated here, so no failure is ever dropped without a response.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{ALLOW, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::error;

use crate::context::Context;
use crate::error::{Error, ErrorResponse};
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::{self, Middleware};
use crate::request::Request;
use crate::response::Response;
use crate::signals::{ShutdownHandle, ShutdownSignal};

/// The multiplexer-facing handler shape.
type Endpoint = Arc<dyn Fn(Context, Request) -> BoxFuture<Response> + Send + Sync>;

/// Result of looking a request up in the route table.
enum Route {
    Found(Endpoint, HashMap<String, String>),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// The application: the entry point every request is dispatched through.
///
/// Build it once at startup, register routes, then hand it to
/// [`Server::serve`](crate::Server::serve).
///
/// ```rust
/// use http::Method;
/// use sales_api::{App, Context, HandlerError, Request, Response, SignalWatcher};
///
/// async fn get_user(_ctx: Context, req: Request) -> Result<Response, HandlerError> {
///     Response::json(&serde_json::json!({ "id": req.param("id") }))
/// }
///
/// # fn main() -> Result<(), sales_api::Error> {
/// let watcher = SignalWatcher::new();
/// let mut app = App::new(watcher.handle());
/// app.handle(Method::GET, "/users/{id}", get_user)?;
///
/// // The same pair twice is a startup error, not a silent overwrite.
/// assert!(app.handle(Method::GET, "/users/{id}", get_user).is_err());
/// # Ok(()) }
/// ```
pub struct App {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
    middleware: Vec<Arc<dyn Middleware>>,
    shutdown: ShutdownHandle,
}

impl App {
    pub fn new(shutdown: ShutdownHandle) -> Self {
        Self { routes: HashMap::new(), middleware: Vec::new(), shutdown }
    }

    /// Adds an app-wide middleware layer. Returns `self` for chaining.
    ///
    /// The first layer added runs outermost. Layers only wrap routes
    /// registered after they are added, so add them before any `handle` call.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Asks the process to shut down gracefully.
    pub fn signal_shutdown(&self) {
        self.shutdown.signal(ShutdownSignal::Requested);
    }

    /// Registers `handler` for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    /// Registering the same pair twice, or a pattern that conflicts with an
    /// existing one, fails with [`Error::Route`].
    pub fn handle(&mut self, method: Method, path: &str, handler: impl Handler) -> Result<(), Error> {
        let handler = middleware::wrap(&self.middleware, handler.into_boxed_handler());
        let endpoint = envelope(handler, self.shutdown.clone());

        self.routes
            .entry(method.clone())
            .or_default()
            .insert(path, endpoint)
            .map_err(|source| Error::Route { method, path: path.to_owned(), source })
    }

    /// Dispatches one request through the route table.
    ///
    /// Unknown paths get `404`; a known path with the wrong method gets `405`
    /// and an `allow` header. Both carry the JSON error envelope.
    pub async fn call(&self, ctx: Context, mut req: Request) -> Response {
        match self.lookup(req.method(), req.path()) {
            Route::Found(endpoint, params) => {
                req.set_params(params);
                endpoint(ctx, req).await
            }
            Route::MethodNotAllowed(allowed) => {
                let mut resp = not_routed(StatusCode::METHOD_NOT_ALLOWED);
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    resp.headers_mut().insert(ALLOW, value);
                }
                resp
            }
            Route::NotFound => not_routed(StatusCode::NOT_FOUND),
        }
    }

    fn lookup(&self, method: &Method, path: &str) -> Route {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Route::Found(Arc::clone(matched.value), params);
        }

        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();

        if allowed.is_empty() {
            Route::NotFound
        } else {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            Route::MethodNotAllowed(allowed)
        }
    }
}

/// Bridges a middleware-wrapped handler to the tree's native shape.
fn envelope(handler: BoxedHandler, shutdown: ShutdownHandle) -> Endpoint {
    Arc::new(move |ctx: Context, req: Request| {
        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        Box::pin(async move {
            let trace_id = ctx.trace_id();
            match handler.call(ctx, req).await {
                Ok(resp) => resp,
                Err(err) => {
                    if err.is_shutdown() {
                        error!(%trace_id, error = %err, "handler requested shutdown");
                        shutdown.signal(ShutdownSignal::Requested);
                    } else {
                        error!(%trace_id, status = err.status().as_u16(), error = %err, "unhandled handler error");
                    }
                    err.to_response()
                }
            }
        }) as BoxFuture<Response>
    })
}

fn not_routed(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    ErrorResponse::new(reason).into_response_with(status)
}
