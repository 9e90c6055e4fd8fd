//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The app needs to hold handlers of *different* types in one route table, so
//! every handler is erased behind [`ErasedHandler`] and shared as a
//! [`BoxedHandler`]:
//!
//! ```text
//! async fn hack(ctx: Context, req: Request) -> HandlerResult { … }   ← user writes this
//!        ↓ app.handle(Method::GET, "/hack", hack)
//! hack.into_boxed_handler()                                         ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hack))                                         ← BoxedHandler
//!        ↓ middleware::wrap(..)                                     ← BoxedHandler → BoxedHandler
//! envelope(ctx, req)  at request time                               ← one vtable dispatch per layer
//! ```
//!
//! Middleware consumes and produces `BoxedHandler`s, so a chain of layers is
//! just nested erased handlers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::HandlerError;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// What every erased handler resolves to.
pub type HandlerResult = Result<Response, HandlerError>;

/// A heap-allocated, type-erased future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Dispatch interface shared by handlers and middleware layers.
pub trait ErasedHandler {
    fn call(&self, ctx: Context, req: Request) -> BoxFuture<HandlerResult>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure with the shape:
///
/// ```text
/// Fn(Context, Request) -> impl Future<Output = Result<impl IntoResponse, HandlerError>>
/// ```
///
/// State a handler needs (build string, shared counters) is captured when the
/// closure is built, not looked up at request time.
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, ctx: Context, req: Request) -> BoxFuture<HandlerResult> {
        let fut = (self.0)(ctx, req);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}
