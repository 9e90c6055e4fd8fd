//! # sales-api
//!
//! The sales service: an HTTP API on one port, process introspection on
//! another, and a shutdown path that lets in-flight requests finish.
//!
//! ## Layout
//!
//! - [`App`] is the route table. It maps a method and path to a handler,
//!   wraps every handler in the app's [`middleware`], and gives unknown routes
//!   a JSON `404`/`405`.
//! - [`Server`] accepts connections, applies the read/write/idle timeouts and
//!   drains on shutdown.
//! - [`SignalWatcher`] turns `SIGINT`/`SIGTERM`, or a handler asking for it,
//!   into one shutdown request.
//! - [`handlers`] holds the API routes, [`debug`] the introspection routes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sales_api::{Server, ServerConfig, SignalWatcher, handlers};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut watcher = SignalWatcher::install()?;
//!     let app = handlers::api_mux(handlers::ApiMuxConfig {
//!         shutdown: watcher.handle(),
//!         vars: Default::default(),
//!         write_timeout: std::time::Duration::from_secs(10),
//!     })?;
//!
//!     let server = Server::bind("0.0.0.0:3000".parse()?, ServerConfig::default()).await?;
//!     let token = CancellationToken::new();
//!     let serving = tokio::spawn(server.serve(app, token.clone()));
//!
//!     watcher.recv().await;
//!     token.cancel();
//!     serving.await??;
//!     Ok(())
//! }
//! ```

mod app;
mod context;
mod error;
mod handler;
mod request;
mod response;
mod server;
mod signals;

pub mod config;
pub mod debug;
pub mod expvar;
pub mod handlers;
pub mod health;
pub mod logging;
pub mod middleware;

pub use app::App;
pub use context::Context;
pub use error::{Error, ErrorResponse, HandlerError};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerResult};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use server::{Server, ServerConfig, TRACE_ID_HEADER};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalWatcher};
