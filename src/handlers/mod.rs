//! API routes.

mod hack;

use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::expvar::Expvar;
use crate::middleware::{Errors, Logger, Metrics, Panics, Timeout};
use crate::signals::ShutdownHandle;
use crate::{App, Error};

pub use hack::hack;

/// What the API routes need from the process.
#[derive(Clone)]
pub struct ApiMuxConfig {
    pub shutdown: ShutdownHandle,
    pub vars: Arc<Expvar>,
    /// How long a handler may take to respond.
    pub write_timeout: Duration,
}

/// Builds the API route table with the full middleware stack.
pub fn api_mux(cfg: ApiMuxConfig) -> Result<App, Error> {
    let mut app = App::new(cfg.shutdown)
        .layer(Logger)
        .layer(Errors)
        .layer(Metrics::new(cfg.vars))
        .layer(Timeout::new(cfg.write_timeout))
        .layer(Panics);

    app.handle(Method::GET, "/hack", hack)?;

    Ok(app)
}
