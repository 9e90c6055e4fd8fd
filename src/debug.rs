//! Debug listener: process introspection on a separate port.
//!
//! The listener is best-effort. It runs on its own task, and if it cannot bind
//! or stops serving it logs why and ends. That failure never reaches the API
//! server or the shutdown path.
//!
//! | Path | Body |
//! |---|---|
//! | `/debug/vars` | build, uptime, request/error/panic counters, runtime workers |
//! | `/debug/metrics` | Prometheus text exposition |
//! | `/debug/liveness` | `{"status":"up","build":...}` |
//! | `/debug/readiness` | `{"status":"ok","build":...}` |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderValue;
use http::{Method, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::expvar::{Expvar, Vars};
use crate::middleware::{Errors, Panics, Timeout};
use crate::server::{Server, ServerConfig};
use crate::signals::ShutdownHandle;
use crate::{App, Context, Error, HandlerError, Request, Response, health};

/// Everything the debug routes read.
#[derive(Clone)]
pub struct DebugMuxConfig {
    pub build: Arc<str>,
    pub shutdown: ShutdownHandle,
    pub vars: Arc<Expvar>,
    /// `None` when no Prometheus recorder could be installed.
    pub prometheus: Option<PrometheusHandle>,
    pub write_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ProcessVars<'a> {
    build: &'a str,
    #[serde(flatten)]
    vars: Vars,
    runtime_workers: usize,
}

/// Builds the debug route table.
pub fn mux(cfg: DebugMuxConfig) -> Result<App, Error> {
    let mut app = App::new(cfg.shutdown)
        .layer(Errors)
        .layer(Timeout::new(cfg.write_timeout))
        .layer(Panics);

    let build = Arc::clone(&cfg.build);
    let vars = Arc::clone(&cfg.vars);
    app.handle(Method::GET, "/debug/vars", move |_ctx: Context, _req: Request| {
        let build = Arc::clone(&build);
        let vars = Arc::clone(&vars);
        async move {
            let workers = tokio::runtime::Handle::try_current()
                .map(|rt| rt.metrics().num_workers())
                .unwrap_or(0);
            Response::json(&ProcessVars { build: &build, vars: vars.snapshot(), runtime_workers: workers })
        }
    })?;

    let prometheus = cfg.prometheus;
    app.handle(Method::GET, "/debug/metrics", move |_ctx: Context, _req: Request| {
        let rendered = prometheus.as_ref().map(PrometheusHandle::render);
        async move {
            let Some(body) = rendered else {
                return Err(HandlerError::request(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "metrics recorder not installed",
                ));
            };
            Ok(Response::builder()
                .bytes(HeaderValue::from_static("text/plain; version=0.0.4"), body))
        }
    })?;

    app.handle(Method::GET, "/debug/liveness", health::liveness(Arc::clone(&cfg.build)))?;
    app.handle(Method::GET, "/debug/readiness", health::readiness(cfg.build))?;

    Ok(app)
}

/// Starts the debug listener on its own task.
///
/// Bind and serve failures are logged and end the task; they are never
/// returned. Cancel `shutdown` and await the handle to stop it.
pub fn spawn(
    addr: SocketAddr,
    app: App,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(status = "debug router started", host = %addr, "startup");

        let server = match Server::bind(addr, config).await {
            Ok(server) => server,
            Err(e) => {
                error!(status = "debug router closed", host = %addr, error = %e, "shutdown");
                return;
            }
        };

        if let Err(e) = server.serve(app, shutdown).await {
            error!(status = "debug router closed", host = %addr, error = %e, "shutdown");
        }
    })
}
