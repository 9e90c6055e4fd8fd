//! Liveness and readiness probes, served on the debug listener.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/debug/liveness` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/debug/readiness` | Can it serve traffic? Failure → pulled from the load balancer. |
//!
//! Both handlers are built with the build string baked in, so an operator
//! can tell which version answered.

use std::sync::Arc;

use serde::Serialize;

use crate::{Context, Handler, Request, Response};

#[derive(Debug, Serialize)]
struct Probe<'a> {
    status: &'static str,
    build: &'a str,
}

/// Liveness probe handler.
///
/// Always returns `200 OK` with `{"status":"up","build":...}`. If the process
/// can answer HTTP at all, it is alive.
pub fn liveness(build: Arc<str>) -> impl Handler {
    move |_ctx: Context, _req: Request| {
        let build = Arc::clone(&build);
        async move { Response::json(&Probe { status: "up", build: &build }) }
    }
}

/// Readiness probe handler.
///
/// Returns `200 OK` with `{"status":"ok","build":...}`. The service has no
/// downstream dependencies to gate on yet.
pub fn readiness(build: Arc<str>) -> impl Handler {
    move |_ctx: Context, _req: Request| {
        let build = Arc::clone(&build);
        async move { Response::json(&Probe { status: "ok", build: &build }) }
    }
}
