use serde::Serialize;

use crate::{Context, HandlerError, Request, Response};

#[derive(Debug, Serialize)]
struct Status {
    #[serde(rename = "Status")]
    status: &'static str,
}

/// `GET /hack`: answers `{"Status":"HACK"}`.
pub async fn hack(_ctx: Context, _req: Request) -> Result<Response, HandlerError> {
    Response::json(&Status { status: "HACK" })
}
