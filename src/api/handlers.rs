//! Route handlers
//!
//! Handlers never reject: structural errors become `400 {"detail": ...}`.

use super::models::{
    CommandRequest, ConnectRequest, ErrorResponse, ScanResponse, TargetsQuery, TargetsRequest,
};
use crate::coordinator::Coordinator;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use swarm_shared::{Command, DispatchError, Outcome};
use tracing::{error, warn};
use warp::http::StatusCode;
use warp::reply::{self, Json, WithStatus};
use warp::{Rejection, Reply};

type Response = WithStatus<Json>;

fn ok<T: Serialize>(body: &T) -> Response {
    reply::with_status(reply::json(body), StatusCode::OK)
}

fn detail(status: StatusCode, detail: impl Into<String>) -> Response {
    reply::with_status(
        reply::json(&ErrorResponse {
            detail: detail.into(),
        }),
        status,
    )
}

fn respond<T: Serialize>(result: Result<T, DispatchError>) -> Result<Response, Infallible> {
    Ok(match result {
        Ok(body) => ok(&body),
        Err(e) => {
            warn!("Request refused: {}", e);
            detail(StatusCode::BAD_REQUEST, e.to_string())
        }
    })
}

pub async fn health() -> Result<Response, Infallible> {
    Ok(ok(&serde_json::json!({ "status": "healthy" })))
}

pub async fn connect(
    request: ConnectRequest,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    respond(coordinator.dispatcher().connect(request.ips).await)
}

pub async fn command(
    request: CommandRequest,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    let command = match request.command.resolve() {
        Ok(command) => command,
        Err(e) => return respond::<()>(Err(e)),
    };
    respond(coordinator.dispatcher().execute(command, request.targets).await)
}

/// Fixed command to every registered session
pub async fn broadcast(
    command: Command,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    respond(coordinator.dispatcher().execute(command, None).await)
}

pub async fn telemetry(
    query: TargetsQuery,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    respond(coordinator.sampler().sample(query.into_targets()).await)
}

/// Battery percentage of every device that answered
pub async fn battery(coordinator: Arc<Coordinator>) -> Result<Response, Infallible> {
    let result = coordinator.sampler().sample(None).await.map(|result| {
        result
            .into_iter()
            .filter_map(|(address, outcome)| match outcome {
                Outcome::Success(t) => Some((address, t.battery_percent)),
                _ => None,
            })
            .collect::<BTreeMap<_, _>>()
    });
    respond(result)
}

pub async fn disconnect(
    request: TargetsRequest,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    respond(coordinator.dispatcher().disconnect(request.targets).await)
}

pub async fn scan(coordinator: Arc<Coordinator>) -> Result<Response, Infallible> {
    Ok(match coordinator.scan().await {
        Ok(devices) => ok(&ScanResponse { devices }),
        Err(e) => {
            error!("Scan failed: {:#}", e);
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Scan failed: {}", e))
        }
    })
}

pub async fn swarm(coordinator: Arc<Coordinator>) -> Result<Response, Infallible> {
    let mut sessions = coordinator.registry().describe().await;
    sessions.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(ok(&sessions))
}

/// Turn filter rejections (bad bodies, unknown paths) into JSON errors
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let response = if err.is_not_found() {
        detail(StatusCode::NOT_FOUND, "Not found")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        detail(StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        detail(StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::cors::CorsForbidden>() {
        detail(StatusCode::FORBIDDEN, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        detail(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!("Unhandled rejection: {:?}", err);
        detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    };
    Ok(response)
}
