//! HTTP interface to the coordinator
//!
//! A thin layer over [`Coordinator`]: each route maps onto one dispatcher,
//! sampler or registry call and serializes whatever it returns.

mod handlers;
mod models;

pub use models::{CommandRequest, CommandSpec, ConnectRequest, TargetsQuery, TargetsRequest};

use crate::coordinator::Coordinator;
use std::convert::Infallible;
use std::sync::Arc;
use swarm_shared::Command;
use warp::{Filter, Reply};

/// All routes, with rejections rendered as JSON
pub fn routes(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let state = warp::any().map(move || coordinator.clone());

    let health = warp::path!("health")
        .and(warp::get())
        .and_then(handlers::health);

    let connect = warp::path!("connect")
        .and(warp::post())
        .and(warp::body::json())
        .and(state.clone())
        .and_then(handlers::connect);

    let command = warp::path!("command")
        .and(warp::post())
        .and(warp::body::json())
        .and(state.clone())
        .and_then(handlers::command);

    let takeoff = warp::path!("takeoff")
        .and(warp::get())
        .map(|| Command::Takeoff)
        .and(state.clone())
        .and_then(handlers::broadcast);

    let land = warp::path!("land")
        .and(warp::get())
        .map(|| Command::Land)
        .and(state.clone())
        .and_then(handlers::broadcast);

    let telemetry = warp::path!("telemetry")
        .and(warp::get())
        .and(warp::query::<TargetsQuery>())
        .and(state.clone())
        .and_then(handlers::telemetry);

    let battery = warp::path!("get_battery")
        .and(warp::get())
        .and(state.clone())
        .and_then(handlers::battery);

    let disconnect_some = warp::path!("disconnect")
        .and(warp::post())
        .and(warp::body::json())
        .and(state.clone())
        .and_then(handlers::disconnect);

    let disconnect_all = warp::path!("disconnect")
        .and(warp::get())
        .map(TargetsRequest::default)
        .and(state.clone())
        .and_then(handlers::disconnect);

    let scan = warp::path!("scan")
        .and(warp::get())
        .and(state.clone())
        .and_then(handlers::scan);

    // The browser dashboard is served from another origin
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    let swarm = warp::path!("swarm")
        .and(warp::get())
        .and(state)
        .and_then(handlers::swarm);

    health
        .or(connect)
        .or(command)
        .or(takeoff)
        .or(land)
        .or(telemetry)
        .or(battery)
        .or(disconnect_some)
        .or(disconnect_all)
        .or(scan)
        .or(swarm)
        .with(cors)
        .with(warp::trace::request())
        .recover(handlers::handle_rejection)
}
