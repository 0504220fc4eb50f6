//! warp filters for the control API
//!
//! - `GET /config` (also `/api`, `/api/config`): the persisted run config
//! - `POST /config` (also `/api`): persist a run config and queue a run
//! - `GET /metrics`: run metrics snapshot

use super::dispatcher::{RunDispatcher, RunRequest};
use crate::config::{ConfigStore, RunConfig};
use crate::error::sanitize_error_message;
use crate::observability::PublisherMetrics;
use serde::Serialize;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Acknowledgement text returned once a run is queued
pub const RUN_ACCEPTED_MESSAGE: &str = "Config updated and message sent in a new task.";

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Everything the handlers need
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<ConfigStore>,
    pub dispatcher: Arc<RunDispatcher>,
    pub metrics: Arc<PublisherMetrics>,
    pub data_path: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedResponse {
    status: &'static str,
    run_id: Uuid,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn with_state(state: ApiState) -> impl Filter<Extract = (ApiState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn config_path() -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::path!("config")
        .or(warp::path!("api"))
        .unify()
        .or(warp::path!("api" / "config"))
        .unify()
}

/// All control API routes
pub fn routes(state: ApiState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let read_config = config_path()
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_read_config);

    let update_config = config_path()
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(handle_update_config);

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handle_metrics);

    read_config.or(update_config).or(metrics)
}

async fn handle_read_config(state: ApiState) -> Result<Response, Infallible> {
    match state.store.load().await {
        Ok(config) => Ok(warp::reply::json(&config).into_response()),
        Err(e) => {
            let detail = sanitize_error_message(&e.to_string());
            error!("Error reading config file: {}", detail);
            Ok(warp::reply::with_status(
                format!("Error reading config file: {detail}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response())
        }
    }
}

async fn handle_update_config(config: RunConfig, state: ApiState) -> Result<Response, Infallible> {
    let saved = match state.store.replace(&config).await {
        Ok(saved) => saved,
        Err(e) => {
            let detail = sanitize_error_message(&e.to_string());
            error!("Error saving config file: {}", detail);
            return Ok(error_reply(
                format!("Error saving config file: {detail}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
    };

    match state
        .dispatcher
        .submit(RunRequest::new(saved, state.data_path.clone()))
    {
        Ok(run_id) => {
            info!(run_id = %run_id, "Config updated, run queued");
            Ok(warp::reply::with_status(
                warp::reply::json(&AcceptedResponse {
                    status: "accepted",
                    run_id,
                    message: RUN_ACCEPTED_MESSAGE,
                }),
                StatusCode::ACCEPTED,
            )
            .into_response())
        }
        Err(e) => Ok(error_reply(
            format!("Config saved but the run was not queued: {e}"),
            StatusCode::SERVICE_UNAVAILABLE,
        )),
    }
}

async fn handle_metrics(state: ApiState) -> Result<Response, Infallible> {
    Ok(warp::reply::json(&state.metrics.snapshot()).into_response())
}

fn error_reply(error: String, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(&ErrorResponse { error }), status).into_response()
}
