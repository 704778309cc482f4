use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use script_hub_core::{AgentSummary, CommandOutcome, Target};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCommandRequest {
    #[serde(default)]
    pub client_id: Option<Value>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    Json(state.hub.list_connections().await)
}

pub async fn send_command(
    State(state): State<AppState>,
    body: Result<Json<SendCommandRequest>, JsonRejection>,
) -> (StatusCode, Json<CommandOutcome>) {
    let Json(request) = match body {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "command_rejected", error = %err);
            return bad_request("Invalid request body");
        }
    };

    let (client_id, command) = match (request.client_id, request.command) {
        (Some(client_id), Some(command)) if !client_id.is_null() && !command.is_empty() => {
            (client_id, command)
        }
        _ => return bad_request("Missing required fields"),
    };
    let target = match serde_json::from_value::<Target>(client_id) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "command_rejected", error = %err);
            return bad_request("Invalid client id");
        }
    };
    let params = match request.params {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value @ Value::Object(_)) => value,
        Some(_) => return bad_request("params must be an object"),
    };

    let outcome = state.hub.send_command(target, &command, &params).await;
    info!(
        event = "operator_command",
        target = %target,
        command = %command,
        success = outcome.success
    );
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(outcome))
}

fn bad_request(error: &str) -> (StatusCode, Json<CommandOutcome>) {
    (StatusCode::BAD_REQUEST, Json(CommandOutcome::failed(error)))
}
