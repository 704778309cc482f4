use crate::{envelope::ConnId, error::HubError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Frames the hub writes to an agent.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ServerMsg {
    AssignId { id: ConnId },
    Command { command: String, params: Value },
}

/// Frames an agent writes to the hub, after `action` dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMsg {
    Register(RegisterPayload),
    Other { action: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    #[serde(default, deserialize_with = "deserialize_conn_id")]
    pub id: Option<ConnId>,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub username: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub job_id: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub game_name: String,
}

pub fn encode_message(msg: &ServerMsg) -> Result<String, HubError> {
    serde_json::to_string(msg)
        .map_err(|err| HubError::InternalInvariantViolation(format!("encode failed: {err}")))
}

pub fn decode_agent_message(data: &[u8], max_message_bytes: usize) -> Result<AgentMsg, HubError> {
    if data.len() > max_message_bytes {
        return Err(HubError::malformed(format!(
            "message exceeds max size: {} > {max_message_bytes}",
            data.len()
        )));
    }
    let value: Value = serde_json::from_slice(data)
        .map_err(|err| HubError::malformed(format!("invalid json: {err}")))?;
    let action = value
        .as_object()
        .ok_or_else(|| HubError::malformed("expected a json object"))?
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| HubError::malformed("missing action"))?
        .to_string();

    if action != "register" {
        return Ok(AgentMsg::Other { action });
    }

    let payload: RegisterPayload = serde_json::from_value(value)
        .map_err(|err| HubError::malformed(format!("invalid register payload: {err}")))?;
    if payload.user_id.trim().is_empty() || payload.username.trim().is_empty() {
        return Err(HubError::malformed("register missing userId or username"));
    }
    Ok(AgentMsg::Register(payload))
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

/// Text field where an explicit `null` means empty.
fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_conn_id<'de, D>(deserializer: D) -> Result<Option<ConnId>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<ConnId>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("invalid connection id")),
        _ => Err(serde::de::Error::custom(
            "expected string or number for connection id",
        )),
    }
}
