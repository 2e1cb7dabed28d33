use crate::error::{Result, WebackError};
use crate::types::RobotStatus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Inbound `notify_info` for a robot status push
pub const NOTIFY_STATUS_UPDATE: &str = "thing_status_update";
/// Inbound `notify_info` for a map push
pub const NOTIFY_MAP_DATA: &str = "map_data";

const OPT_SEND_TO_DEVICE: &str = "send_to_device";
const OPT_SYNC_THING: &str = "sync_thing";

// ========== WebSocket ==========

/// Outbound WebSocket frame as serialized on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic_name: String,
    pub opt: String,
    pub sub_type: String,
    pub topic_payload: Value,
    pub thing_name: String,
}

/// Messages the session can publish to a robot
///
/// The protocol carries no request id, replies are matched only by arriving
/// on the status stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEnvelope {
    /// Device shadow update carrying the desired state fields
    DeviceCommand {
        thing_name: String,
        sub_type: String,
        state: Map<String, Value>,
    },
    /// Ask the robot to push its status
    StatusPoll { thing_name: String, sub_type: String },
    /// Periodic sync that keeps the link and the status fresh
    KeepAliveSync { thing_name: String, sub_type: String },
}

impl OutboundEnvelope {
    pub fn thing_name(&self) -> &str {
        match self {
            Self::DeviceCommand { thing_name, .. }
            | Self::StatusPoll { thing_name, .. }
            | Self::KeepAliveSync { thing_name, .. } => thing_name,
        }
    }

    /// Build the wire frame, stamping sync requests with the current time
    pub fn to_wire(&self) -> Envelope {
        self.to_wire_at(chrono::Utc::now().timestamp())
    }

    /// Build the wire frame with an explicit unix timestamp
    pub fn to_wire_at(&self, timestamp: i64) -> Envelope {
        match self {
            Self::DeviceCommand {
                thing_name,
                sub_type,
                state,
            } => Envelope {
                topic_name: format!("$aws/things/{thing_name}/shadow/update"),
                opt: OPT_SEND_TO_DEVICE.to_string(),
                sub_type: sub_type.clone(),
                topic_payload: json!({ "state": state }),
                thing_name: thing_name.clone(),
            },
            Self::StatusPoll {
                thing_name,
                sub_type,
            }
            | Self::KeepAliveSync {
                thing_name,
                sub_type,
            } => Envelope {
                topic_name: format!("grit_tech/notify/server_2_device/{thing_name}"),
                opt: OPT_SYNC_THING.to_string(),
                sub_type: sub_type.clone(),
                topic_payload: json!({
                    "notify_info": OPT_SYNC_THING,
                    "cmd_timestamp_s": timestamp,
                }),
                thing_name: thing_name.clone(),
            },
        }
    }
}

/// Inbound WebSocket frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Fresh robot status
    StatusUpdate(RobotStatus),
    /// Compressed map payload
    MapData(String),
    /// Any other `notify_info`, kept for logging
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    notify_info: Option<String>,
    #[serde(default)]
    thing_status: Option<RobotStatus>,
    #[serde(default)]
    map_data: Option<String>,
}

impl InboundFrame {
    /// Parse a text frame
    ///
    /// Fails only when the text is not JSON or a known kind lacks its body.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;

        match raw.notify_info.as_deref() {
            Some(NOTIFY_STATUS_UPDATE) => raw
                .thing_status
                .map(Self::StatusUpdate)
                .ok_or_else(|| WebackError::UnknownMessage("status update without thing_status".into())),
            Some(NOTIFY_MAP_DATA) => raw
                .map_data
                .map(Self::MapData)
                .ok_or_else(|| WebackError::UnknownMessage("map push without map_data".into())),
            Some(other) => Ok(Self::Unknown(other.to_string())),
            None => Ok(Self::Unknown(String::new())),
        }
    }
}

// ========== HTTP ==========

/// Body of a login request
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub payload: LoginPayload,
    pub header: LoginHeader,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginPayload {
    pub opt: &'static str,
    pub pwd: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginHeader {
    pub language: String,
    pub app_name: String,
    pub calling_code: String,
    pub api_version: String,
    pub account: String,
    pub client_id: String,
}

/// Envelope of every HTTP API response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub msg: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub const SUCCESS: &'static str = "success";

    pub fn is_success(&self) -> bool {
        self.msg == Self::SUCCESS
    }

    /// Deserialize the `data` object of a successful response
    pub fn data<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let data = self.data.ok_or_else(|| {
            WebackError::Transport("successful response without data".to_string())
        })?;
        Ok(serde_json::from_value(data)?)
    }
}

/// `data` of a successful login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub jwt_token: String,
    pub region_name: String,
    pub wss_url: String,
    pub api_url: String,
    /// Token lifetime in seconds
    pub expired_time: i64,
}

/// `data` of `user_thing_list_get`
#[derive(Debug, Clone, Deserialize)]
pub struct ThingList {
    #[serde(default)]
    pub thing_list: Vec<crate::types::DeviceDescriptor>,
}

/// `data` of `reuse_map_get`
#[derive(Debug, Clone, Deserialize)]
pub struct ReuseMap {
    pub map_data: String,
}
