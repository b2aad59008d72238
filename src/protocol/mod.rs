use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `mediaMessageId` of a direct-mode message carrying codec configuration
pub const MEDIA_MESSAGE_CODEC_CONFIG: u64 = 36;
/// `mediaMessageId` of a direct-mode message carrying frame data
pub const MEDIA_MESSAGE_DATA: u64 = 35;

/// Oldest phone app build that speaks this protocol.
pub const MIN_APP_VERSION: u32 = 23;

/// JSON control messages exchanged with the phone over the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Heartbeat (client → host)
    Ping {
        heart: u64,
        #[serde(rename = "pendingFrames")]
        pending_frames: usize,
    },
    /// Heartbeat reply (host → client)
    Pong {
        #[serde(default)]
        heart: Option<u64>,
    },
    /// Queue has room, send more
    Ack,
    /// Ask the phone for an IDR resync
    RequestKeyframe,
    /// Theme hint, both directions
    Night {
        #[serde(alias = "night", deserialize_with = "flag")]
        value: bool,
    },
}

/// Older app builds send the night flag as `0`/`1`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64() == Some(1)),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean flag, got {}",
            other
        ))),
    }
}

/// Anything the session puts on the socket
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Control(ControlMessage),
    /// Host-page actions (GPS, KEY, touch input) relayed without interpretation
    Forward(Value),
}

impl Outbound {
    pub fn to_text(&self) -> serde_json::Result<String> {
        match self {
            Outbound::Control(msg) => serde_json::to_string(msg),
            Outbound::Forward(value) => serde_json::to_string(value),
        }
    }
}

impl From<ControlMessage> for Outbound {
    fn from(msg: ControlMessage) -> Self {
        Outbound::Control(msg)
    }
}

/// Parameters of the INIT command. The drawing surface itself is handed over
/// out of band by whoever builds the session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitParams {
    pub port: u16,
    #[serde(rename = "appVersion")]
    pub app_version: u32,
    #[serde(default)]
    pub broadway: bool,
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
enum KnownCommand {
    Init(InitParams),
    Resize { width: u32, height: u32 },
    ClearBuffers,
    Night {
        #[serde(deserialize_with = "flag")]
        value: bool,
    },
}

/// Commands from the host page
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    Init(InitParams),
    Resize { width: u32, height: u32 },
    ClearBuffers,
    Night { value: bool },
    /// GPS, KEY and input actions, passed to the phone verbatim
    Forward(Value),
}

impl WorkerCommand {
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        match action.as_str() {
            "INIT" | "RESIZE" | "CLEAR_BUFFERS" | "NIGHT" => {
                Ok(match serde_json::from_value::<KnownCommand>(value)? {
                    KnownCommand::Init(params) => WorkerCommand::Init(params),
                    KnownCommand::Resize { width, height } => WorkerCommand::Resize { width, height },
                    KnownCommand::ClearBuffers => WorkerCommand::ClearBuffers,
                    KnownCommand::Night { value } => WorkerCommand::Night { value },
                })
            }
            _ => Ok(WorkerCommand::Forward(value)),
        }
    }

    pub fn parse_line(line: &str) -> serde_json::Result<Self> {
        Self::from_json(serde_json::from_str(line)?)
    }
}

/// Events for the host UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkerEvent {
    Error {
        error: String,
    },
    Warning {
        warning: String,
    },
    Stats {
        fps: u32,
        #[serde(rename = "decodeQueueSize")]
        decode_queue_size: usize,
        #[serde(rename = "pendingFrames")]
        pending_frames: usize,
        #[serde(rename = "codecErrors")]
        codec_errors: u64,
        /// `avc` or `hevc`
        #[serde(rename = "codecType")]
        codec_type: String,
    },
}

impl WorkerEvent {
    pub fn error(msg: impl Into<String>) -> Self {
        WorkerEvent::Error { error: msg.into() }
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        WorkerEvent::Warning {
            warning: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ping_wire_format() {
        let text = Outbound::from(ControlMessage::Ping {
            heart: 7,
            pending_frames: 2,
        })
        .to_text()
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"action": "PING", "heart": 7, "pendingFrames": 2}));
    }

    #[test]
    fn test_unit_actions() {
        assert_eq!(
            serde_json::to_value(ControlMessage::Ack).unwrap(),
            json!({"action": "ACK"})
        );
        assert_eq!(
            serde_json::to_value(ControlMessage::RequestKeyframe).unwrap(),
            json!({"action": "REQUEST_KEYFRAME"})
        );
    }

    #[test]
    fn test_host_messages() {
        let pong: ControlMessage = serde_json::from_str(r#"{"action":"PONG","heart":3}"#).unwrap();
        assert_eq!(pong, ControlMessage::Pong { heart: Some(3) });

        let bare: ControlMessage = serde_json::from_str(r#"{"action":"PONG"}"#).unwrap();
        assert_eq!(bare, ControlMessage::Pong { heart: None });

        let night: ControlMessage = serde_json::from_str(r#"{"action":"NIGHT","night":1}"#).unwrap();
        assert_eq!(night, ControlMessage::Night { value: true });

        let night: ControlMessage = serde_json::from_str(r#"{"action":"NIGHT","value":false}"#).unwrap();
        assert_eq!(night, ControlMessage::Night { value: false });
    }

    #[test]
    fn test_worker_commands() {
        let init = WorkerCommand::parse_line(
            r#"{"action":"INIT","port":9000,"appVersion":30,"broadway":true,"width":1280,"height":720}"#,
        )
        .unwrap();
        assert_eq!(
            init,
            WorkerCommand::Init(InitParams {
                port: 9000,
                app_version: 30,
                broadway: true,
                width: 1280,
                height: 720,
            })
        );

        assert_eq!(
            WorkerCommand::parse_line(r#"{"action":"CLEAR_BUFFERS"}"#).unwrap(),
            WorkerCommand::ClearBuffers
        );
        assert_eq!(
            WorkerCommand::parse_line(r#"{"action":"RESIZE","width":800,"height":480}"#).unwrap(),
            WorkerCommand::Resize {
                width: 800,
                height: 480
            }
        );
    }

    #[test]
    fn test_unknown_commands_are_forwarded_verbatim() {
        let gps = json!({"action": "GPS", "latitude": 1.5, "longitude": 2.5});
        let cmd = WorkerCommand::from_json(gps.clone()).unwrap();
        assert_eq!(cmd, WorkerCommand::Forward(gps.clone()));

        let text = Outbound::Forward(gps.clone()).to_text().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), gps);
    }

    #[test]
    fn test_worker_event_shapes() {
        assert_eq!(
            serde_json::to_value(WorkerEvent::error("no pong received in 10s")).unwrap(),
            json!({"error": "no pong received in 10s"})
        );
        assert_eq!(
            serde_json::to_value(WorkerEvent::Stats {
                fps: 30,
                decode_queue_size: 1,
                pending_frames: 2,
                codec_errors: 3,
                codec_type: "hevc".into(),
            })
            .unwrap(),
            json!({
                "fps": 30,
                "decodeQueueSize": 1,
                "pendingFrames": 2,
                "codecErrors": 3,
                "codecType": "hevc"
            })
        );
    }
}
