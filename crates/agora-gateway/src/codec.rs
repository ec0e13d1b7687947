//! Text framing for Engine.IO v4 carrying Socket.IO v5 packets on the
//! default namespace.
//!
//! ```text
//! 0{"sid":..,"pingInterval":..,"pingTimeout":..}   open
//! 2 / 3                                              ping / pong
//! 40{"token":..}                                     socket connect
//! 42["event",{..}]   4212["event",{..}]              event (with ack id)
//! 4312[{..}]                                         ack
//! ```

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    #[error("binary packets are not supported")]
    Binary,

    #[error("namespace {0} is not supported")]
    Namespace(String),

    #[error("malformed packet body: {0}")]
    Body(String),
}

/// Parameters sent by the server when the transport opens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let body = chars.as_str();
        let probe = || (!body.is_empty()).then(|| body.to_string());

        match kind {
            '0' => serde_json::from_str(body)
                .map(Self::Open)
                .map_err(|e| CodecError::Body(e.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(probe())),
            '3' => Ok(Self::Pong(probe())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(CodecError::Binary),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            // clients never send an open packet
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{}", data.as_deref().unwrap_or_default()),
            Self::Pong(data) => format!("3{}", data.as_deref().unwrap_or_default()),
            Self::Message(body) => format!("4{body}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: handshake with auth payload. Server: connect ack with sid.
    Connect(Option<Value>),
    Disconnect,
    Event {
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn event(name: &str, payload: Value, id: Option<u64>) -> Self {
        Self::Event {
            id,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    pub fn decode(body: &str) -> Result<Self, CodecError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let mut rest = chars.as_str();

        if rest.starts_with('/') {
            let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if nsp != "/" {
                return Err(CodecError::Namespace(nsp.to_string()));
            }
            rest = tail;
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (id, json) = rest.split_at(digits);
        let id = if id.is_empty() {
            None
        } else {
            Some(id.parse::<u64>().map_err(|e| CodecError::Body(e.to_string()))?)
        };

        let parse = |json: &str| -> Result<Value, CodecError> {
            serde_json::from_str(json).map_err(|e| CodecError::Body(e.to_string()))
        };

        match kind {
            '0' => Ok(Self::Connect(if json.is_empty() { None } else { Some(parse(json)?) })),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let Value::Array(mut args) = parse(json)? else {
                    return Err(CodecError::Body("event body is not an array".into()));
                };
                if args.is_empty() {
                    return Err(CodecError::Body("event without a name".into()));
                }
                let Value::String(name) = args.remove(0) else {
                    return Err(CodecError::Body("event name is not a string".into()));
                };
                Ok(Self::Event { id, name, args })
            }
            '3' => {
                let id = id.ok_or_else(|| CodecError::Body("ack without an id".into()))?;
                match parse(json)? {
                    Value::Array(args) => Ok(Self::Ack { id, args }),
                    _ => Err(CodecError::Body("ack body is not an array".into())),
                }
            }
            '4' => Ok(Self::ConnectError(if json.is_empty() {
                Value::Null
            } else {
                parse(json)?
            })),
            '5' | '6' => Err(CodecError::Binary),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(data)) => format!("0{data}"),
            Self::Disconnect => "1".to_string(),
            Self::Event { id, name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!("2{}{}", id_prefix(*id), Value::Array(array))
            }
            Self::Ack { id, args } => format!("3{id}{}", Value::Array(args.clone())),
            Self::ConnectError(data) => format!("4{data}"),
        }
    }

    /// Encode wrapped in an Engine.IO message packet, ready for the socket.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn id_prefix(id: Option<u64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

/// Human-readable reason out of a `connect_error` payload.
pub fn connect_error_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match data {
            Value::String(s) => s.clone(),
            Value::Null => "connection refused".to_string(),
            other => other.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_open_handshake() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        let EnginePacket::Open(open) = packet else {
            panic!("expected open, got {packet:?}");
        };
        assert_eq!(open.sid, "abc");
        assert_eq!(open.ping_interval, 25000);
        assert_eq!(open.ping_timeout, 20000);
    }

    #[test]
    fn ping_answers_with_matching_pong() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(None));
        assert_eq!(EnginePacket::Pong(None).encode(), "3");
        assert_eq!(EnginePacket::Pong(Some("probe".into())).encode(), "3probe");
    }

    #[test]
    fn encodes_event_with_ack_id() {
        let packet = SocketPacket::event("edit_message", json!({ "messageId": "m1" }), Some(12));
        assert_eq!(packet.to_frame(), r#"4212["edit_message",{"messageId":"m1"}]"#);
    }

    #[test]
    fn decodes_event_without_id() {
        let packet = SocketPacket::decode(r#"2["user_online",{"userId":"u1"}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                id: None,
                name: "user_online".into(),
                args: vec![json!({ "userId": "u1" })],
            }
        );
    }

    #[test]
    fn decodes_ack() {
        let packet = SocketPacket::decode(r#"37[{"success":true}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Ack {
                id: 7,
                args: vec![json!({ "success": true })],
            }
        );
    }

    #[test]
    fn decodes_connect_variants() {
        assert_eq!(
            SocketPacket::decode(r#"0{"sid":"s1"}"#).unwrap(),
            SocketPacket::Connect(Some(json!({ "sid": "s1" })))
        );
        assert_eq!(
            SocketPacket::decode("0/,").unwrap(),
            SocketPacket::Connect(None)
        );
        let SocketPacket::ConnectError(data) =
            SocketPacket::decode(r#"4{"message":"Authentication error"}"#).unwrap()
        else {
            panic!("expected connect_error");
        };
        assert_eq!(connect_error_message(&data), "Authentication error");
    }

    #[test]
    fn rejects_binary_and_foreign_namespaces() {
        assert_eq!(SocketPacket::decode(r#"51-["upload",{}]"#), Err(CodecError::Binary));
        assert_eq!(
            SocketPacket::decode(r#"2/admin,["x"]"#),
            Err(CodecError::Namespace("/admin".into()))
        );
        assert_eq!(EnginePacket::decode(""), Err(CodecError::Empty));
    }

    #[test]
    fn connect_frame_carries_token() {
        let frame = SocketPacket::Connect(Some(json!({ "token": "t" }))).to_frame();
        assert_eq!(frame, r#"40{"token":"t"}"#);
    }
}
