//! Wire protocol for the signaling channel.
//!
//! Every frame carries an [`Envelope`]: a numeric opcode plus an
//! opcode-specific JSON payload. The opcode set is closed; frames with any
//! other opcode are rejected as [`SignalError::UnimplementedOperation`].
//!
//! | Opcode | Direction | Payload |
//! |--------|-----------|---------|
//! | KNOCK | in | `subnet` |
//! | ACKNOWLEDGEMENT | out | `id`, `rejected` |
//! | GREETING | out | `offererId`, `answererId` |
//! | OFFER / ANSWER / CANDIDATE | in/out | `offererId`, `answererId`, body |
//! | BIND / ACCEPTING / SHUTDOWN | in | `id`, `alias` |
//! | ALIAS | out | `id`, `alias`, `set` (+ optional connection fields) |
//! | CONNECT | in | `id`, `remoteAlias`, `clientConnectionId` |
//! | ACCEPT | out | `boundAlias`, `clientAlias` |
//! | GOODBYE | out | `id` |
//! | PING / PONG | out / in | empty |

use crate::address::{Alias as AliasAddr, ClientId, Subnet};
use crate::error::{SignalError, SignalResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Numeric operation codes. The values are stable within a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Knock = 1,
    Acknowledgement = 2,
    Greeting = 3,
    Offer = 4,
    Answer = 5,
    Candidate = 6,
    Bind = 7,
    Alias = 8,
    Accepting = 9,
    Shutdown = 10,
    Connect = 11,
    Accept = 12,
    Goodbye = 13,
    Ping = 14,
    Pong = 15,
}

impl Opcode {
    /// Convert from byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Knock),
            2 => Some(Self::Acknowledgement),
            3 => Some(Self::Greeting),
            4 => Some(Self::Offer),
            5 => Some(Self::Answer),
            6 => Some(Self::Candidate),
            7 => Some(Self::Bind),
            8 => Some(Self::Alias),
            9 => Some(Self::Accepting),
            10 => Some(Self::Shutdown),
            11 => Some(Self::Connect),
            12 => Some(Self::Accept),
            13 => Some(Self::Goodbye),
            14 => Some(Self::Ping),
            15 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Convert to byte value.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = SignalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_byte(value).ok_or(SignalError::UnimplementedOperation(value))
    }
}

/// Framed wire representation: opcode plus opcode-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub opcode: u8,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// KNOCK: join the overlay, requesting an id in `subnet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Knock {
    pub subnet: Subnet,
}

/// ACKNOWLEDGEMENT: reply to KNOCK. `id` is `"-1"` when `rejected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub id: String,
    pub rejected: bool,
}

/// GREETING: tells an existing peer that `answerer_id` has joined, so the
/// peer can initiate an OFFER toward it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Greeting {
    pub offerer_id: ClientId,
    pub answerer_id: ClientId,
}

/// OFFER: session description relayed from offerer to answerer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub offerer_id: ClientId,
    pub answerer_id: ClientId,
    pub offer: String,
}

/// ANSWER: session description relayed from answerer back to offerer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub offerer_id: ClientId,
    pub answerer_id: ClientId,
    pub answer: String,
}

/// CANDIDATE: ICE-style candidate relayed from offerer to answerer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub offerer_id: ClientId,
    pub answerer_id: ClientId,
    pub candidate: String,
}

/// BIND: publish `alias` as a well-known endpoint owned by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bind {
    pub id: ClientId,
    pub alias: AliasAddr,
}

/// ALIAS: alias lifecycle notification. `set` announces creation,
/// `!set` is a teardown or a directed rejection. The optional fields are
/// only present on CONNECT-related notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasUpdate {
    pub id: ClientId,
    pub alias: AliasAddr,
    pub set: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connection_alias: Option<bool>,
}

impl AliasUpdate {
    /// Plain alias notification with no connection fields.
    pub fn plain(id: ClientId, alias: AliasAddr, set: bool) -> Self {
        Self {
            id,
            alias,
            set,
            client_connection_id: None,
            is_connection_alias: None,
        }
    }
}

/// ACCEPTING: the owner of `alias` is ready to receive CONNECTs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accepting {
    pub id: ClientId,
    pub alias: AliasAddr,
}

/// SHUTDOWN: the owner withdraws `alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shutdown {
    pub id: ClientId,
    pub alias: AliasAddr,
}

/// CONNECT: `id` asks to establish a session against `remote_alias`.
/// `client_connection_id` is an opaque correlation token echoed back so the
/// initiator can match the replies to this request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connect {
    pub id: ClientId,
    pub remote_alias: AliasAddr,
    pub client_connection_id: String,
}

/// ACCEPT: tells the owner of `bound_alias` that `client_alias` names the
/// initiator side of a new connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accept {
    pub bound_alias: AliasAddr,
    pub client_alias: AliasAddr,
}

/// GOODBYE: `id` has left the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goodbye {
    pub id: ClientId,
}

/// Decoded signaling message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Knock(Knock),
    Acknowledgement(Acknowledgement),
    Greeting(Greeting),
    Offer(Offer),
    Answer(Answer),
    Candidate(Candidate),
    Bind(Bind),
    Alias(AliasUpdate),
    Accepting(Accepting),
    Shutdown(Shutdown),
    Connect(Connect),
    Accept(Accept),
    Goodbye(Goodbye),
    Ping,
    Pong,
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Knock(_) => Opcode::Knock,
            Message::Acknowledgement(_) => Opcode::Acknowledgement,
            Message::Greeting(_) => Opcode::Greeting,
            Message::Offer(_) => Opcode::Offer,
            Message::Answer(_) => Opcode::Answer,
            Message::Candidate(_) => Opcode::Candidate,
            Message::Bind(_) => Opcode::Bind,
            Message::Alias(_) => Opcode::Alias,
            Message::Accepting(_) => Opcode::Accepting,
            Message::Shutdown(_) => Opcode::Shutdown,
            Message::Connect(_) => Opcode::Connect,
            Message::Accept(_) => Opcode::Accept,
            Message::Goodbye(_) => Opcode::Goodbye,
            Message::Ping => Opcode::Ping,
            Message::Pong => Opcode::Pong,
        }
    }

    /// Encode into the wire envelope.
    pub fn encode(&self) -> Envelope {
        // Payloads are plain structs with string keys; to_value cannot fail.
        let data = match self {
            Message::Knock(p) => serde_json::to_value(p).unwrap(),
            Message::Acknowledgement(p) => serde_json::to_value(p).unwrap(),
            Message::Greeting(p) => serde_json::to_value(p).unwrap(),
            Message::Offer(p) => serde_json::to_value(p).unwrap(),
            Message::Answer(p) => serde_json::to_value(p).unwrap(),
            Message::Candidate(p) => serde_json::to_value(p).unwrap(),
            Message::Bind(p) => serde_json::to_value(p).unwrap(),
            Message::Alias(p) => serde_json::to_value(p).unwrap(),
            Message::Accepting(p) => serde_json::to_value(p).unwrap(),
            Message::Shutdown(p) => serde_json::to_value(p).unwrap(),
            Message::Connect(p) => serde_json::to_value(p).unwrap(),
            Message::Accept(p) => serde_json::to_value(p).unwrap(),
            Message::Goodbye(p) => serde_json::to_value(p).unwrap(),
            Message::Ping | Message::Pong => serde_json::json!({}),
        };
        Envelope {
            opcode: self.opcode().as_byte(),
            data,
        }
    }

    /// Decode a wire envelope into a typed message.
    pub fn decode(envelope: Envelope) -> SignalResult<Self> {
        let opcode = Opcode::try_from(envelope.opcode)?;
        let raw = envelope.opcode;
        let data = envelope.data;
        Ok(match opcode {
            Opcode::Knock => Message::Knock(payload(raw, data)?),
            Opcode::Acknowledgement => Message::Acknowledgement(payload(raw, data)?),
            Opcode::Greeting => Message::Greeting(payload(raw, data)?),
            Opcode::Offer => Message::Offer(payload(raw, data)?),
            Opcode::Answer => Message::Answer(payload(raw, data)?),
            Opcode::Candidate => Message::Candidate(payload(raw, data)?),
            Opcode::Bind => Message::Bind(payload(raw, data)?),
            Opcode::Alias => Message::Alias(payload(raw, data)?),
            Opcode::Accepting => Message::Accepting(payload(raw, data)?),
            Opcode::Shutdown => Message::Shutdown(payload(raw, data)?),
            Opcode::Connect => Message::Connect(payload(raw, data)?),
            Opcode::Accept => Message::Accept(payload(raw, data)?),
            Opcode::Goodbye => Message::Goodbye(payload(raw, data)?),
            Opcode::Ping => Message::Ping,
            Opcode::Pong => Message::Pong,
        })
    }
}

fn payload<T: DeserializeOwned>(opcode: u8, data: serde_json::Value) -> SignalResult<T> {
    serde_json::from_value(data).map_err(|source| SignalError::MalformedPayload { opcode, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 1..=15u8 {
            let opcode = Opcode::from_byte(byte).expect("valid opcode");
            assert_eq!(opcode.as_byte(), byte);
            let opcode: Opcode = byte.try_into().expect("try_from should work");
            assert_eq!(opcode.as_byte(), byte);
        }
    }

    #[test]
    fn test_opcode_rejects_unknown_bytes() {
        for invalid in [0u8, 16, 99, 255] {
            assert!(Opcode::from_byte(invalid).is_none());
            let err = Opcode::try_from(invalid).expect_err("invalid opcode");
            assert!(matches!(err, SignalError::UnimplementedOperation(b) if b == invalid));
        }
    }

    #[test]
    fn test_message_roundtrip() {
        let messages = vec![
            Message::Knock(Knock {
                subnet: "127.0.0".parse().unwrap(),
            }),
            Message::Acknowledgement(Acknowledgement {
                id: "127.0.0.0".to_string(),
                rejected: false,
            }),
            Message::Greeting(Greeting {
                offerer_id: "127.0.0.0".parse().unwrap(),
                answerer_id: "127.0.0.1".parse().unwrap(),
            }),
            Message::Offer(Offer {
                offerer_id: "127.0.0.0".parse().unwrap(),
                answerer_id: "127.0.0.1".parse().unwrap(),
                offer: "sdp".to_string(),
            }),
            Message::Alias(AliasUpdate {
                id: "127.0.0.1".parse().unwrap(),
                alias: "127.0.0.1:0".parse().unwrap(),
                set: true,
                client_connection_id: Some("c1".to_string()),
                is_connection_alias: Some(true),
            }),
            Message::Connect(Connect {
                id: "127.0.0.1".parse().unwrap(),
                remote_alias: "127.0.0.0:0".parse().unwrap(),
                client_connection_id: "c1".to_string(),
            }),
            Message::Accept(Accept {
                bound_alias: "127.0.0.0:0".parse().unwrap(),
                client_alias: "127.0.0.1:0".parse().unwrap(),
            }),
            Message::Goodbye(Goodbye {
                id: "127.0.0.0".parse().unwrap(),
            }),
            Message::Ping,
            Message::Pong,
        ];

        for message in messages {
            let envelope = message.encode();
            let json = serde_json::to_string(&envelope).unwrap();
            let back: Envelope = serde_json::from_str(&json).unwrap();
            let decoded = Message::decode(back).expect("decode");
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let msg = Message::Greeting(Greeting {
            offerer_id: "127.0.0.0".parse().unwrap(),
            answerer_id: "127.0.0.1".parse().unwrap(),
        });
        let json = serde_json::to_string(&msg.encode()).unwrap();
        assert!(json.contains("\"offererId\""));
        assert!(json.contains("\"answererId\""));
    }

    #[test]
    fn test_alias_update_skips_absent_connection_fields() {
        let plain = AliasUpdate::plain(
            "127.0.0.0".parse().unwrap(),
            "127.0.0.0:0".parse().unwrap(),
            true,
        );
        let json = serde_json::to_string(&Message::Alias(plain).encode()).unwrap();
        assert!(!json.contains("clientConnectionId"));
        assert!(!json.contains("isConnectionAlias"));
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let envelope = Envelope {
            opcode: 42,
            data: serde_json::json!({}),
        };
        let err = Message::decode(envelope).expect_err("unknown opcode");
        assert!(matches!(err, SignalError::UnimplementedOperation(42)));
    }

    #[test]
    fn test_decode_rejects_mismatched_payload() {
        let envelope = Envelope {
            opcode: Opcode::Knock.as_byte(),
            data: serde_json::json!({"subnet": "not-a-subnet"}),
        };
        let err = Message::decode(envelope).expect_err("bad payload");
        assert!(matches!(err, SignalError::MalformedPayload { .. }));
    }
}
