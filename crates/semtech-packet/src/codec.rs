//! Datagram framing.
//!
//! ```text
//! +---------+-------------+------+------------------------------+
//! | version | token (BE)  | type | trailer                      |
//! | 1 byte  | 2 bytes     | 1 B  | per type, see below          |
//! +---------+-------------+------+------------------------------+
//! ```
//!
//! | Type | Tag | Trailer |
//! |---|---|---|
//! | PUSH_DATA | 0 | gateway EUI + `{"rxpk":[..],"stat":{..}}` |
//! | PUSH_ACK | 1 | gateway EUI + `{}`, or nothing |
//! | PULL_DATA | 2 | gateway EUI |
//! | PULL_RESP | 3 | `{"txpk":{..}}` |
//! | PULL_ACK | 4 | gateway EUI, or nothing |
//! | TX_ACK | 5 | gateway EUI + `{"txpk_ack":{"error":".."}}`, body optional |

use crate::records::{RxPacket, Status, TxAckError, TxPacket};
use crate::{PacketError, PacketResult};
use ldlsim_common::Eui64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The only protocol version this codec speaks.
pub const PROTOCOL_VERSION: u8 = 2;

const HEADER_LEN: usize = 4;
const EUI_LEN: usize = 8;

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    PushData = 0,
    PushAck = 1,
    PullData = 2,
    PullResp = 3,
    PullAck = 4,
    TxAck = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = PacketError;

    fn try_from(tag: u8) -> PacketResult<Self> {
        Ok(match tag {
            0 => MessageType::PushData,
            1 => MessageType::PushAck,
            2 => MessageType::PullData,
            3 => MessageType::PullResp,
            4 => MessageType::PullAck,
            5 => MessageType::TxAck,
            other => return Err(PacketError::UnknownType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageType::PushData => "PUSH_DATA",
            MessageType::PushAck => "PUSH_ACK",
            MessageType::PullData => "PULL_DATA",
            MessageType::PullResp => "PULL_RESP",
            MessageType::PullAck => "PULL_ACK",
            MessageType::TxAck => "TX_ACK",
        })
    }
}

/// JSON body of PUSH_DATA.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rxpk: Vec<RxPacket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<Status>,
}

#[derive(Deserialize)]
struct PullRespBody {
    txpk: TxPacket,
}

#[derive(Serialize, Deserialize, Default)]
struct TxAckBody {
    #[serde(default)]
    txpk_ack: TxAckFields,
}

#[derive(Serialize, Deserialize, Default)]
struct TxAckFields {
    #[serde(default)]
    error: TxAckError,
}

/// One packet forwarder datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PushData {
        token: u16,
        gateway: Eui64,
        payload: PushPayload,
    },
    /// `gateway` is `None` for the bare 4-byte form.
    PushAck { token: u16, gateway: Option<Eui64> },
    PullData { token: u16, gateway: Eui64 },
    PullResp { token: u16, txpk: TxPacket },
    /// `gateway` is `None` for the bare 4-byte form.
    PullAck { token: u16, gateway: Option<Eui64> },
    TxAck {
        token: u16,
        gateway: Eui64,
        error: TxAckError,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::PushData { .. } => MessageType::PushData,
            Message::PushAck { .. } => MessageType::PushAck,
            Message::PullData { .. } => MessageType::PullData,
            Message::PullResp { .. } => MessageType::PullResp,
            Message::PullAck { .. } => MessageType::PullAck,
            Message::TxAck { .. } => MessageType::TxAck,
        }
    }

    pub fn token(&self) -> u16 {
        match self {
            Message::PushData { token, .. }
            | Message::PushAck { token, .. }
            | Message::PullData { token, .. }
            | Message::PullResp { token, .. }
            | Message::PullAck { token, .. }
            | Message::TxAck { token, .. } => *token,
        }
    }

    /// Gateway EUI carried in the datagram, if any.
    pub fn gateway(&self) -> Option<Eui64> {
        match self {
            Message::PushData { gateway, .. } | Message::PullData { gateway, .. } | Message::TxAck { gateway, .. } => {
                Some(*gateway)
            }
            Message::PushAck { gateway, .. } | Message::PullAck { gateway, .. } => *gateway,
            Message::PullResp { .. } => None,
        }
    }

    /// Encode to a datagram.
    pub fn encode(&self) -> Vec<u8> {
        let token = self.token().to_be_bytes();
        let mut out = vec![PROTOCOL_VERSION, token[0], token[1], self.message_type() as u8];
        match self {
            Message::PushData { gateway, payload, .. } => {
                out.extend_from_slice(&gateway.bytes());
                write_json(&mut out, payload);
            }
            Message::PushAck { gateway, .. } => {
                if let Some(gateway) = gateway {
                    out.extend_from_slice(&gateway.bytes());
                    out.extend_from_slice(b"{}");
                }
            }
            Message::PullData { gateway, .. } => out.extend_from_slice(&gateway.bytes()),
            Message::PullResp { txpk, .. } => write_json(&mut out, &PullRespBodyRef { txpk }),
            Message::PullAck { gateway, .. } => {
                if let Some(gateway) = gateway {
                    out.extend_from_slice(&gateway.bytes());
                }
            }
            Message::TxAck { gateway, error, .. } => {
                out.extend_from_slice(&gateway.bytes());
                let body = TxAckBody {
                    txpk_ack: TxAckFields { error: *error },
                };
                write_json(&mut out, &body);
            }
        }
        out
    }

    /// Decode a datagram. Never panics on malformed input.
    pub fn decode(buf: &[u8]) -> PacketResult<Message> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: HEADER_LEN,
                actual: buf.len(),
            });
        }
        if buf[0] != PROTOCOL_VERSION {
            return Err(PacketError::UnsupportedVersion(buf[0]));
        }
        let token = u16::from_be_bytes([buf[1], buf[2]]);
        let kind = MessageType::try_from(buf[3])?;
        let body = &buf[HEADER_LEN..];

        Ok(match kind {
            MessageType::PushData => {
                let (gateway, json) = split_eui(buf)?;
                let payload: PushPayload = serde_json::from_slice(json)?;
                for rxpk in &payload.rxpk {
                    rxpk.validate()?;
                }
                Message::PushData { token, gateway, payload }
            }
            MessageType::PushAck => {
                let gateway = optional_eui(buf)?;
                if body.len() > EUI_LEN {
                    serde_json::from_slice::<serde_json::Value>(&body[EUI_LEN..])?;
                }
                Message::PushAck { token, gateway }
            }
            MessageType::PullData => {
                let (gateway, _) = split_eui(buf)?;
                Message::PullData { token, gateway }
            }
            MessageType::PullResp => {
                let PullRespBody { txpk } = serde_json::from_slice(body)?;
                txpk.validate()?;
                Message::PullResp { token, txpk }
            }
            MessageType::PullAck => Message::PullAck {
                token,
                gateway: optional_eui(buf)?,
            },
            MessageType::TxAck => {
                let (gateway, json) = split_eui(buf)?;
                let error = if json.iter().all(u8::is_ascii_whitespace) {
                    TxAckError::None
                } else {
                    serde_json::from_slice::<TxAckBody>(json)?.txpk_ack.error
                };
                Message::TxAck { token, gateway, error }
            }
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} token={:#06x}", self.message_type(), self.token())
    }
}

#[derive(Serialize)]
struct PullRespBodyRef<'a> {
    txpk: &'a TxPacket,
}

fn write_json<T: Serialize>(out: &mut Vec<u8>, value: &T) {
    // Records hold only strings, numbers and string-keyed maps.
    let written = serde_json::to_writer(&mut *out, value);
    debug_assert!(written.is_ok(), "record serialization failed");
}

fn split_eui(buf: &[u8]) -> PacketResult<(Eui64, &[u8])> {
    let end = HEADER_LEN + EUI_LEN;
    if buf.len() < end {
        return Err(PacketError::Truncated {
            needed: end,
            actual: buf.len(),
        });
    }
    let mut bytes = [0u8; EUI_LEN];
    bytes.copy_from_slice(&buf[HEADER_LEN..end]);
    Ok((Eui64::from_bytes(bytes), &buf[end..]))
}

fn optional_eui(buf: &[u8]) -> PacketResult<Option<Eui64>> {
    if buf.len() == HEADER_LEN {
        return Ok(None);
    }
    split_eui(buf).map(|(eui, _)| Some(eui))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GW: Eui64 = Eui64::from_bytes([0xaa, 0x55, 0x5a, 0, 0, 0, 0, 1]);

    #[test]
    fn test_header_layout() {
        let bytes = Message::PullData { token: 0x1234, gateway: GW }.encode();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &[2, 0x12, 0x34, 2]);
        assert_eq!(&bytes[4..], &GW.bytes()[..]);
    }

    #[test]
    fn test_push_ack_writes_empty_object() {
        let bytes = Message::PushAck {
            token: 7,
            gateway: Some(GW),
        }
        .encode();
        assert_eq!(&bytes[12..], b"{}");
        let bare = Message::PushAck { token: 7, gateway: None }.encode();
        assert_eq!(bare, vec![2, 0, 7, 1]);
    }

    #[test]
    fn test_short_form_acks() {
        assert_eq!(
            Message::decode(&[2, 0xab, 0xcd, 4]).unwrap(),
            Message::PullAck {
                token: 0xabcd,
                gateway: None
            }
        );
        assert_eq!(
            Message::decode(&[2, 0, 1, 1]).unwrap(),
            Message::PushAck { token: 1, gateway: None }
        );
    }

    #[test]
    fn test_tx_ack_without_body_is_none() {
        let mut bytes = vec![2, 0, 9, 5];
        bytes.extend_from_slice(&GW.bytes());
        match Message::decode(&bytes).unwrap() {
            Message::TxAck { error, gateway, .. } => {
                assert_eq!(error, TxAckError::None);
                assert_eq!(gateway, GW);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tx_ack_body() {
        let bytes = Message::TxAck {
            token: 3,
            gateway: GW,
            error: TxAckError::TooLate,
        }
        .encode();
        assert_eq!(&bytes[12..], br#"{"txpk_ack":{"error":"TOO_LATE"}}"#);
    }

    #[test]
    fn test_rejects_bad_headers() {
        assert!(matches!(Message::decode(&[]), Err(PacketError::Truncated { needed: 4, actual: 0 })));
        assert!(matches!(Message::decode(&[1, 0, 0, 2]), Err(PacketError::UnsupportedVersion(1))));
        assert!(matches!(Message::decode(&[2, 0, 0, 6]), Err(PacketError::UnknownType(6))));
        assert!(matches!(
            Message::decode(&[2, 0, 0, 2, 1, 2, 3]),
            Err(PacketError::Truncated { needed: 12, actual: 7 })
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let mut bytes = vec![2, 0, 0, 0];
        bytes.extend_from_slice(&GW.bytes());
        bytes.extend_from_slice(b"{\"rxpk\":[");
        assert!(matches!(Message::decode(&bytes), Err(PacketError::Json(_))));

        let bytes = [&[2u8, 0, 0, 3][..], &br#"{"txpk":{"imme":true}}"#[..]].concat();
        assert!(matches!(Message::decode(&bytes), Err(PacketError::Json(_))));
    }

    #[test]
    fn test_display() {
        let msg = Message::PullAck { token: 0x10, gateway: None };
        assert_eq!(msg.to_string(), "PULL_ACK token=0x0010");
    }
}
