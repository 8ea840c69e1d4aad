//! # semtech-packet
//!
//! Codec for the Semtech UDP packet forwarder protocol, version 2: the datagrams
//! a LoRa gateway exchanges with its network server.
//!
//! ```text
//!  Gateway                                   Network server
//!     | ---- PULL_DATA (keepalive) ------------> |
//!     | <--- PULL_ACK -------------------------- |
//!     | ---- PUSH_DATA (rxpk / stat) ----------> |
//!     | <--- PUSH_ACK -------------------------- |
//!     | <--- PULL_RESP (txpk) ------------------ |
//!     | ---- TX_ACK (txpk_ack) ----------------> |
//! ```
//!
//! ```rust
//! use ldlsim_common::Eui64;
//! use semtech_packet::Message;
//!
//! let gateway = Eui64::from_bytes([0, 1, 2, 3, 4, 5, 6, 7]);
//! let bytes = Message::PullData { token: 42, gateway }.encode();
//! assert_eq!(Message::decode(&bytes).unwrap(), Message::PullData { token: 42, gateway });
//! ```

pub mod codec;
pub mod error;
pub mod records;

pub use codec::{Message, MessageType, PushPayload, PROTOCOL_VERSION};
pub use error::{PacketError, PacketResult};
pub use records::{hz_to_mhz, mhz_to_hz, CodingRate, DataRate, Modulation, RxPacket, Status, TxAckError, TxPacket};
