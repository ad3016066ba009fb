//! Camera wire protocol
//!
//! Framing, message types and the JSON payloads exchanged with mobile
//! camera clients.

pub mod codec;
pub mod hello;
pub mod types;

pub use codec::{encode_message, WireCodec, WireHeader};
pub use hello::{
    AudioParams, ClientHello, DeviceInfo, RejectNotice, TelemetryRecord, TelemetrySnapshot,
    ThermalState, VideoParams,
};
pub use types::{
    EncodedPacket, MediaKind, MessageKind, PacketFlags, WireMessage, DEFAULT_MAX_PAYLOAD,
    HEADER_LEN, MAGIC,
};
