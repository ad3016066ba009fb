//! Camera client side of the bridge

pub mod connection;
pub mod counters;

pub use connection::{reject, CameraConnection};
pub use counters::{SessionCounters, SlotCounters};
