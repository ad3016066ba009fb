//! OMT camera bridge
//!
//! Accepts H.264/AAC streams from up to four phone cameras over TCP, decodes
//! and re-synchronizes them, and publishes each camera as a named Open Media
//! Transport source.

pub mod bridge;
pub mod camera;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod output;
pub mod protocol;
pub mod sync;
pub mod utils;

pub use bridge::Supervisor;
pub use error::{BridgeError, Result};
