//! Utility modules shared across the bridge

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, local_ipv4_addresses};
pub use throttle::LogThrottler;
