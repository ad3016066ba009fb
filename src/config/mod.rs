//! Bridge configuration
//!
//! Typed configuration structs with serde defaults, persisted as JSON by
//! [`ConfigStore`].

mod schema;
mod store;

pub use schema::*;
pub use store::ConfigStore;
