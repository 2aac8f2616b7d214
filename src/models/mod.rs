//! Domain model module declarations.

pub mod configuration;
pub mod detection;
pub mod server;
pub mod session;
