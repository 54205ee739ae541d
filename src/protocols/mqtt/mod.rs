//! MQTT 3.1.1 protocol engine.

pub mod handler;
pub mod parser;
pub mod scenarios;
pub mod session;

pub use handler::{MqttHooks, MqttServer, NoHooks};
pub use session::SessionTable;
