mod client;
mod config;
mod queue_broker;
mod queue_publisher;
mod queue_schema;

pub use client::*;
pub use config::*;
pub use queue_broker::*;
pub use queue_publisher::*;
pub use queue_schema::*;
