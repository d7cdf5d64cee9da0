//! Connections to single nodes.

mod connection;
mod streams;

pub use connection::Connection;
pub(crate) use connection::{open_connection, ConnectionConfig, ErrorReceiver};
