//! Kinds of events a connection can subscribe to with REGISTER.

use std::fmt;
use std::str::FromStr;

use super::frame_errors::CqlEventParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::enum_variant_names)]
pub enum EventType {
    /// Nodes joined, left or moved.
    TopologyChange,
    /// Nodes went up or down.
    StatusChange,
    /// A keyspace, table, type, function or aggregate changed.
    SchemaChange,
}

impl EventType {
    /// Every event type, in the order they are registered for.
    pub const ALL: [EventType; 3] = [
        EventType::TopologyChange,
        EventType::StatusChange,
        EventType::SchemaChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopologyChange => "TOPOLOGY_CHANGE",
            Self::StatusChange => "STATUS_CHANGE",
            Self::SchemaChange => "SCHEMA_CHANGE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CqlEventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| CqlEventParseError::UnknownEventType(s.to_string()))
    }
}
