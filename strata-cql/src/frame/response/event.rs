//! `EVENT` response, pushed by the server on stream -1.

use crate::frame::frame_errors::{CqlEventParseError, LowLevelDeserializationError};
use crate::frame::server_event_type::EventType;
use crate::frame::types;
use bytes::BufMut;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(clippy::enum_variant_names)]
pub enum Event {
    TopologyChange(TopologyChangeEvent),
    StatusChange(StatusChangeEvent),
    SchemaChange(SchemaChangeEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChangeEvent {
    NewNode(SocketAddr),
    RemovedNode(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChangeEvent {
    Up(SocketAddr),
    Down(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(clippy::enum_variant_names)]
pub enum SchemaChangeEvent {
    KeyspaceChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
    },
    TableChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        object_name: String,
    },
    TypeChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        type_name: String,
    },
    FunctionChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        function_name: String,
        arguments: Vec<String>,
    },
    AggregateChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        aggregate_name: String,
        arguments: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

impl SchemaChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaChangeType::Created => "CREATED",
            SchemaChangeType::Updated => "UPDATED",
            SchemaChangeType::Dropped => "DROPPED",
        }
    }
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TopologyChange(_) => EventType::TopologyChange,
            Event::StatusChange(_) => EventType::StatusChange,
            Event::SchemaChange(_) => EventType::SchemaChange,
        }
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlEventParseError> {
        let event_type: EventType = types::read_string(buf)
            .map_err(CqlEventParseError::EventTypeParseError)?
            .parse()?;
        match event_type {
            EventType::TopologyChange => {
                Ok(Self::TopologyChange(TopologyChangeEvent::deserialize(buf)?))
            }
            EventType::StatusChange => Ok(Self::StatusChange(StatusChangeEvent::deserialize(buf)?)),
            EventType::SchemaChange => Ok(Self::SchemaChange(SchemaChangeEvent::deserialize(buf)?)),
        }
    }
}

fn read_arguments(buf: &mut &[u8]) -> Result<Vec<String>, CqlEventParseError> {
    let count = types::read_short(buf).map_err(LowLevelDeserializationError::from)?;
    let mut arguments = Vec::with_capacity(count as usize);
    for _ in 0..count {
        arguments.push(types::read_string(buf)?.to_string());
    }
    Ok(arguments)
}

impl SchemaChangeEvent {
    /// Shared by EVENT and RESULT::SchemaChange bodies.
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlEventParseError> {
        let change_type = match types::read_string(buf)? {
            "CREATED" => SchemaChangeType::Created,
            "UPDATED" => SchemaChangeType::Updated,
            "DROPPED" => SchemaChangeType::Dropped,
            other => return Err(CqlEventParseError::UnknownChangeType(other.to_string())),
        };

        let target = types::read_string(buf)?;
        let keyspace_name = types::read_string(buf)?.to_string();

        match target {
            "KEYSPACE" => Ok(Self::KeyspaceChange {
                change_type,
                keyspace_name,
            }),
            "TABLE" => Ok(Self::TableChange {
                change_type,
                keyspace_name,
                object_name: types::read_string(buf)?.to_string(),
            }),
            "TYPE" => Ok(Self::TypeChange {
                change_type,
                keyspace_name,
                type_name: types::read_string(buf)?.to_string(),
            }),
            "FUNCTION" => Ok(Self::FunctionChange {
                change_type,
                keyspace_name,
                function_name: types::read_string(buf)?.to_string(),
                arguments: read_arguments(buf)?,
            }),
            "AGGREGATE" => Ok(Self::AggregateChange {
                change_type,
                keyspace_name,
                aggregate_name: types::read_string(buf)?.to_string(),
                arguments: read_arguments(buf)?,
            }),
            _ => Err(CqlEventParseError::UnknownTarget(target.to_string())),
        }
    }

    /// Writes the event the way a server sends it.
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
        let (change_type, target, name, arguments) = match self {
            Self::KeyspaceChange { change_type, .. } => (change_type, "KEYSPACE", None, None),
            Self::TableChange {
                change_type,
                object_name,
                ..
            } => (change_type, "TABLE", Some(object_name), None),
            Self::TypeChange {
                change_type,
                type_name,
                ..
            } => (change_type, "TYPE", Some(type_name), None),
            Self::FunctionChange {
                change_type,
                function_name,
                arguments,
                ..
            } => (change_type, "FUNCTION", Some(function_name), Some(arguments)),
            Self::AggregateChange {
                change_type,
                aggregate_name,
                arguments,
                ..
            } => (change_type, "AGGREGATE", Some(aggregate_name), Some(arguments)),
        };
        types::write_string(change_type.as_str(), buf)?;
        types::write_string(target, buf)?;
        types::write_string(self.keyspace_name(), buf)?;
        if let Some(name) = name {
            types::write_string(name, buf)?;
        }
        if let Some(arguments) = arguments {
            types::write_string_list(arguments, buf)?;
        }
        Ok(())
    }

    pub fn keyspace_name(&self) -> &str {
        match self {
            Self::KeyspaceChange { keyspace_name, .. }
            | Self::TableChange { keyspace_name, .. }
            | Self::TypeChange { keyspace_name, .. }
            | Self::FunctionChange { keyspace_name, .. }
            | Self::AggregateChange { keyspace_name, .. } => keyspace_name,
        }
    }
}

impl TopologyChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlEventParseError> {
        let type_of_change = types::read_string(buf)?;
        let addr = types::read_inet(buf)?;

        match type_of_change {
            "NEW_NODE" => Ok(Self::NewNode(addr)),
            "REMOVED_NODE" => Ok(Self::RemovedNode(addr)),
            _ => Err(CqlEventParseError::UnknownChangeType(
                type_of_change.to_string(),
            )),
        }
    }
}

impl StatusChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlEventParseError> {
        let type_of_change = types::read_string(buf)?;
        let addr = types::read_inet(buf)?;

        match type_of_change {
            "UP" => Ok(Self::Up(addr)),
            "DOWN" => Ok(Self::Down(addr)),
            _ => Err(CqlEventParseError::UnknownChangeType(
                type_of_change.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn strings(parts: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for part in parts {
            types::write_string(part, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn status_and_topology_events() {
        let addr: SocketAddr = "10.0.0.7:9042".parse().unwrap();

        let mut body = strings(&["STATUS_CHANGE", "DOWN"]);
        types::write_inet(addr, &mut body);
        let event = Event::deserialize(&mut &body[..]).unwrap();
        assert_eq!(event, Event::StatusChange(StatusChangeEvent::Down(addr)));
        assert_eq!(event.event_type(), EventType::StatusChange);

        let mut body = strings(&["TOPOLOGY_CHANGE", "NEW_NODE"]);
        types::write_inet(addr, &mut body);
        assert_eq!(
            Event::deserialize(&mut &body[..]).unwrap(),
            Event::TopologyChange(TopologyChangeEvent::NewNode(addr))
        );

        let mut body = strings(&["TOPOLOGY_CHANGE", "MOVED_NODE"]);
        types::write_inet(addr, &mut body);
        assert_matches!(
            Event::deserialize(&mut &body[..]),
            Err(CqlEventParseError::UnknownChangeType(t)) if t == "MOVED_NODE"
        );
    }

    #[test]
    fn schema_change_events() {
        let body = strings(&["SCHEMA_CHANGE", "CREATED", "TABLE", "ks", "tbl"]);
        let event = Event::deserialize(&mut &body[..]).unwrap();
        assert_matches!(
            &event,
            Event::SchemaChange(SchemaChangeEvent::TableChange {
                change_type: SchemaChangeType::Created,
                keyspace_name,
                object_name,
            }) if keyspace_name == "ks" && object_name == "tbl"
        );

        let mut body = strings(&["DROPPED", "FUNCTION", "ks", "f"]);
        types::write_short(2, &mut body);
        body.extend(strings(&["int", "text"]));
        let change = SchemaChangeEvent::deserialize(&mut &body[..]).unwrap();
        assert_eq!(change.keyspace_name(), "ks");
        assert_matches!(
            change,
            SchemaChangeEvent::FunctionChange { arguments, .. } if arguments == ["int", "text"]
        );

        let body = strings(&["CREATED", "INDEX", "ks"]);
        assert_matches!(
            SchemaChangeEvent::deserialize(&mut &body[..]),
            Err(CqlEventParseError::UnknownTarget(_))
        );
    }

    #[test]
    fn unknown_or_truncated_events_are_errors() {
        let body = strings(&["CLIENT_CHANGE"]);
        assert_matches!(
            Event::deserialize(&mut &body[..]),
            Err(CqlEventParseError::UnknownEventType(_))
        );

        let body = strings(&["SCHEMA_CHANGE", "UPDATED", "KEYSPACE"]);
        assert_matches!(
            Event::deserialize(&mut &body[..]),
            Err(CqlEventParseError::FieldParseError(_))
        );
    }
}
