use bytes::BufMut;

use super::frame_errors::{CqlRequestSerializationError, LowLevelDeserializationError};
use super::types::{self, RawValue};
use crate::registry::TypeRegistry;
use crate::value::{ColumnType, CqlValue};

/// Bound values of a request, already serialized to [value]s.
///
/// Values are added in bind marker order. The buffer holds exactly what goes
/// into the frame after the [short] value count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedValues {
    serialized_values: Vec<u8>,
    element_count: u16,
}

impl SerializedValues {
    /// An empty list of values.
    pub const EMPTY: &'static SerializedValues = &SerializedValues::new();

    pub const fn new() -> Self {
        SerializedValues {
            serialized_values: Vec::new(),
            element_count: 0,
        }
    }

    fn bump_count(&mut self) -> Result<(), CqlRequestSerializationError> {
        self.element_count = self
            .element_count
            .checked_add(1)
            .ok_or(CqlRequestSerializationError::TooManyValues(
                self.element_count as usize + 1,
            ))?;
        Ok(())
    }

    /// Serializes `value` as `typ` through the registry and appends it.
    pub fn add_value(
        &mut self,
        registry: &TypeRegistry,
        typ: &ColumnType,
        value: &CqlValue,
    ) -> Result<(), CqlRequestSerializationError> {
        let len_before = self.serialized_values.len();
        if let Err(err) = registry.write_value(typ, Some(value), &mut self.serialized_values) {
            self.serialized_values.truncate(len_before);
            return Err(err.into());
        }
        if let Err(err) = self.bump_count() {
            self.serialized_values.truncate(len_before);
            return Err(err);
        }
        Ok(())
    }

    pub fn add_null(&mut self) -> Result<(), CqlRequestSerializationError> {
        self.bump_count()?;
        types::write_int(-1, &mut self.serialized_values);
        Ok(())
    }

    /// Appends a `not set` marker, leaving the column untouched on the server.
    pub fn add_unset(&mut self) -> Result<(), CqlRequestSerializationError> {
        self.bump_count()?;
        types::write_int(-2, &mut self.serialized_values);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = RawValue<'_>> {
        SerializedValuesIterator {
            serialized_values: &self.serialized_values,
        }
    }

    pub fn write_to_request(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.element_count);
        buf.put(&self.serialized_values[..])
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn element_count(&self) -> u16 {
        self.element_count
    }

    pub fn buffer_size(&self) -> usize {
        self.serialized_values.len()
    }

    /// Reads values in the form [`write_to_request`](Self::write_to_request) writes them.
    pub fn new_from_frame(buf: &mut &[u8]) -> Result<Self, LowLevelDeserializationError> {
        let element_count = types::read_short(buf)?;
        let before = *buf;
        for _ in 0..element_count {
            types::read_value(buf)?;
        }
        let consumed = before.len() - buf.len();
        Ok(SerializedValues {
            serialized_values: before[..consumed].to_vec(),
            element_count,
        })
    }
}

#[derive(Clone, Copy)]
struct SerializedValuesIterator<'a> {
    serialized_values: &'a [u8],
}

impl<'a> Iterator for SerializedValuesIterator<'a> {
    type Item = RawValue<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.serialized_values.is_empty() {
            return None;
        }
        // Contents were written by SerializedValues itself.
        types::read_value(&mut self.serialized_values).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn values_keep_bind_order() {
        let registry = TypeRegistry::default();
        let mut values = SerializedValues::new();
        values
            .add_value(&registry, &ColumnType::Int, &CqlValue::Int(7))
            .unwrap();
        values.add_null().unwrap();
        values.add_unset().unwrap();
        values
            .add_value(&registry, &ColumnType::Text, &CqlValue::Text("x".to_owned()))
            .unwrap();

        assert_eq!(values.element_count(), 4);
        let raw: Vec<_> = values.iter().collect();
        assert_eq!(
            raw,
            vec![
                RawValue::Value(&[0, 0, 0, 7]),
                RawValue::Null,
                RawValue::Unset,
                RawValue::Value(b"x"),
            ]
        );

        let mut frame = Vec::new();
        values.write_to_request(&mut frame);
        assert_eq!(&frame[..2], [0, 4]);
        let read = SerializedValues::new_from_frame(&mut &frame[..]).unwrap();
        assert_eq!(read, values);
    }

    #[test]
    fn failed_value_leaves_buffer_untouched() {
        let registry = TypeRegistry::default();
        let mut values = SerializedValues::new();
        values
            .add_value(&registry, &ColumnType::Int, &CqlValue::Int(1))
            .unwrap();
        let size = values.buffer_size();

        assert_matches!(
            values.add_value(&registry, &ColumnType::Int, &CqlValue::Boolean(true)),
            Err(CqlRequestSerializationError::ValueSerialization(_))
        );
        assert_eq!(values.buffer_size(), size);
        assert_eq!(values.element_count(), 1);
    }

    #[test]
    fn empty_values() {
        assert!(SerializedValues::EMPTY.is_empty());
        let mut frame = Vec::new();
        SerializedValues::EMPTY.write_to_request(&mut frame);
        assert_eq!(frame, [0, 0]);
    }
}
