//! `RESULT` response bodies.

use crate::frame::frame_errors::{
    CqlRequestSerializationError, CqlResultParseError, LowLevelDeserializationError,
};
use crate::frame::response::event::SchemaChangeEvent;
use crate::frame::types;
use crate::registry::TypeRegistry;
use crate::value::{ColumnType, CqlValue};
use bytes::{BufMut, Bytes};
use std::result::Result as StdResult;
use std::sync::Arc;

// Result kinds
const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const KIND_PREPARED: i32 = 0x0004;
const KIND_SCHEMA_CHANGE: i32 = 0x0005;

// Metadata flags
const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const FLAG_NO_METADATA: i32 = 0x0004;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKeyspace {
    pub keyspace_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub id: Bytes,
    pub prepared_metadata: PreparedMetadata,
    pub result_metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub event: SchemaChangeEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSpec {
    pub ks_name: String,
    pub table_name: String,
}

impl TableSpec {
    pub fn new(ks_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            ks_name: ks_name.into(),
            table_name: table_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table_spec: TableSpec,
    pub name: String,
    pub typ: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, typ: ColumnType, table_spec: TableSpec) -> Self {
        Self {
            table_spec,
            name: name.into(),
            typ,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    pub col_count: usize,
    pub col_specs: Vec<ColumnSpec>,
}

impl ResultMetadata {
    pub fn new(col_specs: Vec<ColumnSpec>) -> Self {
        Self {
            col_count: col_specs.len(),
            col_specs,
        }
    }

    /// Position of the column called `name`.
    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.col_specs.iter().position(|spec| spec.name == name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PartitionKeyIndex {
    /// index in the serialized values
    pub index: u16,
    /// sequence number in partition key
    pub sequence: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedMetadata {
    pub flags: i32,
    pub col_count: usize,
    /// Sorted by `index`; `sequence` gives the partition key order.
    pub pk_indexes: Vec<PartitionKeyIndex>,
    pub col_specs: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub columns: Vec<Option<CqlValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rows {
    pub metadata: Arc<ResultMetadata>,
    /// Present when the server has more pages to send.
    pub paging_state: Option<Bytes>,
    pub rows_count: usize,
    pub rows: Vec<Row>,
    /// Original size of the serialized rows.
    pub serialized_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Result {
    Void,
    Rows(Rows),
    SetKeyspace(SetKeyspace),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

fn metadata_err(err: impl Into<LowLevelDeserializationError>) -> CqlResultParseError {
    CqlResultParseError::MetadataParseError(err.into())
}

/// Deepest nesting of collection, tuple and UDT types accepted in metadata.
pub const MAX_TYPE_NESTING: usize = 64;

fn deser_type(buf: &mut &[u8]) -> StdResult<ColumnType, CqlResultParseError> {
    deser_nested_type(buf, 0)
}

fn deser_nested_type(buf: &mut &[u8], depth: usize) -> StdResult<ColumnType, CqlResultParseError> {
    use ColumnType::*;
    if depth > MAX_TYPE_NESTING {
        return Err(CqlResultParseError::TypeNestingTooDeep(MAX_TYPE_NESTING));
    }
    let inner = |buf: &mut &[u8]| deser_nested_type(buf, depth + 1);
    let id = types::read_short(buf).map_err(metadata_err)?;
    Ok(match id {
        0x0000 => Custom(types::read_string(buf).map_err(metadata_err)?.to_owned()),
        0x0001 => Ascii,
        0x0002 => BigInt,
        0x0003 => Blob,
        0x0004 => Boolean,
        0x0005 => Counter,
        0x0006 => Decimal,
        0x0007 => Double,
        0x0008 => Float,
        0x0009 => Int,
        0x000B => Timestamp,
        0x000C => Uuid,
        0x000D => Text,
        0x000E => Varint,
        0x000F => Timeuuid,
        0x0010 => Inet,
        0x0011 => Date,
        0x0012 => Time,
        0x0013 => SmallInt,
        0x0014 => TinyInt,
        0x0020 => List(Box::new(inner(buf)?)),
        0x0021 => Map(Box::new(inner(buf)?), Box::new(inner(buf)?)),
        0x0022 => Set(Box::new(inner(buf)?)),
        0x0030 => {
            let keyspace = types::read_string(buf).map_err(metadata_err)?.to_owned();
            let type_name = types::read_string(buf).map_err(metadata_err)?.to_owned();
            let fields_size: usize = types::read_short(buf).map_err(metadata_err)?.into();

            let mut field_types = Vec::with_capacity(fields_size);
            for _ in 0..fields_size {
                let field_name = types::read_string(buf).map_err(metadata_err)?.to_owned();
                let field_type = inner(buf)?;
                field_types.push((field_name, field_type));
            }

            UserDefinedType {
                keyspace,
                type_name,
                field_types,
            }
        }
        0x0031 => {
            let len: usize = types::read_short(buf).map_err(metadata_err)?.into();
            let mut types = Vec::with_capacity(len);
            for _ in 0..len {
                types.push(inner(buf)?);
            }
            Tuple(types)
        }
        id => return Err(CqlResultParseError::UnknownColumnType(id)),
    })
}

/// Writes the [option] describing `typ` in result metadata.
pub fn serialize_type(
    typ: &ColumnType,
    buf: &mut impl BufMut,
) -> StdResult<(), std::num::TryFromIntError> {
    use ColumnType::*;
    let id: u16 = match typ {
        Custom(_) => 0x0000,
        Ascii => 0x0001,
        BigInt => 0x0002,
        Blob => 0x0003,
        Boolean => 0x0004,
        Counter => 0x0005,
        Decimal => 0x0006,
        Double => 0x0007,
        Float => 0x0008,
        Int => 0x0009,
        Timestamp => 0x000B,
        Uuid => 0x000C,
        Text => 0x000D,
        Varint => 0x000E,
        Timeuuid => 0x000F,
        Inet => 0x0010,
        Date => 0x0011,
        Time => 0x0012,
        SmallInt => 0x0013,
        TinyInt => 0x0014,
        List(_) => 0x0020,
        Map(_, _) => 0x0021,
        Set(_) => 0x0022,
        UserDefinedType { .. } => 0x0030,
        Tuple(_) => 0x0031,
    };
    types::write_short(id, buf);
    match typ {
        Custom(name) => types::write_string(name, buf)?,
        List(elem) | Set(elem) => serialize_type(elem, buf)?,
        Map(key, value) => {
            serialize_type(key, buf)?;
            serialize_type(value, buf)?;
        }
        UserDefinedType {
            keyspace,
            type_name,
            field_types,
        } => {
            types::write_string(keyspace, buf)?;
            types::write_string(type_name, buf)?;
            types::write_short_length(field_types.len(), buf)?;
            for (name, typ) in field_types {
                types::write_string(name, buf)?;
                serialize_type(typ, buf)?;
            }
        }
        Tuple(elems) => {
            types::write_short_length(elems.len(), buf)?;
            for typ in elems {
                serialize_type(typ, buf)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn deser_table_spec(buf: &mut &[u8]) -> StdResult<TableSpec, CqlResultParseError> {
    let ks_name = types::read_string(buf).map_err(metadata_err)?.to_owned();
    let table_name = types::read_string(buf).map_err(metadata_err)?.to_owned();
    Ok(TableSpec {
        ks_name,
        table_name,
    })
}

fn deser_col_specs(
    buf: &mut &[u8],
    global_table_spec: Option<TableSpec>,
    col_count: usize,
) -> StdResult<Vec<ColumnSpec>, CqlResultParseError> {
    let mut col_specs = Vec::with_capacity(col_count.min(buf.len()));
    for _ in 0..col_count {
        let table_spec = match &global_table_spec {
            Some(spec) => spec.clone(),
            None => deser_table_spec(buf)?,
        };
        let name = types::read_string(buf).map_err(metadata_err)?.to_owned();
        let typ = deser_type(buf)?;
        col_specs.push(ColumnSpec {
            table_spec,
            name,
            typ,
        });
    }
    Ok(col_specs)
}

fn deser_result_metadata(
    buf: &mut &[u8],
) -> StdResult<(Option<ResultMetadata>, Option<Bytes>), CqlResultParseError> {
    let flags = types::read_int(buf).map_err(metadata_err)?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;
    let has_more_pages = flags & FLAG_HAS_MORE_PAGES != 0;
    let no_metadata = flags & FLAG_NO_METADATA != 0;

    let col_count = types::read_int_length(buf).map_err(metadata_err)?;

    let paging_state = has_more_pages
        .then(|| types::read_bytes(buf).map(Bytes::copy_from_slice))
        .transpose()
        .map_err(metadata_err)?;

    if no_metadata {
        return Ok((None, paging_state));
    }

    let global_table_spec = global_tables_spec
        .then(|| deser_table_spec(buf))
        .transpose()?;
    let col_specs = deser_col_specs(buf, global_table_spec, col_count)?;

    Ok((
        Some(ResultMetadata {
            col_count,
            col_specs,
        }),
        paging_state,
    ))
}

fn deser_prepared_metadata(buf: &mut &[u8]) -> StdResult<PreparedMetadata, CqlResultParseError> {
    let flags = types::read_int(buf).map_err(metadata_err)?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;

    let col_count = types::read_int_length(buf).map_err(metadata_err)?;
    let pk_count = types::read_int_length(buf).map_err(metadata_err)?;

    let mut pk_indexes = Vec::with_capacity(pk_count.min(buf.len()));
    for i in 0..pk_count {
        pk_indexes.push(PartitionKeyIndex {
            index: types::read_short(buf).map_err(metadata_err)?,
            sequence: i as u16,
        });
    }
    pk_indexes.sort_unstable_by_key(|pki| pki.index);

    let global_table_spec = global_tables_spec
        .then(|| deser_table_spec(buf))
        .transpose()?;
    let col_specs = deser_col_specs(buf, global_table_spec, col_count)?;

    Ok(PreparedMetadata {
        flags,
        col_count,
        pk_indexes,
        col_specs,
    })
}

fn deser_rows(
    buf: &mut &[u8],
    registry: &TypeRegistry,
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> StdResult<Rows, CqlResultParseError> {
    let (server_metadata, paging_state) = deser_result_metadata(buf)?;

    let metadata = match (server_metadata, cached_metadata) {
        (Some(server), _) => {
            if server.col_count != server.col_specs.len() {
                return Err(CqlResultParseError::ColumnCountMismatch {
                    col_count: server.col_count,
                    col_specs_count: server.col_specs.len(),
                });
            }
            Arc::new(server)
        }
        (None, Some(cached)) => Arc::clone(cached),
        (None, None) => return Err(CqlResultParseError::MissingMetadata),
    };

    let original_size = buf.len();

    let rows_count =
        types::read_int_length(buf).map_err(CqlResultParseError::RowsParseError)?;

    let mut rows = Vec::with_capacity(rows_count.min(buf.len()));
    for _ in 0..rows_count {
        let mut columns = Vec::with_capacity(metadata.col_specs.len());
        for spec in &metadata.col_specs {
            let raw = types::read_bytes_opt(buf).map_err(CqlResultParseError::RowsParseError)?;
            let value = registry.deserialize(&spec.typ, raw).map_err(|err| {
                CqlResultParseError::ValueDeserialization {
                    column: spec.name.clone(),
                    err,
                }
            })?;
            columns.push(value);
        }
        rows.push(Row { columns });
    }

    Ok(Rows {
        metadata,
        paging_state,
        rows_count,
        rows,
        serialized_size: original_size - buf.len(),
    })
}

fn deser_prepared(buf: &mut &[u8]) -> StdResult<Prepared, CqlResultParseError> {
    let id = Bytes::copy_from_slice(
        types::read_short_bytes(buf).map_err(CqlResultParseError::PreparedParseError)?,
    );
    let prepared_metadata = deser_prepared_metadata(buf)?;
    let (result_metadata, _) = deser_result_metadata(buf)?;

    Ok(Prepared {
        id,
        prepared_metadata,
        result_metadata: result_metadata.unwrap_or_default(),
    })
}

/// Parses a RESULT body. `cached_metadata` describes the columns when the
/// request asked the server to skip metadata.
pub fn deserialize(
    buf: &mut &[u8],
    registry: &TypeRegistry,
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> StdResult<Result, CqlResultParseError> {
    use self::Result::*;
    Ok(
        match types::read_int(buf)
            .map_err(|err| CqlResultParseError::ResultIdParseError(err.into()))?
        {
            KIND_VOID => Void,
            KIND_ROWS => Rows(deser_rows(buf, registry, cached_metadata)?),
            KIND_SET_KEYSPACE => SetKeyspace(self::SetKeyspace {
                keyspace_name: types::read_string(buf)
                    .map_err(CqlResultParseError::SetKeyspaceParseError)?
                    .to_string(),
            }),
            KIND_PREPARED => Prepared(deser_prepared(buf)?),
            KIND_SCHEMA_CHANGE => SchemaChange(self::SchemaChange {
                event: SchemaChangeEvent::deserialize(buf)?,
            }),
            id => return Err(CqlResultParseError::UnknownResultId(id)),
        },
    )
}

fn serialize_metadata(
    metadata: &ResultMetadata,
    paging_state: Option<&Bytes>,
    buf: &mut Vec<u8>,
) -> StdResult<(), CqlRequestSerializationError> {
    // A global table spec is written when every column shares it.
    let global = metadata
        .col_specs
        .first()
        .map(|first| &first.table_spec)
        .filter(|first| metadata.col_specs.iter().all(|c| &c.table_spec == *first));

    let mut flags = 0;
    if global.is_some() {
        flags |= FLAG_GLOBAL_TABLES_SPEC;
    }
    if paging_state.is_some() {
        flags |= FLAG_HAS_MORE_PAGES;
    }
    types::write_int(flags, buf);
    types::write_int_length(metadata.col_specs.len(), buf)?;
    if let Some(paging_state) = paging_state {
        types::write_bytes(paging_state, buf)?;
    }
    if let Some(spec) = global {
        types::write_string(&spec.ks_name, buf)?;
        types::write_string(&spec.table_name, buf)?;
    }
    for col in &metadata.col_specs {
        if global.is_none() {
            types::write_string(&col.table_spec.ks_name, buf)?;
            types::write_string(&col.table_spec.table_name, buf)?;
        }
        types::write_string(&col.name, buf)?;
        serialize_type(&col.typ, buf)?;
    }
    Ok(())
}

impl Result {
    /// Writes the body the way a server sends it.
    pub fn serialize(
        &self,
        registry: &TypeRegistry,
        buf: &mut Vec<u8>,
    ) -> StdResult<(), CqlRequestSerializationError> {
        match self {
            Result::Void => types::write_int(KIND_VOID, buf),
            Result::Rows(rows) => {
                types::write_int(KIND_ROWS, buf);
                serialize_metadata(&rows.metadata, rows.paging_state.as_ref(), buf)?;
                types::write_int_length(rows.rows.len(), buf)?;
                for row in &rows.rows {
                    for (spec, value) in rows.metadata.col_specs.iter().zip(&row.columns) {
                        registry.write_value(&spec.typ, value.as_ref(), buf)?;
                    }
                }
            }
            Result::SetKeyspace(set) => {
                types::write_int(KIND_SET_KEYSPACE, buf);
                types::write_string(&set.keyspace_name, buf)?;
            }
            Result::Prepared(prepared) => {
                types::write_int(KIND_PREPARED, buf);
                types::write_short_bytes(&prepared.id, buf)?;
                let meta = &prepared.prepared_metadata;
                types::write_int(0, buf);
                types::write_int_length(meta.col_specs.len(), buf)?;
                types::write_int_length(meta.pk_indexes.len(), buf)?;
                let mut by_sequence = meta.pk_indexes.clone();
                by_sequence.sort_unstable_by_key(|pki| pki.sequence);
                for pki in by_sequence {
                    types::write_short(pki.index, buf);
                }
                for col in &meta.col_specs {
                    types::write_string(&col.table_spec.ks_name, buf)?;
                    types::write_string(&col.table_spec.table_name, buf)?;
                    types::write_string(&col.name, buf)?;
                    serialize_type(&col.typ, buf)?;
                }
                serialize_metadata(&prepared.result_metadata, None, buf)?;
            }
            Result::SchemaChange(change) => {
                types::write_int(KIND_SCHEMA_CHANGE, buf);
                change.event.serialize(buf)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::response::event::SchemaChangeType;
    use assert_matches::assert_matches;

    fn nested_lists(depth: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for _ in 0..depth {
            buf.extend_from_slice(&0x0020u16.to_be_bytes());
        }
        buf.extend_from_slice(&0x0009u16.to_be_bytes());
        buf
    }

    #[test]
    fn type_nesting_is_bounded() {
        let deepest = nested_lists(MAX_TYPE_NESTING);
        let mut typ = deser_type(&mut &deepest[..]).unwrap();
        let mut lists = 0;
        while let ColumnType::List(elem) = typ {
            typ = *elem;
            lists += 1;
        }
        assert_eq!(lists, MAX_TYPE_NESTING);
        assert_eq!(typ, ColumnType::Int);

        let too_deep = nested_lists(MAX_TYPE_NESTING + 1);
        assert_matches!(
            deser_type(&mut &too_deep[..]),
            Err(CqlResultParseError::TypeNestingTooDeep(MAX_TYPE_NESTING))
        );

        // A hostile server can announce far more levels than a stack holds.
        let hostile = nested_lists(100_000);
        assert_matches!(
            deser_type(&mut &hostile[..]),
            Err(CqlResultParseError::TypeNestingTooDeep(_))
        );

        // Tuples and maps nest the same way.
        let mut tuples = Vec::new();
        for _ in 0..=MAX_TYPE_NESTING {
            tuples.extend_from_slice(&0x0031u16.to_be_bytes());
            tuples.extend_from_slice(&1u16.to_be_bytes());
        }
        tuples.extend_from_slice(&0x0009u16.to_be_bytes());
        assert_matches!(
            deser_type(&mut &tuples[..]),
            Err(CqlResultParseError::TypeNestingTooDeep(_))
        );
    }

    fn peers_metadata() -> ResultMetadata {
        let spec = TableSpec::new("system", "peers");
        ResultMetadata::new(vec![
            ColumnSpec::new("peer", ColumnType::Inet, spec.clone()),
            ColumnSpec::new("data_center", ColumnType::Text, spec.clone()),
            ColumnSpec::new("tokens", ColumnType::Set(Box::new(ColumnType::Text)), spec),
        ])
    }

    fn roundtrip(result: &Result) -> Result {
        let registry = TypeRegistry::default();
        let mut buf = Vec::new();
        result.serialize(&registry, &mut buf).unwrap();
        let mut slice = &buf[..];
        let parsed = deserialize(&mut slice, &registry, None).unwrap();
        assert!(slice.is_empty());
        parsed
    }

    #[test]
    fn rows_with_values_and_nulls() {
        let rows = Result::Rows(Rows {
            metadata: Arc::new(peers_metadata()),
            paging_state: Some(Bytes::from_static(b"next")),
            rows_count: 2,
            rows: vec![
                Row {
                    columns: vec![
                        Some(CqlValue::Inet("10.0.0.2".parse().unwrap())),
                        Some(CqlValue::Text("dc1".to_owned())),
                        Some(CqlValue::Set(vec![CqlValue::Text("42".to_owned())])),
                    ],
                },
                Row {
                    columns: vec![Some(CqlValue::Inet("10.0.0.3".parse().unwrap())), None, None],
                },
            ],
            serialized_size: 0,
        });

        let Result::Rows(parsed) = roundtrip(&rows) else {
            panic!("expected rows");
        };
        let Result::Rows(original) = rows else {
            unreachable!()
        };
        assert_eq!(parsed.metadata, original.metadata);
        assert_eq!(parsed.paging_state, original.paging_state);
        assert_eq!(parsed.rows, original.rows);
        assert_eq!(parsed.rows_count, 2);
        assert!(parsed.serialized_size > 0);
        assert_eq!(parsed.metadata.col_index("data_center"), Some(1));
    }

    #[test]
    fn nested_types_in_metadata() {
        let spec = TableSpec::new("ks", "t");
        let udt = ColumnType::UserDefinedType {
            keyspace: "ks".to_owned(),
            type_name: "address".to_owned(),
            field_types: vec![
                ("street".to_owned(), ColumnType::Text),
                ("no".to_owned(), ColumnType::Int),
            ],
        };
        let metadata = ResultMetadata::new(vec![
            ColumnSpec::new(
                "m",
                ColumnType::Map(
                    Box::new(ColumnType::Text),
                    Box::new(ColumnType::List(Box::new(ColumnType::BigInt))),
                ),
                spec.clone(),
            ),
            ColumnSpec::new(
                "t",
                ColumnType::Tuple(vec![ColumnType::Uuid, udt]),
                spec.clone(),
            ),
            ColumnSpec::new(
                "c",
                ColumnType::Custom("org.apache.cassandra.db.marshal.DurationType".to_owned()),
                TableSpec::new("other", "table"),
            ),
        ]);
        let rows = Result::Rows(Rows {
            metadata: Arc::new(metadata.clone()),
            paging_state: None,
            rows_count: 0,
            rows: vec![],
            serialized_size: 0,
        });
        assert_matches!(roundtrip(&rows), Result::Rows(r) if *r.metadata == metadata);
    }

    #[test]
    fn skipped_metadata_uses_cached() {
        let registry = TypeRegistry::default();
        let mut buf = Vec::new();
        types::write_int(KIND_ROWS, &mut buf);
        types::write_int(FLAG_NO_METADATA, &mut buf);
        types::write_int(1, &mut buf);
        types::write_int(1, &mut buf);
        registry
            .write_value(&ColumnType::Int, Some(&CqlValue::Int(5)), &mut buf)
            .unwrap();

        assert_matches!(
            deserialize(&mut &buf[..], &registry, None),
            Err(CqlResultParseError::MissingMetadata)
        );

        let cached = Arc::new(ResultMetadata::new(vec![ColumnSpec::new(
            "v",
            ColumnType::Int,
            TableSpec::new("ks", "t"),
        )]));
        let result = deserialize(&mut &buf[..], &registry, Some(&cached)).unwrap();
        assert_matches!(result, Result::Rows(rows) if rows.rows[0].columns == [Some(CqlValue::Int(5))]);
    }

    #[test]
    fn bad_cells_name_their_column() {
        let registry = TypeRegistry::default();
        let mut buf = Vec::new();
        types::write_int(KIND_ROWS, &mut buf);
        serialize_metadata(
            &ResultMetadata::new(vec![ColumnSpec::new(
                "v",
                ColumnType::Int,
                TableSpec::new("ks", "t"),
            )]),
            None,
            &mut buf,
        )
        .unwrap();
        types::write_int(1, &mut buf);
        types::write_bytes(&[1, 2, 3], &mut buf).unwrap();

        assert_matches!(
            deserialize(&mut &buf[..], &registry, None),
            Err(CqlResultParseError::ValueDeserialization { column, .. }) if column == "v"
        );
    }

    #[test]
    fn prepared_void_keyspace_and_schema_change() {
        let prepared = Result::Prepared(Prepared {
            id: Bytes::from_static(&[0xde, 0xad]),
            prepared_metadata: PreparedMetadata {
                flags: 0,
                col_count: 2,
                pk_indexes: vec![
                    PartitionKeyIndex {
                        index: 0,
                        sequence: 1,
                    },
                    PartitionKeyIndex {
                        index: 1,
                        sequence: 0,
                    },
                ],
                col_specs: vec![
                    ColumnSpec::new("a", ColumnType::Int, TableSpec::new("ks", "t")),
                    ColumnSpec::new("b", ColumnType::Text, TableSpec::new("ks", "t")),
                ],
            },
            result_metadata: ResultMetadata::default(),
        });
        assert_eq!(roundtrip(&prepared), prepared);
        assert_eq!(roundtrip(&Result::Void), Result::Void);

        let set = Result::SetKeyspace(SetKeyspace {
            keyspace_name: "ks".to_owned(),
        });
        assert_eq!(roundtrip(&set), set);

        let change = Result::SchemaChange(SchemaChange {
            event: SchemaChangeEvent::TableChange {
                change_type: SchemaChangeType::Updated,
                keyspace_name: "ks".to_owned(),
                object_name: "t".to_owned(),
            },
        });
        assert_eq!(roundtrip(&change), change);
    }

    #[test]
    fn unknown_kinds_and_types() {
        let registry = TypeRegistry::default();
        assert_matches!(
            deserialize(&mut &9_i32.to_be_bytes()[..], &registry, None),
            Err(CqlResultParseError::UnknownResultId(9))
        );

        let mut buf = Vec::new();
        types::write_int(KIND_ROWS, &mut buf);
        types::write_int(FLAG_GLOBAL_TABLES_SPEC, &mut buf);
        types::write_int(1, &mut buf);
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("t", &mut buf).unwrap();
        types::write_string("d", &mut buf).unwrap();
        types::write_short(0x0015, &mut buf);
        assert_matches!(
            deserialize(&mut &buf[..], &registry, None),
            Err(CqlResultParseError::UnknownColumnType(0x0015))
        );
    }
}
