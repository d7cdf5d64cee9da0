//! Defines the [`PreparedStatement`] type, which represents a statement
//! that has been prepared in advance on the server.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use super::StatementConfig;
use crate::frame::request::query::QueryParameters;
use crate::frame::response::result::{PartitionKeyIndex, PreparedMetadata, ResultMetadata};
use crate::frame::types::{Consistency, RawValue, SerialConsistency};
use crate::frame::value::SerializedValues;
use crate::routing::partitioner::{routing_key, TokenCalculationError};
use crate::routing::{calculate_token, PartitionerName, Token};

/// Represents a statement prepared on the server.
///
/// The server parses the statement once and returns an id; executions send
/// only the id and the bound values. The server also describes the bind
/// markers, which tells the driver where the partition key components are,
/// and the columns of the rows it will return.
///
/// If a node restarts and forgets the statement, executing it answers with
/// `Unprepared` and the connection transparently prepares it again.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub(crate) config: StatementConfig,

    id: Bytes,
    statement: String,
    prepared_metadata: Arc<PreparedMetadata>,
    result_metadata: Arc<ResultMetadata>,
}

impl PreparedStatement {
    pub(crate) fn new(
        id: Bytes,
        statement: String,
        prepared_metadata: PreparedMetadata,
        result_metadata: ResultMetadata,
        config: StatementConfig,
    ) -> Self {
        Self {
            id,
            statement,
            prepared_metadata: Arc::new(prepared_metadata),
            result_metadata: Arc::new(result_metadata),
            config,
        }
    }

    /// Id assigned by the server.
    pub fn get_id(&self) -> &Bytes {
        &self.id
    }

    /// Text the statement was prepared from.
    pub fn get_statement(&self) -> &str {
        &self.statement
    }

    /// Description of the bind markers.
    pub fn get_prepared_metadata(&self) -> &PreparedMetadata {
        &self.prepared_metadata
    }

    /// Positions of the partition key components among the bind markers.
    pub fn get_variable_pk_indexes(&self) -> &[PartitionKeyIndex] {
        &self.prepared_metadata.pk_indexes
    }

    /// Columns of the rows returned by executions.
    pub fn get_result_metadata(&self) -> &Arc<ResultMetadata> {
        &self.result_metadata
    }

    /// Whether the bound values determine the partition key.
    pub fn is_token_aware(&self) -> bool {
        !self.prepared_metadata.pk_indexes.is_empty()
    }

    /// Serializes the partition key out of the bound values.
    ///
    /// Returns `None` when the server did not describe the partition key.
    pub fn compute_partition_key(
        &self,
        bound_values: &SerializedValues,
    ) -> Result<Option<Bytes>, PartitionKeyError> {
        if !self.is_token_aware() {
            return Ok(None);
        }

        let values: Vec<RawValue<'_>> = bound_values.iter().collect();
        let mut components: Vec<(u16, &[u8])> =
            Vec::with_capacity(self.prepared_metadata.pk_indexes.len());
        for pk_index in &self.prepared_metadata.pk_indexes {
            match values.get(pk_index.index as usize) {
                Some(RawValue::Value(bytes)) => components.push((pk_index.sequence, *bytes)),
                Some(_) => return Err(PartitionKeyError::NullValue(pk_index.index)),
                None => {
                    return Err(PartitionKeyError::NoPkIndexValue {
                        index: pk_index.index,
                        count: bound_values.element_count(),
                    })
                }
            }
        }
        components.sort_by_key(|(sequence, _)| *sequence);

        let components: Vec<&[u8]> = components.into_iter().map(|(_, bytes)| bytes).collect();
        Ok(Some(routing_key(&components)?))
    }

    /// Calculates the token of the partition the bound values address.
    pub fn calculate_token(
        &self,
        bound_values: &SerializedValues,
        partitioner: &PartitionerName,
    ) -> Result<Option<Token>, PartitionKeyError> {
        Ok(self
            .compute_partition_key(bound_values)?
            .map(|key| calculate_token(partitioner, &key)))
    }

    /// Sets the consistency to be used when executing this statement.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.config.consistency = Some(c);
    }

    /// Unsets the consistency overridden on this statement.
    pub fn unset_consistency(&mut self) {
        self.config.consistency = None;
    }

    /// Gets the consistency to be used when executing this prepared statement if it is filled.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.config.consistency
    }

    /// Sets the serial consistency to be used when executing this statement.
    pub fn set_serial_consistency(&mut self, sc: Option<SerialConsistency>) {
        self.config.serial_consistency = sc;
    }

    /// Gets the serial consistency of this statement.
    pub fn get_serial_consistency(&self) -> Option<SerialConsistency> {
        self.config.serial_consistency
    }

    /// Sets the page size for executions. Non-positive values disable paging.
    pub fn set_page_size(&mut self, page_size: i32) {
        self.config.page_size = (page_size > 0).then_some(page_size);
    }

    /// Gets the page size of this statement.
    pub fn get_page_size(&self) -> Option<i32> {
        self.config.page_size
    }

    /// Sets the default timestamp for this statement in microseconds.
    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.config.timestamp = timestamp;
    }

    /// Gets the default timestamp of this statement.
    pub fn get_timestamp(&self) -> Option<i64> {
        self.config.timestamp
    }

    /// Enable or disable server-side tracing for executions.
    pub fn set_tracing(&mut self, should_trace: bool) {
        self.config.tracing = should_trace;
    }

    /// Whether tracing is requested.
    pub fn get_tracing(&self) -> bool {
        self.config.tracing
    }

    // Result metadata is skipped on the wire whenever the driver already
    // knows the result columns.
    pub(crate) fn query_parameters<'a>(
        &self,
        default_consistency: Consistency,
        values: &'a SerializedValues,
    ) -> QueryParameters<'a> {
        self.config.query_parameters(
            default_consistency,
            None,
            values,
            !self.result_metadata.col_specs.is_empty(),
        )
    }
}

/// Partition key could not be built from the bound values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PartitionKeyError {
    /// A partition key component points past the bound values.
    #[error("No value with index {index} among the {count} bound values")]
    NoPkIndexValue {
        /// Index of the bound value the component refers to.
        index: u16,
        /// Number of bound values given.
        count: u16,
    },

    /// Partition key components cannot be null or unset.
    #[error("Partition key component at index {0} is null or unset")]
    NullValue(u16),

    /// The key could not be serialized for hashing.
    #[error(transparent)]
    TokenCalculation(#[from] TokenCalculationError),
}
