//! Defines the [`Statement`] type, which represents an unprepared statement.

use bytes::Bytes;

use super::StatementConfig;
use crate::frame::request::query::QueryParameters;
use crate::frame::types::{Consistency, SerialConsistency};
use crate::frame::value::SerializedValues;

/// **Unprepared** statement.
///
/// This represents a statement that can be executed on a server.
#[derive(Debug, Clone)]
pub struct Statement {
    pub(crate) config: StatementConfig,

    /// The statement text.
    pub contents: String,
    values: SerializedValues,
    paging_state: Option<Bytes>,
    routing_key: Option<Bytes>,
}

impl Statement {
    /// Creates a new [`Statement`] from a statement string.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            contents: query_text.into(),
            config: Default::default(),
            values: SerializedValues::new(),
            paging_state: None,
            routing_key: None,
        }
    }

    /// Returns self with page size set to the given value.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.set_page_size(page_size);
        self
    }

    /// Sets the page size for this statement. Non-positive values disable paging.
    pub fn set_page_size(&mut self, page_size: i32) {
        self.config.page_size = (page_size > 0).then_some(page_size);
    }

    /// Returns the page size for this statement, if paging is enabled.
    pub fn get_page_size(&self) -> Option<i32> {
        self.config.page_size
    }

    /// Asks for at most two rows.
    ///
    /// A caller expecting exactly one row can then tell a unique answer from
    /// an ambiguous one with [`QueryResult::single_row`](crate::QueryResult::single_row).
    pub fn single_row(self) -> Self {
        self.with_page_size(2)
    }

    /// Sets the consistency to be used when executing this statement.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.config.consistency = Some(c);
    }

    /// Unsets the consistency overridden on this statement.
    /// The cluster's default consistency is used instead.
    pub fn unset_consistency(&mut self) {
        self.config.consistency = None;
    }

    /// Gets the consistency to be used when executing this statement if it is filled.
    /// If this is empty, the default consistency will be used.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.config.consistency
    }

    /// Sets the serial consistency to be used when executing this statement.
    /// (Ignored unless the statement is an LWT)
    pub fn set_serial_consistency(&mut self, sc: Option<SerialConsistency>) {
        self.config.serial_consistency = sc;
    }

    /// Gets the serial consistency to be used when executing this statement.
    pub fn get_serial_consistency(&self) -> Option<SerialConsistency> {
        self.config.serial_consistency
    }

    /// Sets the default timestamp for this statement in microseconds.
    /// If not None, it will replace the server side assigned timestamp as default timestamp.
    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.config.timestamp = timestamp;
    }

    /// Gets the default timestamp for this statement in microseconds.
    pub fn get_timestamp(&self) -> Option<i64> {
        self.config.timestamp
    }

    /// Enable or disable server-side tracing for this statement.
    pub fn set_tracing(&mut self, should_trace: bool) {
        self.config.tracing = should_trace;
    }

    /// Returns whether server-side tracing is enabled for this statement.
    pub fn get_tracing(&self) -> bool {
        self.config.tracing
    }

    /// Returns self with the given bound values.
    pub fn with_values(mut self, values: SerializedValues) -> Self {
        self.values = values;
        self
    }

    /// Sets the values bound to the statement's markers.
    pub fn set_values(&mut self, values: SerializedValues) {
        self.values = values;
    }

    /// Values bound to the statement's markers.
    pub fn values(&self) -> &SerializedValues {
        &self.values
    }

    /// Resumes reading at the page following the one that returned `paging_state`.
    pub fn set_paging_state(&mut self, paging_state: Option<Bytes>) {
        self.paging_state = paging_state;
    }

    /// Paging state the next page is requested with.
    pub fn get_paging_state(&self) -> Option<&Bytes> {
        self.paging_state.as_ref()
    }

    /// Returns self with the given routing key.
    ///
    /// The routing key is the serialized partition key (see
    /// [`routing_key`](crate::routing::partitioner::routing_key)). When set,
    /// the statement is sent to the nodes owning its token first.
    pub fn with_routing_key(mut self, routing_key: impl Into<Bytes>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    /// Sets or clears the serialized partition key used to pick token owners.
    pub fn set_routing_key(&mut self, routing_key: Option<Bytes>) {
        self.routing_key = routing_key;
    }

    /// Gets the routing key, if one was set.
    pub fn get_routing_key(&self) -> Option<&Bytes> {
        self.routing_key.as_ref()
    }

    pub(crate) fn query_parameters(&self, default_consistency: Consistency) -> QueryParameters<'_> {
        self.config.query_parameters(
            default_consistency,
            self.paging_state.clone(),
            &self.values,
            false,
        )
    }
}

impl From<String> for Statement {
    fn from(s: String) -> Statement {
        Statement::new(s)
    }
}

impl<'a> From<&'a str> for Statement {
    fn from(s: &'a str) -> Statement {
        Statement::new(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_row_asks_for_two_rows() {
        let statement = Statement::new("SELECT a FROM ks.t WHERE a = 1").single_row();
        assert_eq!(statement.get_page_size(), Some(2));
        assert_eq!(
            statement.query_parameters(Consistency::One).page_size,
            Some(2)
        );
    }

    #[test]
    fn non_positive_page_size_disables_paging() {
        let mut statement = Statement::from("SELECT a FROM ks.t").with_page_size(100);
        assert_eq!(statement.get_page_size(), Some(100));
        statement.set_page_size(0);
        assert_eq!(statement.get_page_size(), None);
    }

    #[test]
    fn parameters_carry_statement_settings() {
        let mut statement = Statement::new("UPDATE ks.t SET b = 1 WHERE a = 1");
        statement.set_serial_consistency(Some(SerialConsistency::LocalSerial));
        statement.set_timestamp(Some(42));
        statement.set_paging_state(Some(Bytes::from_static(b"page")));

        let params = statement.query_parameters(Consistency::Quorum);
        assert_eq!(params.consistency, Consistency::Quorum);
        assert_eq!(params.serial_consistency, Some(SerialConsistency::LocalSerial));
        assert_eq!(params.timestamp, Some(42));
        assert_eq!(params.paging_state.as_deref(), Some(&b"page"[..]));
        assert!(!params.skip_metadata);
    }
}
