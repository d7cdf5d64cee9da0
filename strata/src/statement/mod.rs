//! Statements that can be sent to the cluster.
//!
//! - [`Statement`] carries its text and is parsed by the server on every execution,
//! - [`PreparedStatement`] is the result of [`Cluster::prepare`](crate::Cluster::prepare),
//!   executed by id with only its bound values on the wire.

use std::borrow::Cow;

use bytes::Bytes;

use crate::frame::request::query::QueryParameters;
use crate::frame::value::SerializedValues;

pub mod prepared;
pub mod unprepared;

pub use crate::frame::types::{Consistency, SerialConsistency};
pub use prepared::{PartitionKeyError, PreparedStatement};
pub use unprepared::Statement;

#[derive(Debug, Clone, Default)]
pub(crate) struct StatementConfig {
    pub(crate) consistency: Option<Consistency>,
    pub(crate) serial_consistency: Option<SerialConsistency>,
    pub(crate) page_size: Option<i32>,
    pub(crate) timestamp: Option<i64>,
    pub(crate) tracing: bool,
}

impl StatementConfig {
    /// Determines the consistency of a query
    #[must_use]
    pub(crate) fn determine_consistency(&self, default_consistency: Consistency) -> Consistency {
        self.consistency.unwrap_or(default_consistency)
    }

    pub(crate) fn query_parameters<'a>(
        &self,
        default_consistency: Consistency,
        paging_state: Option<Bytes>,
        values: &'a SerializedValues,
        skip_metadata: bool,
    ) -> QueryParameters<'a> {
        QueryParameters {
            consistency: self.determine_consistency(default_consistency),
            serial_consistency: self.serial_consistency,
            timestamp: self.timestamp,
            page_size: self.page_size,
            paging_state,
            skip_metadata,
            values: Cow::Borrowed(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_consistency_wins_over_default() {
        let mut config = StatementConfig::default();
        assert_eq!(
            config.determine_consistency(Consistency::LocalQuorum),
            Consistency::LocalQuorum
        );

        config.consistency = Some(Consistency::One);
        let params = config.query_parameters(
            Consistency::LocalQuorum,
            None,
            SerializedValues::EMPTY,
            false,
        );
        assert_eq!(params.consistency, Consistency::One);
        assert_eq!(params.page_size, None);
        assert!(params.values.is_empty());
    }
}
