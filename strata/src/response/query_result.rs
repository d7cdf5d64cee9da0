use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::frame::response::result::{ColumnSpec, ResultMetadata, Row, Rows};
use crate::value::CqlValue;

/// Result of a single request to the database. It represents any kind of Result frame.
///
/// Rows are present if the frame is of Result:Rows kind.
///
/// NOTE: this is a result of a single request. If you use paging for your query,
/// this will contain exactly one page; pass [`QueryResult::paging_state`] to
/// [`Statement::set_paging_state`](crate::Statement::set_paging_state) to fetch the next one.
#[derive(Debug, Clone)]
pub struct QueryResult {
    request_coordinator: SocketAddr,
    rows: Option<Rows>,
    tracing_id: Option<Uuid>,
    warnings: Vec<String>,
}

impl QueryResult {
    pub(crate) fn new(
        request_coordinator: SocketAddr,
        rows: Option<Rows>,
        tracing_id: Option<Uuid>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            request_coordinator,
            rows,
            tracing_id,
            warnings,
        }
    }

    /// Address of the node that served the request.
    #[inline]
    pub fn request_coordinator(&self) -> SocketAddr {
        self.request_coordinator
    }

    /// Warnings emitted by the database.
    #[inline]
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }

    /// Tracing ID associated with this request.
    #[inline]
    pub fn tracing_id(&self) -> Option<Uuid> {
        self.tracing_id
    }

    /// Returns a bool indicating the current response is of Rows type.
    #[inline]
    pub fn is_rows(&self) -> bool {
        self.rows.is_some()
    }

    /// Received rows, if the response is of Rows type.
    pub fn rows(&self) -> Option<&[Row]> {
        self.rows.as_ref().map(|rows| rows.rows.as_slice())
    }

    /// Consumes the result, returning its rows if the response is of Rows type.
    pub fn into_rows(self) -> Option<Vec<Row>> {
        self.rows.map(|rows| rows.rows)
    }

    /// Number of received rows; zero for results of other kinds.
    pub fn rows_num(&self) -> usize {
        self.rows.as_ref().map_or(0, |rows| rows.rows.len())
    }

    /// Columns of the received rows.
    pub fn column_specs(&self) -> &[ColumnSpec] {
        self.rows
            .as_ref()
            .map_or(&[], |rows| rows.metadata.col_specs.as_slice())
    }

    pub(crate) fn metadata(&self) -> Option<&Arc<ResultMetadata>> {
        self.rows.as_ref().map(|rows| &rows.metadata)
    }

    /// Present when the server has more pages to send.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.rows.as_ref().and_then(|rows| rows.paging_state.as_ref())
    }

    /// Iterates over the received rows, giving access to columns by name.
    pub fn rows_iter(&self) -> impl Iterator<Item = NamedRow<'_>> {
        let metadata = self.metadata();
        self.rows()
            .unwrap_or_default()
            .iter()
            .filter_map(move |row| {
                metadata.map(|metadata| NamedRow {
                    metadata: metadata.as_ref(),
                    row,
                })
            })
    }

    /// Returns the first received row, if any.
    pub fn first_row(&self) -> Result<Option<NamedRow<'_>>, SingleRowError> {
        if !self.is_rows() {
            return Err(SingleRowError::NotRows);
        }
        Ok(self.rows_iter().next())
    }

    /// Returns the only received row.
    ///
    /// Fails if the result is anything else than a single row. Combined
    /// with [`Statement::single_row`](crate::Statement::single_row), this
    /// tells a unique answer from an ambiguous one.
    pub fn single_row(&self) -> Result<NamedRow<'_>, SingleRowError> {
        if !self.is_rows() {
            return Err(SingleRowError::NotRows);
        }
        let mut rows = self.rows_iter();
        match (rows.next(), self.rows_num()) {
            (Some(row), 1) => Ok(row),
            (None, _) => Err(SingleRowError::NoRows),
            (Some(_), count) => Err(SingleRowError::MoreThanOneRow(count)),
        }
    }
}

/// A row together with the metadata naming its columns.
#[derive(Debug, Clone, Copy)]
pub struct NamedRow<'a> {
    metadata: &'a ResultMetadata,
    row: &'a Row,
}

impl<'a> NamedRow<'a> {
    /// Value of the column called `name`. `None` both when the column is
    /// missing and when its value is null; see [`NamedRow::has_column`].
    pub fn get(&self, name: &str) -> Option<&'a CqlValue> {
        let index = self.metadata.col_index(name)?;
        self.get_by_index(index)
    }

    /// Value of the column at `index`.
    pub fn get_by_index(&self, index: usize) -> Option<&'a CqlValue> {
        self.row.columns.get(index).and_then(Option::as_ref)
    }

    /// Whether the result has a column called `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.metadata.col_index(name).is_some()
    }

    /// All values of the row, in column order.
    pub fn columns(&self) -> &'a [Option<CqlValue>] {
        &self.row.columns
    }
}

/// An error returned by [`QueryResult::single_row`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SingleRowError {
    /// Result is not of Rows kind
    #[error("Result is not of Rows kind")]
    NotRows,

    /// The request response was of Rows type, but no rows were returned
    #[error("Expected a single row, but got none")]
    NoRows,

    /// More than one row came back.
    #[error("Expected a single row, but got {0} rows")]
    MoreThanOneRow(usize),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::frame::response::result::TableSpec;
    use crate::value::ColumnType;

    fn rows(values: &[i32]) -> Rows {
        let table = TableSpec::new("ks", "t");
        let metadata = Arc::new(ResultMetadata::new(vec![
            ColumnSpec::new("a", ColumnType::Int, table.clone()),
            ColumnSpec::new("b", ColumnType::Text, table),
        ]));
        let rows: Vec<Row> = values
            .iter()
            .map(|v| Row {
                columns: vec![Some(CqlValue::Int(*v)), None],
            })
            .collect();
        Rows {
            metadata,
            paging_state: None,
            rows_count: rows.len(),
            rows,
            serialized_size: 0,
        }
    }

    fn result(rows: Option<Rows>) -> QueryResult {
        QueryResult::new("127.0.0.1:9042".parse().unwrap(), rows, None, vec![])
    }

    #[test]
    fn single_row_distinguishes_counts() {
        let one = result(Some(rows(&[1])));
        let row = one.single_row().unwrap();
        assert_eq!(row.get("a"), Some(&CqlValue::Int(1)));
        assert_eq!(row.get("b"), None);
        assert!(row.has_column("b"));
        assert!(!row.has_column("c"));

        assert_matches!(
            result(Some(rows(&[]))).single_row(),
            Err(SingleRowError::NoRows)
        );
        assert_matches!(
            result(Some(rows(&[1, 2]))).single_row(),
            Err(SingleRowError::MoreThanOneRow(2))
        );
        assert_matches!(result(None).single_row(), Err(SingleRowError::NotRows));
    }

    #[test]
    fn rows_by_name() {
        let res = result(Some(rows(&[3, 4, 5])));
        let values: Vec<i32> = res
            .rows_iter()
            .filter_map(|row| row.get("a").and_then(CqlValue::as_int))
            .collect();
        assert_eq!(values, vec![3, 4, 5]);
        assert_eq!(res.rows_num(), 3);
        assert_eq!(res.column_specs().len(), 2);
        assert_eq!(res.first_row().unwrap().unwrap().get_by_index(0), Some(&CqlValue::Int(3)));
    }
}
