//! Responses to requests, as handed over by a connection.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use uuid::Uuid;

use crate::errors::QueryError;
use crate::frame::response::{result, NonErrorResponse, Response};

/// Results handed to callers.
pub mod query_result;

pub use query_result::{NamedRow, QueryResult, SingleRowError};

pub(crate) struct QueryResponse {
    pub(crate) response: Response,
    pub(crate) tracing_id: Option<Uuid>,
    pub(crate) warnings: Vec<String>,
    // This is not exposed to user (yet?)
    #[allow(dead_code)]
    pub(crate) custom_payload: Option<HashMap<String, Bytes>>,
}

// A QueryResponse in which response can not be Response::Error
pub(crate) struct NonErrorQueryResponse {
    pub(crate) response: NonErrorResponse,
    pub(crate) tracing_id: Option<Uuid>,
    pub(crate) warnings: Vec<String>,
}

impl QueryResponse {
    pub(crate) fn into_non_error_query_response(self) -> Result<NonErrorQueryResponse, QueryError> {
        Ok(NonErrorQueryResponse {
            response: self.response.into_non_error_response()?,
            tracing_id: self.tracing_id,
            warnings: self.warnings,
        })
    }

    pub(crate) fn into_query_result(
        self,
        request_coordinator: SocketAddr,
    ) -> Result<QueryResult, QueryError> {
        self.into_non_error_query_response()?
            .into_query_result(request_coordinator)
    }
}

impl NonErrorQueryResponse {
    pub(crate) fn into_query_result(
        self,
        request_coordinator: SocketAddr,
    ) -> Result<QueryResult, QueryError> {
        let Self {
            response,
            tracing_id,
            warnings,
        } = self;
        let rows = match response {
            NonErrorResponse::Result(result::Result::Rows(rows)) => Some(rows),
            NonErrorResponse::Result(_) => None,
            _ => {
                return Err(QueryError::ProtocolError(
                    "Unexpected server response, expected Result",
                ))
            }
        };

        Ok(QueryResult::new(
            request_coordinator,
            rows,
            tracing_id,
            warnings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::frame::response::error::DbError;
    use crate::frame::response::Error;

    fn response(response: Response) -> QueryResponse {
        QueryResponse {
            response,
            tracing_id: None,
            warnings: vec!["careful".to_owned()],
            custom_payload: None,
        }
    }

    #[test]
    fn server_error_is_passed_through() {
        let err = response(Response::Error(Error {
            error: DbError::Overloaded,
            reason: "busy".to_owned(),
        }))
        .into_query_result("127.0.0.1:9042".parse().unwrap())
        .unwrap_err();
        assert_matches!(err, QueryError::DbError(DbError::Overloaded, reason) if reason == "busy");
    }

    #[test]
    fn void_result_has_no_rows() {
        let result = response(Response::Result(result::Result::Void))
            .into_query_result("127.0.0.1:9042".parse().unwrap())
            .unwrap();
        assert!(!result.is_rows());
        assert_eq!(result.warnings().collect::<Vec<_>>(), vec!["careful"]);
    }

    #[test]
    fn non_result_response_is_a_protocol_error() {
        let err = response(Response::Ready)
            .into_query_result("127.0.0.1:9042".parse().unwrap())
            .unwrap_err();
        assert_matches!(err, QueryError::ProtocolError(_));
    }
}
