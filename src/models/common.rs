use crate::error::{BillingError, Result};

/// Outcome of a cache-backed query.
///
/// `Loading` means another fetch of the same resource is in flight; the
/// caller is expected to re-invoke later rather than wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult<T> {
    Loading,
    Success(T),
    Error(BillingError),
}

impl<T> QueryResult<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryResult::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryResult::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            QueryResult::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&BillingError> {
        match self {
            QueryResult::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> QueryResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            QueryResult::Loading => QueryResult::Loading,
            QueryResult::Success(data) => QueryResult::Success(f(data)),
            QueryResult::Error(err) => QueryResult::Error(err),
        }
    }
}

impl<T> From<Result<T>> for QueryResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => QueryResult::Success(data),
            Err(err) => QueryResult::Error(err),
        }
    }
}
