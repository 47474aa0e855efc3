//! Error types of the CouchDB record store.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while talking to CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to create CouchDB database `{database}`")]
    DatabaseCreate {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected CouchDB database response status {status} for `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// CouchDB answered `409 Conflict`: the document exists or its revision moved on.
    #[error("document conflict on `{path}`")]
    Conflict { path: String },
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to deserialize CouchDB value for `{path}`")]
    DeserializeValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("document `{path}` does not exist")]
    MissingDocument { path: String },
    /// The document exists but holds another kind of record.
    #[error("document `{path}` is not a {expected} record")]
    UnexpectedDocument {
        path: String,
        expected: &'static str,
    },
}

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::Conflict { path } => StorageError::conflict(path),
            other => {
                let message = other.to_string();
                StorageError::unavailable(message, other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_stay_conflicts() {
        let err: StorageError = CouchDaoError::Conflict {
            path: "room::r1".into(),
        }
        .into();
        assert!(err.is_conflict());

        let err: StorageError = CouchDaoError::MissingDocument {
            path: "room::r1".into(),
        }
        .into();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
