//! Error types for the order cache service

use std::future::Future;
use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the order cache service
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Request did not carry a usable order identifier
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Inbound record could not be decoded into an order
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// Order is absent from both cache and store
    #[error("Order not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Store / Stream Errors
    // =========================================================================
    /// Store gateway call failed
    #[error("Store error: {0}")]
    TransientStore(String),

    /// A store or stream call exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// PostgreSQL error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Kafka client error
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures that may succeed on a later attempt.
    ///
    /// Ingestion leaves such records unacknowledged so the stream redelivers them.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientStore(_) | Error::Timeout { .. } | Error::Pool(_) | Error::Io(_) => true,
            // Data exceptions (22) and constraint violations (23) repeat on every attempt
            Error::Postgres(e) => e
                .code()
                .map_or(true, |state| !matches!(state.code().get(..2), Some("22" | "23"))),
            #[cfg(feature = "kafka")]
            Error::Kafka(_) => true,
            _ => false,
        }
    }

    /// HTTP status reported to lookup callers.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Run `fut` with a deadline, mapping an elapsed deadline to [`Error::Timeout`].
pub async fn within<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation,
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientStore("db down".into()).is_transient());
        assert!(Error::Timeout {
            operation: "fetch",
            after: Duration::from_secs(5)
        }
        .is_transient());

        assert!(!Error::Malformed("bad json".into()).is_transient());
        assert!(!Error::NotFound("A1".into()).is_transient());
        assert!(!Error::BadRequest("empty id".into()).is_transient());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::TransientStore("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_times_out() {
        let result: Result<()> = within(Duration::from_millis(50), "slow call", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        assert_matches!(
            result,
            Err(Error::Timeout {
                operation: "slow call",
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_within_passes_result_through() {
        let ok = within(Duration::from_secs(1), "fast", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<()> = within(Duration::from_secs(1), "fast", async {
            Err(Error::NotFound("A1".into()))
        })
        .await;
        assert_matches!(err, Err(Error::NotFound(_)));
    }
}
