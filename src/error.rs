use std::future::Future;

use uuid::Uuid;

/// Boxed error raised by a persistence collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for the data access layer.
///
/// Callers of a unit of work only ever see this type: failures raised by the
/// underlying session or transaction are carried in [`DalError::Persistence`].
#[derive(Debug, thiserror::Error)]
pub enum DalError {
    #[error("Session is not open. Open a unit of work through the UnitOfWorkFactory before using the data layer.")]
    SessionNotOpen,

    #[error("The current session is still open. Close it through UnitOfWork::commit() or by disposing the unit of work first.")]
    SessionAlreadyOpen,

    #[error("Commit was already called for this unit of work. Open a new one through the UnitOfWorkFactory.")]
    AlreadyCommitted,

    #[error("Unit of work {0} has already been disposed")]
    Disposed(Uuid),

    #[error("Ambient transaction {0} is no longer active")]
    TransactionNotActive(Uuid),

    #[error("Ambient transaction {0} was aborted")]
    TransactionAborted(Uuid),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: BoxError,
    },
}

/// Result type for data access operations
pub type DalResult<T> = Result<T, DalError>;

impl DalError {
    /// Whether this error came from the persistence layer rather than from a
    /// lifecycle contract violation.
    pub fn is_persistence(&self) -> bool {
        matches!(self, DalError::Persistence { .. })
    }
}

/// Translates arbitrary session failures into [`DalError`].
pub struct ExceptionTranslator;

impl ExceptionTranslator {
    /// Wraps a failure into [`DalError::Persistence`], keeping it as the source.
    ///
    /// A failure that already is a `DalError` is returned as is.
    pub fn wrap<E>(error: E) -> DalError
    where
        E: Into<BoxError>,
    {
        let boxed: BoxError = error.into();
        match boxed.downcast::<DalError>() {
            Ok(dal) => *dal,
            Err(source) => DalError::Persistence {
                message: source.to_string(),
                source,
            },
        }
    }

    /// Runs `call` and translates its failure.
    pub fn wrap_call<T, E, F>(call: F) -> DalResult<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<BoxError>,
    {
        call().map_err(Self::wrap)
    }

    /// Awaits `future` and translates its failure.
    pub async fn wrap_future<T, E, Fut>(future: Fut) -> DalResult<T>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        future.await.map_err(Self::wrap)
    }
}
