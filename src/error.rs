//! Error types for orchestration operations.

use thiserror::Error;

/// Boxed error used as the source of wrapped failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error raised by a consumer handler
///
/// Handlers return any error they like; it is carried verbatim in the
/// [`FailedMessage`](crate::FailedMessage) broadcast after the negative acknowledgement.
pub type HandlerError = BoxError;

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error types for orchestration operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Requested cluster is not configured, or configuration is invalid
    ///
    /// Fails fast at startup and is never retryable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Conflicting or invalid authentication/TLS settings, or the broker client could not be built
    #[error("Client init error: {message}")]
    ClientInit {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A declared producer could not be created
    #[error("Producer init error: {message}")]
    ProducerInit {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A declared consumer could not be built or subscribed
    #[error("Consumer init error: {message}")]
    ConsumerInit {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Broker client-level failure (send, ack, subscribe, close)
    #[error("Client error: {message}")]
    Client {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Danube client error
    #[error("Danube error: {0}")]
    Danube(#[from] danube_client::errors::DanubeError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A reactive stream could not accept an emitted item
    #[error("Emission error: {0}")]
    Emission(String),

    /// One or more broker clients failed to close
    #[error(transparent)]
    Close(#[from] CloseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Check if this error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, OrchestratorError::Configuration(_))
    }

    /// Check if this error happened while building a broker client
    pub fn is_client_init(&self) -> bool {
        matches!(self, OrchestratorError::ClientInit { .. })
    }

    /// Check if this error happened while creating a producer
    pub fn is_producer_init(&self) -> bool {
        matches!(self, OrchestratorError::ProducerInit { .. })
    }

    /// Check if this error happened while building or subscribing a consumer
    pub fn is_consumer_init(&self) -> bool {
        matches!(self, OrchestratorError::ConsumerInit { .. })
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        OrchestratorError::Configuration(message.into())
    }

    /// Error for a cluster name that has no configuration
    pub fn cluster_not_configured(cluster: &str) -> Self {
        OrchestratorError::Configuration(format!("cluster [{}] is not configured", cluster))
    }

    /// Create a client init error from a message
    pub fn client_init(message: impl Into<String>) -> Self {
        OrchestratorError::ClientInit {
            message: message.into(),
            source: None,
        }
    }

    /// Create a client init error with source
    pub fn client_init_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OrchestratorError::ClientInit {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a producer init error with source
    pub fn producer_init_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OrchestratorError::ProducerInit {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a consumer init error from a message
    pub fn consumer_init(message: impl Into<String>) -> Self {
        OrchestratorError::ConsumerInit {
            message: message.into(),
            source: None,
        }
    }

    /// Create a consumer init error with source
    pub fn consumer_init_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OrchestratorError::ConsumerInit {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a broker client error from a message
    pub fn client(message: impl Into<String>) -> Self {
        OrchestratorError::Client {
            message: message.into(),
            source: None,
        }
    }

    /// Create a broker client error with source
    pub fn client_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OrchestratorError::Client {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

/// Aggregate of every broker client that failed to close
///
/// Each failure keeps the name of the cluster whose client raised it.
#[derive(Error, Debug)]
#[error("Errors occurred while closing {} broker client(s)", .failures.len())]
pub struct CloseError {
    failures: Vec<(String, OrchestratorError)>,
}

impl CloseError {
    pub(crate) fn new(failures: Vec<(String, OrchestratorError)>) -> Self {
        Self { failures }
    }

    /// The individual close failures, keyed by cluster name
    pub fn causes(&self) -> &[(String, OrchestratorError)] {
        &self.failures
    }

    /// Names of the clusters whose client failed to close
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(cluster, _)| cluster.as_str())
    }
}
