//! Configuration management for broker clusters.

use crate::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Name of the cluster used when a declaration does not name one
pub const DEFAULT_CLUSTER: &str = "default";

/// Main configuration for the orchestrator
///
/// # Structure
/// - `clusters`: one [`ClusterProperties`] per named broker deployment
/// - `properties`: values available to `${...}` placeholders in declarations
/// - `runtime`: logging and failure channel settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Cluster name -> connection properties
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterProperties>,

    /// Placeholder values (optional, environment variables are consulted as a fallback)
    #[serde(default)]
    pub properties: HashMap<String, String>,

    /// Runtime settings (optional, from config file or defaults)
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl OrchestratorConfig {
    /// Build a single-cluster configuration from environment variables
    ///
    /// Reads `DANUBE_SERVICE_URL` (required) into the `default` cluster.
    pub fn from_env() -> OrchestratorResult<Self> {
        let service_url = env::var("DANUBE_SERVICE_URL")
            .map_err(|_| OrchestratorError::config("DANUBE_SERVICE_URL is required"))?;

        let mut clusters = BTreeMap::new();
        clusters.insert(
            DEFAULT_CLUSTER.to_string(),
            ClusterProperties::new(service_url),
        );

        Ok(Self {
            clusters,
            properties: HashMap::new(),
            runtime: RuntimeSettings::default(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> OrchestratorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        Self::from_toml_str(&content).map_err(|e| {
            OrchestratorError::config(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Parse configuration from TOML text
    ///
    /// Cluster entries are bound one at a time. An entry that does not bind to
    /// [`ClusterProperties`] is skipped with a warning instead of failing the whole file.
    pub fn from_toml_str(content: &str) -> OrchestratorResult<Self> {
        let mut table: toml::Table =
            toml::from_str(content).map_err(|e| OrchestratorError::config(e.to_string()))?;

        let raw_clusters = table.remove("clusters");
        let mut config: OrchestratorConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| OrchestratorError::config(e.to_string()))?;

        match raw_clusters {
            Some(toml::Value::Table(entries)) => {
                for (name, value) in entries {
                    match value.try_into::<ClusterProperties>() {
                        Ok(properties) => {
                            config.clusters.insert(name, properties);
                        }
                        Err(e) => {
                            warn!("Ignoring cluster [{}]: {}", name, e);
                        }
                    }
                }
            }
            Some(_) => warn!("Ignoring `clusters`: expected a table of cluster entries"),
            None => {}
        }

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Only `DANUBE_SERVICE_URL` is honoured; it replaces the endpoint of the
    /// `default` cluster, creating that cluster if needed.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DANUBE_SERVICE_URL") {
            self.clusters
                .entry(DEFAULT_CLUSTER.to_string())
                .or_default()
                .service_url = val;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> OrchestratorResult<()> {
        for (name, cluster) in &self.clusters {
            if name.trim().is_empty() {
                return Err(OrchestratorError::config("cluster name cannot be empty"));
            }
            cluster
                .validate()
                .map_err(|e| OrchestratorError::config(format!("cluster [{}]: {}", name, e)))?;
        }

        if self.runtime.failure_buffer == 0 {
            return Err(OrchestratorError::config("failure_buffer must be > 0"));
        }

        Ok(())
    }
}

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Capacity of the delivery failure broadcast
    #[serde(default = "default_failure_buffer")]
    pub failure_buffer: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_failure_buffer() -> usize {
    256
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            failure_buffer: default_failure_buffer(),
        }
    }
}

/// Connection properties of one named cluster
///
/// Immutable once bound; the orchestrator only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterProperties {
    /// Broker service URL
    pub service_url: String,
    pub io_threads: u32,
    /// Size of the delivery pool shared by every consumer of this cluster
    pub listener_threads: u32,
    pub enable_tcp_no_delay: bool,
    pub keep_alive_interval_sec: u64,
    pub connection_timeout_sec: u64,
    pub operation_timeout_sec: u64,
    pub starting_backoff_interval_ms: u64,
    pub max_backoff_interval_sec: u64,
    /// Inserted between the generated name prefix and the declaration id
    pub consumer_name_delimiter: String,
    /// Namespace used for topics that are not fully qualified
    pub namespace: String,
    pub tenant: Option<String>,
    pub tls: TlsSettings,
    pub auth: AuthSettings,
    /// Subscribe declared consumers of this cluster at startup
    pub auto_start: bool,
    /// Attach the shared interceptors to producers and consumers of this cluster
    pub allow_interceptor: bool,
    pub listener_name: Option<String>,
    pub consumer: ConsumerDefaults,
}

impl ClusterProperties {
    /// Properties with every default and the given service URL
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            ..Self::default()
        }
    }

    /// Set token authentication
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth.token = Some(token.into());
        self
    }

    /// Enable or disable startup subscription for this cluster
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Enable or disable the shared interceptors for this cluster
    pub fn with_interceptors(mut self, allow: bool) -> Self {
        self.allow_interceptor = allow;
        self
    }

    /// Replace the consumer defaults
    pub fn with_consumer_defaults(mut self, consumer: ConsumerDefaults) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_sec)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_sec)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_sec)
    }

    pub fn starting_backoff_interval(&self) -> Duration {
        Duration::from_millis(self.starting_backoff_interval_ms)
    }

    pub fn max_backoff_interval(&self) -> Duration {
        Duration::from_secs(self.max_backoff_interval_sec)
    }

    fn validate(&self) -> OrchestratorResult<()> {
        if self.service_url.is_empty() {
            return Err(OrchestratorError::config("service_url cannot be empty"));
        }

        if self.io_threads == 0 || self.listener_threads == 0 {
            return Err(OrchestratorError::config(
                "io_threads and listener_threads must be > 0",
            ));
        }

        Ok(())
    }
}

impl Default for ClusterProperties {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:6650".to_string(),
            io_threads: 10,
            listener_threads: 10,
            enable_tcp_no_delay: false,
            keep_alive_interval_sec: 20,
            connection_timeout_sec: 10,
            operation_timeout_sec: 15,
            starting_backoff_interval_ms: 100,
            max_backoff_interval_sec: 10,
            consumer_name_delimiter: String::new(),
            namespace: "default".to_string(),
            tenant: None,
            tls: TlsSettings::default(),
            auth: AuthSettings::default(),
            auto_start: true,
            allow_interceptor: false,
            listener_name: None,
            consumer: ConsumerDefaults::default(),
        }
    }
}

/// TLS settings of a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub trust_certs_file_path: Option<String>,
    pub trust_store_path: Option<String>,
    pub trust_store_type: Option<String>,
    pub trust_store_password: Option<String>,
    pub ciphers: HashSet<String>,
    pub protocols: HashSet<String>,
    pub use_key_store_tls: bool,
    pub allow_insecure_connection: bool,
    pub enable_hostname_verification: bool,
}

impl TlsSettings {
    /// True when any trust material or allow-list is configured
    pub fn is_configured(&self) -> bool {
        self.trust_certs_file_path.is_some()
            || self.trust_store_path.is_some()
            || self.use_key_store_tls
            || !self.ciphers.is_empty()
            || !self.protocols.is_empty()
    }
}

/// Raw authentication settings as bound from configuration
///
/// At most one method may be set; [`AuthSettings::resolve`] turns these into an
/// [`Authentication`] and rejects conflicting combinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub tls_cert_file_path: Option<String>,
    pub tls_key_file_path: Option<String>,
    pub token: Option<String>,
    pub oauth2_issuer_url: Option<String>,
    pub oauth2_credentials_url: Option<String>,
    pub oauth2_audience: Option<String>,
}

/// Authentication method of a broker client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    None,
    /// Client certificate and private key
    Certificate { cert_file: String, key_file: String },
    /// Bearer token
    Token(String),
    /// OAuth2 client credentials flow
    OAuth2 {
        issuer_url: String,
        credentials_url: String,
        audience: String,
    },
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl AuthSettings {
    /// Resolve the single configured authentication method
    ///
    /// Resolution order: certificate pair, then token, then the OAuth2 trio.
    /// More than one complete method is a `ClientInit` error.
    pub fn resolve(&self) -> OrchestratorResult<Authentication> {
        let certificate = match (
            non_empty(&self.tls_cert_file_path),
            non_empty(&self.tls_key_file_path),
        ) {
            (Some(cert), Some(key)) => Some(Authentication::Certificate {
                cert_file: cert.to_string(),
                key_file: key.to_string(),
            }),
            _ => None,
        };

        let token = non_empty(&self.token).map(|t| Authentication::Token(t.to_string()));

        let oauth2 = match (
            non_empty(&self.oauth2_issuer_url),
            non_empty(&self.oauth2_credentials_url),
            non_empty(&self.oauth2_audience),
        ) {
            (Some(issuer), Some(credentials), Some(audience)) => {
                check_url("oauth2_issuer_url", issuer)?;
                check_url("oauth2_credentials_url", credentials)?;
                Some(Authentication::OAuth2 {
                    issuer_url: issuer.to_string(),
                    credentials_url: credentials.to_string(),
                    audience: audience.to_string(),
                })
            }
            _ => None,
        };

        let mut methods = [certificate, token, oauth2].into_iter().flatten();
        let first = methods.next();
        if methods.next().is_some() {
            return Err(OrchestratorError::client_init(
                "You cannot use multiple auth options.",
            ));
        }

        Ok(first.unwrap_or(Authentication::None))
    }
}

fn check_url(field: &str, value: &str) -> OrchestratorResult<()> {
    match value.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => Ok(()),
        _ => Err(OrchestratorError::client_init(format!(
            "{} is not a valid URL: {}",
            field, value
        ))),
    }
}

/// Consumer defaults of a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerDefaults {
    /// Ack timeout in milliseconds, applied when > 0
    pub ack_timeout_ms: u64,
    /// Max redeliver count used when a declaration sets none
    pub dead_letter_max_redeliver_count: Option<u32>,
    /// Subscription type used when a declaration sets none
    pub subscription_type: Option<String>,
}

impl ConsumerDefaults {
    /// Ack timeout, if configured
    pub fn ack_timeout(&self) -> Option<Duration> {
        (self.ack_timeout_ms > 0).then(|| Duration::from_millis(self.ack_timeout_ms))
    }
}

/// Subscription type of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionType {
    Exclusive,
    Shared,
    FailOver,
    KeyShared,
}

impl Default for SubscriptionType {
    fn default() -> Self {
        SubscriptionType::Exclusive
    }
}

impl std::str::FromStr for SubscriptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "exclusive" => Ok(SubscriptionType::Exclusive),
            "shared" => Ok(SubscriptionType::Shared),
            "failover" => Ok(SubscriptionType::FailOver),
            "keyshared" => Ok(SubscriptionType::KeyShared),
            _ => Err(format!("Unknown subscription type: {}", s)),
        }
    }
}

/// Where a new subscription starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitialPosition {
    #[default]
    Latest,
    Earliest,
}
