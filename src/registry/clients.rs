//! ClusterClientRegistry - one broker client per configured cluster

use crate::broker::{BrokerClient, BrokerClientFactory, ClientOptions};
use crate::config::ClusterProperties;
use crate::error::CloseError;
use crate::metrics::DispatchMetrics;
use crate::{OrchestratorError, OrchestratorResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Owns the broker client of every configured cluster
///
/// Lookups come in required (`get_*`, failing with a configuration error) and
/// optional (`find_*`) flavours. The `*_or` variants fall back to a second cluster
/// when the first name is blank or not configured.
pub struct ClusterClientRegistry {
    clients: BTreeMap<String, Arc<dyn BrokerClient>>,
    properties: BTreeMap<String, ClusterProperties>,
}

impl ClusterClientRegistry {
    /// Build one client per cluster
    ///
    /// Client options of every cluster are resolved before the first connection is
    /// attempted, so conflicting authentication fails without connecting anything.
    /// If a later connection fails, the clients already built are closed again.
    pub async fn connect(
        properties: BTreeMap<String, ClusterProperties>,
        factory: &dyn BrokerClientFactory,
    ) -> OrchestratorResult<Self> {
        let mut options = Vec::with_capacity(properties.len());
        for (cluster, props) in &properties {
            if cluster.trim().is_empty() {
                return Err(OrchestratorError::config("cluster name cannot be empty"));
            }
            options.push(ClientOptions::from_properties(cluster, props)?);
        }

        let mut clients: BTreeMap<String, Arc<dyn BrokerClient>> = BTreeMap::new();
        for option in options {
            let cluster = option.cluster.clone();
            let service_url = option.service_url.clone();

            match factory.connect(option).await {
                Ok(client) => {
                    info!("Broker client for cluster [{}] connected to {}", cluster, service_url);
                    clients.insert(cluster, client);
                }
                Err(e) => {
                    error!("Failed to build broker client for cluster [{}]: {}", cluster, e);
                    for (name, client) in &clients {
                        if let Err(close_err) = client.close().await {
                            warn!("Failed to close client for cluster [{}]: {}", name, close_err);
                        }
                    }
                    return Err(if e.is_client_init() {
                        e
                    } else {
                        OrchestratorError::client_init_with_source(
                            format!("Failed to build broker client for cluster [{}]", cluster),
                            e,
                        )
                    });
                }
            }
        }

        info!("Client registry ready with {} cluster(s)", clients.len());
        Ok(Self {
            clients,
            properties,
        })
    }

    /// Client of `cluster`, or a configuration error
    pub fn get_client(&self, cluster: &str) -> OrchestratorResult<&Arc<dyn BrokerClient>> {
        self.find_client(cluster)
            .ok_or_else(|| OrchestratorError::cluster_not_configured(cluster))
    }

    pub fn find_client(&self, cluster: &str) -> Option<&Arc<dyn BrokerClient>> {
        self.clients.get(cluster)
    }

    /// Client of `cluster`, else of `fallback`; fails only if both are missing
    pub fn get_client_or(
        &self,
        cluster: &str,
        fallback: &str,
    ) -> OrchestratorResult<&Arc<dyn BrokerClient>> {
        self.find_client_or(cluster, fallback)
            .ok_or_else(|| OrchestratorError::cluster_not_configured(fallback))
    }

    pub fn find_client_or(&self, cluster: &str, fallback: &str) -> Option<&Arc<dyn BrokerClient>> {
        non_blank(cluster)
            .and_then(|name| self.find_client(name))
            .or_else(|| self.find_client(fallback))
    }

    /// Properties of `cluster`, or a configuration error
    pub fn get_properties(&self, cluster: &str) -> OrchestratorResult<&ClusterProperties> {
        self.find_properties(cluster)
            .ok_or_else(|| OrchestratorError::cluster_not_configured(cluster))
    }

    pub fn find_properties(&self, cluster: &str) -> Option<&ClusterProperties> {
        self.properties.get(cluster)
    }

    /// Properties of `cluster`, else of `fallback`; fails only if both are missing
    pub fn get_properties_or(
        &self,
        cluster: &str,
        fallback: &str,
    ) -> OrchestratorResult<&ClusterProperties> {
        self.find_properties_or(cluster, fallback)
            .ok_or_else(|| OrchestratorError::cluster_not_configured(fallback))
    }

    pub fn find_properties_or(&self, cluster: &str, fallback: &str) -> Option<&ClusterProperties> {
        non_blank(cluster)
            .and_then(|name| self.find_properties(name))
            .or_else(|| self.find_properties(fallback))
    }

    /// Every configured cluster with its properties
    pub fn all_properties(&self) -> &BTreeMap<String, ClusterProperties> {
        &self.properties
    }

    /// Names of the configured clusters, in order
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Close every client, returning the outcome per cluster
    ///
    /// A failure never stops the remaining clients from being closed.
    pub async fn close_each(&self) -> Vec<(String, OrchestratorResult<()>)> {
        let mut results = Vec::with_capacity(self.clients.len());
        for (cluster, client) in &self.clients {
            let result = client.close().await;
            DispatchMetrics::cluster_closed(cluster);
            match &result {
                Ok(()) => info!("Closed broker client for cluster [{}]", cluster),
                Err(e) => error!("Failed to close broker client for cluster [{}]: {}", cluster, e),
            }
            results.push((cluster.clone(), result));
        }
        results
    }

    /// Close every client, raising one aggregate error if any close failed
    pub async fn close(&self) -> OrchestratorResult<()> {
        let failures: Vec<_> = self
            .close_each()
            .await
            .into_iter()
            .filter_map(|(cluster, result)| result.err().map(|e| (cluster, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseError::new(failures).into())
        }
    }
}

impl std::fmt::Debug for ClusterClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClientRegistry")
            .field("clusters", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn non_blank(name: &str) -> Option<&str> {
    (!name.trim().is_empty()).then_some(name)
}
