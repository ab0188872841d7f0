//! Naming rules for topics, consumers and subscriptions.

use crate::config::ClusterProperties;

/// Fully qualified topic for a declared topic name
///
/// Topics starting with `/` or carrying a scheme are used as is. Anything else is
/// placed under the namespace (declared, else the cluster's) and the cluster tenant.
pub(crate) fn topic_url(topic: &str, namespace: Option<&str>, props: &ClusterProperties) -> String {
    if topic.starts_with('/') || topic.contains("://") {
        return topic.to_string();
    }

    let namespace = namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or(&props.namespace)
        .trim_matches('/');

    match props.tenant.as_deref().filter(|t| !t.is_empty()) {
        Some(tenant) => format!("/{}/{}/{}", tenant.trim_matches('/'), namespace, topic),
        None => format!("/{}/{}", namespace, topic),
    }
}

/// Explicit name, else `{prefix}{delimiter}{id}`
pub(crate) fn generated_name(
    explicit: Option<&str>,
    prefix: &str,
    id: &str,
    props: &ClusterProperties,
) -> String {
    match explicit.filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => format!("{}{}{}", prefix, props.consumer_name_delimiter, id),
    }
}

/// Producer name derived from cluster and topic
pub(crate) fn producer_name(cluster: &str, topic: &str) -> String {
    format!("{}-{}", cluster, topic.trim_start_matches('/').replace('/', "-"))
}
