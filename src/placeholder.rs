//! `${...}` placeholder resolution for declared names.

use crate::{OrchestratorError, OrchestratorResult};
use std::collections::HashMap;

/// Resolves `${...}` tokens in declared topics, clusters and names
///
/// The orchestrator calls this once per declared field at registration time.
pub trait PlaceholderResolver: Send + Sync {
    fn resolve(&self, value: &str) -> OrchestratorResult<String>;
}

/// Resolver backed by configured properties and the process environment
///
/// Supports `${key}` and `${key:default}`. Properties win over environment
/// variables; a placeholder with neither a value nor a default is an error.
#[derive(Debug, Clone, Default)]
pub struct PropertyResolver {
    properties: HashMap<String, String>,
    use_env: bool,
}

impl PropertyResolver {
    /// Resolver over the given properties, falling back to environment variables
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self {
            properties,
            use_env: true,
        }
    }

    /// Disable the environment fallback
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .cloned()
            .or_else(|| self.use_env.then(|| std::env::var(key).ok()).flatten())
    }
}

impl PlaceholderResolver for PropertyResolver {
    fn resolve(&self, value: &str) -> OrchestratorResult<String> {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let token = &rest[start + 2..];
            let end = token.find('}').ok_or_else(|| {
                OrchestratorError::config(format!("Unterminated placeholder in '{}'", value))
            })?;

            let expr = &token[..end];
            let (key, default) = match expr.split_once(':') {
                Some((key, default)) => (key, Some(default)),
                None => (expr, None),
            };

            let resolved = self
                .lookup(key)
                .or_else(|| default.map(str::to_string))
                .ok_or_else(|| {
                    OrchestratorError::config(format!(
                        "Could not resolve placeholder '{}' in value '{}'",
                        key, value
                    ))
                })?;
            out.push_str(&resolved);
            rest = &token[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// Resolver that returns every value unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralResolver;

impl PlaceholderResolver for LiteralResolver {
    fn resolve(&self, value: &str) -> OrchestratorResult<String> {
        Ok(value.to_string())
    }
}

/// Resolve an optional field, treating blank input or output as unset
pub(crate) fn resolve_opt(
    resolver: &dyn PlaceholderResolver,
    value: Option<&str>,
) -> OrchestratorResult<Option<String>> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(value) => Ok(Some(resolver.resolve(value)?).filter(|v| !v.trim().is_empty())),
        None => Ok(None),
    }
}
