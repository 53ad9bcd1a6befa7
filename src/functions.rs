//! Function provider seam and the in-process registry.
//!
//! The planner uses providers for existence checks and prompt advertisement;
//! the executor uses them for dispatch. Providers must reflect dynamic
//! registrations between calls: the completion loop registers synthesized
//! functions while a planning pass is already underway, so callers never
//! cache existence results.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::ParameterSpec;

// Re-exported so providers and the executor share one token type.
pub use tokio_util::sync::CancellationToken;

/// Descriptor of one callable function, as advertised to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

impl FunctionMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            returns: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ParameterSpec>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_returns(mut self, returns: impl Into<String>) -> Self {
        self.returns = Some(returns.into());
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum FunctionError {
    #[error("function '{0}' is not registered")]
    NotFound(String),

    #[error("function '{name}' failed: {message}")]
    Failed { name: String, message: String },

    #[error("function '{name}' rejected its parameters: {message}")]
    InvalidParameters { name: String, message: String },
}

/// Source of callable functions.
///
/// `call_function` receives a cancellation token; implementations should
/// stop their underlying work when it fires (the executor cancels it when a
/// step timer expires). A provider that cannot observe the token must
/// document that its work may keep running after a timeout.
#[async_trait]
pub trait FunctionProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn has_function(&self, name: &str) -> bool;

    async fn list_functions(&self) -> Vec<FunctionMetadata>;

    async fn call_function(
        &self,
        name: &str,
        parameters: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, FunctionError>;
}

/// Async handler backing one registered function.
pub type FunctionHandler = Arc<
    dyn Fn(HashMap<String, Value>) -> BoxFuture<'static, Result<Value, FunctionError>>
        + Send
        + Sync,
>;

struct RegisteredFunction {
    metadata: FunctionMetadata,
    handler: FunctionHandler,
}

/// In-process function registry.
///
/// Registration is available at any time, including while plans are in
/// flight. Handler execution races the cancellation token, so a timed-out
/// step's local work is dropped rather than left running.
#[derive(Default)]
pub struct LocalFunctionRegistry {
    functions: RwLock<HashMap<String, RegisteredFunction>>,
}

impl LocalFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<F, Fut>(&self, metadata: FunctionMetadata, handler: F)
    where
        F: Fn(HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, FunctionError>> + Send + 'static,
    {
        let wrapped: FunctionHandler = Arc::new(move |params: HashMap<String, Value>| {
            Box::pin(handler(params)) as BoxFuture<'static, Result<Value, FunctionError>>
        });
        let name = metadata.name.clone();
        let mut guard = self.functions.write().await;
        if guard
            .insert(
                name.clone(),
                RegisteredFunction {
                    metadata,
                    handler: wrapped,
                },
            )
            .is_some()
        {
            log::warn!("function '{}' re-registered; previous handler replaced", name);
        } else {
            log::debug!("function '{}' registered", name);
        }
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.functions.write().await.remove(name).is_some()
    }

    pub async fn len(&self) -> usize {
        self.functions.read().await.len()
    }
}

#[async_trait]
impl FunctionProvider for LocalFunctionRegistry {
    fn provider_id(&self) -> &str {
        "local"
    }

    async fn has_function(&self, name: &str) -> bool {
        self.functions.read().await.contains_key(name)
    }

    async fn list_functions(&self) -> Vec<FunctionMetadata> {
        let guard = self.functions.read().await;
        let mut all: Vec<FunctionMetadata> =
            guard.values().map(|f| f.metadata.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    async fn call_function(
        &self,
        name: &str,
        parameters: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, FunctionError> {
        let handler = {
            let guard = self.functions.read().await;
            guard
                .get(name)
                .map(|f| f.handler.clone())
                .ok_or_else(|| FunctionError::NotFound(name.to_string()))?
        };
        let work = handler(parameters);
        tokio::select! {
            _ = cancel.cancelled() => Err(FunctionError::Failed {
                name: name.to_string(),
                message: "call cancelled".to_string(),
            }),
            result = work => result,
        }
    }
}

/// Ordered composite provider: existence is "any member has it", dispatch
/// goes to the first member that has the function. Putting the local
/// registry first gives local-first lookup with remote fallback.
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn FunctionProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn FunctionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn push(&mut self, provider: Arc<dyn FunctionProvider>) {
        self.providers.push(provider);
    }
}

#[async_trait]
impl FunctionProvider for ProviderChain {
    fn provider_id(&self) -> &str {
        "chain"
    }

    async fn has_function(&self, name: &str) -> bool {
        for provider in &self.providers {
            if provider.has_function(name).await {
                return true;
            }
        }
        false
    }

    async fn list_functions(&self) -> Vec<FunctionMetadata> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut all = Vec::new();
        for provider in &self.providers {
            for metadata in provider.list_functions().await {
                // First provider wins on name clashes.
                if !seen.contains_key(&metadata.name) {
                    seen.insert(metadata.name.clone(), all.len());
                    all.push(metadata);
                }
            }
        }
        all
    }

    async fn call_function(
        &self,
        name: &str,
        parameters: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, FunctionError> {
        for provider in &self.providers {
            if provider.has_function(name).await {
                log::debug!(
                    "dispatching '{}' through provider '{}'",
                    name,
                    provider.provider_id()
                );
                return provider.call_function(name, parameters, cancel).await;
            }
        }
        Err(FunctionError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn number(params: &HashMap<String, Value>, key: &str) -> f64 {
        params.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
    }

    async fn registry_with_add() -> LocalFunctionRegistry {
        let registry = LocalFunctionRegistry::new();
        registry
            .register(
                FunctionMetadata::new("add", "Add two numbers")
                    .with_parameters(vec![
                        ParameterSpec::new("a", "number"),
                        ParameterSpec::new("b", "number"),
                    ])
                    .with_returns("number"),
                |params| async move {
                    Ok(json!(number(&params, "a") + number(&params, "b")))
                },
            )
            .await;
        registry
    }

    #[tokio::test]
    async fn registered_functions_are_listed_and_callable() {
        let registry = registry_with_add().await;
        assert!(registry.has_function("add").await);
        assert!(!registry.has_function("subtract").await);

        let listed = registry.list_functions().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "add");

        let mut params = HashMap::new();
        params.insert("a".to_string(), json!(3));
        params.insert("b".to_string(), json!(5));
        let result = registry
            .call_function("add", params, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, json!(8.0));
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let registry = LocalFunctionRegistry::new();
        let err = registry
            .call_function("nope", HashMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FunctionError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn cancellation_stops_a_running_call() {
        let registry = LocalFunctionRegistry::new();
        registry
            .register(
                FunctionMetadata::new("slow", "Sleeps for a while"),
                |_params| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!("done"))
                },
            )
            .await;

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };
        let err = registry
            .call_function("slow", HashMap::new(), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn chain_prefers_the_first_provider_with_the_function() {
        let local = Arc::new(LocalFunctionRegistry::new());
        local
            .register(FunctionMetadata::new("greet", "Local greeting"), |_p| async {
                Ok(json!("hello from local"))
            })
            .await;

        let remote = Arc::new(LocalFunctionRegistry::new());
        remote
            .register(FunctionMetadata::new("greet", "Remote greeting"), |_p| async {
                Ok(json!("hello from remote"))
            })
            .await;
        remote
            .register(FunctionMetadata::new("fetch", "Remote only"), |_p| async {
                Ok(json!("fetched"))
            })
            .await;

        let chain = ProviderChain::new()
            .with_provider(local.clone())
            .with_provider(remote.clone());

        // Local-first dispatch on a clash, fallback for remote-only names.
        let token = CancellationToken::new();
        let greeting = chain
            .call_function("greet", HashMap::new(), &token)
            .await
            .unwrap();
        assert_eq!(greeting, json!("hello from local"));
        let fetched = chain
            .call_function("fetch", HashMap::new(), &token)
            .await
            .unwrap();
        assert_eq!(fetched, json!("fetched"));

        let listed = chain.list_functions().await;
        assert_eq!(listed.len(), 2);
        let greet = listed.iter().find(|m| m.name == "greet").unwrap();
        assert_eq!(greet.description, "Local greeting");
    }
}
