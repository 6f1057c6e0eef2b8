//! Service registry with async handlers
//!
//! Entity platforms register their domain services here (`switch.turn_on`
//! and friends); callers address entities through `entity_id` in the
//! service data.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::Context;

/// A call to a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub service_data: serde_json::Value,
    pub context: Context,
}

impl ServiceCall {
    /// Entity IDs targeted by this call (`entity_id` as a string or a list)
    pub fn target_entity_ids(&self) -> Vec<String> {
        match self.service_data.get("entity_id") {
            Some(serde_json::Value::String(id)) => vec![id.clone()],
            Some(serde_json::Value::Array(ids)) => ids
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub type ServiceResult = Result<(), ServiceError>;

pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// Registered services keyed by `domain.service`
pub struct ServiceRegistry {
    services: DashMap<String, ServiceHandler>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    #[instrument(skip(self, handler))]
    pub fn register<F, Fut>(&self, domain: &str, service: &str, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        debug!("Registering service");
        let handler: ServiceHandler = Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);
        self.services.insert(format!("{}.{}", domain, service), handler);
    }

    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
    ) -> ServiceResult {
        let handler = self
            .services
            .get(&format!("{}.{}", domain, service))
            .map(|h| h.value().clone())
            .ok_or_else(|| {
                warn!("Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;

        let call = ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data,
            context,
        };

        debug!("Calling service");
        handler(call).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{}.{}", domain, service))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = ServiceRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        registry.register("switch", "turn_on", move |call: ServiceCall| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().extend(call.target_entity_ids());
                Ok(())
            }
        });

        registry
            .call(
                "switch",
                "turn_on",
                json!({"entity_id": ["switch.a", "switch.b"]}),
                Context::new(),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["switch.a", "switch.b"]);
        assert!(registry.has_service("switch", "turn_on"));
        assert!(!registry.has_service("switch", "turn_off"));
    }

    #[tokio::test]
    async fn test_service_not_found() {
        let registry = ServiceRegistry::new();
        let result = registry
            .call("switch", "turn_on", json!({}), Context::new())
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }

    #[test]
    fn test_single_entity_target() {
        let call = ServiceCall {
            domain: "switch".into(),
            service: "toggle".into(),
            service_data: json!({"entity_id": "switch.a"}),
            context: Context::new(),
        };
        assert_eq!(call.target_entity_ids(), vec!["switch.a"]);
    }
}
