//! Platform services consumed by the engine
//!
//! The engine never talks HTTP itself; callers hand it an implementation of
//! [`TemplateBackend`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use stencil_common::{
    Error, InstantiationPayload, InstantiationResult, LoadBalancer, NamespaceId, PreviewManifest,
    PreviewRequest, ResourceIdentity, ResourceKey, Result, TemplateResource, VariableBinding,
};

/// Existing `(kind, name)` pairs per namespace
pub type ExistingResources = HashMap<NamespaceId, HashSet<ResourceIdentity>>;

/// Request/response functions provided by the platform API layer
#[async_trait::async_trait]
pub trait TemplateBackend: Send + Sync {
    /// Resources of a template set version
    async fn fetch_template_resources(&self, version_id: &str) -> Result<Vec<TemplateResource>>;

    /// Already instantiated resources. Namespaces absent from the answer hold none.
    async fn fetch_existing_resources(
        &self,
        version_id: &str,
        namespace_ids: &[NamespaceId],
        selection: &[ResourceKey],
    ) -> Result<ExistingResources>;

    /// Default variable bindings of a namespace
    async fn fetch_namespace_variables(&self, namespace_id: &str) -> Result<Vec<VariableBinding>>;

    /// Load balancers available in a cluster
    async fn fetch_load_balancers(&self, cluster_id: &str) -> Result<Vec<LoadBalancer>>;

    /// Unsubstituted manifests for one namespace
    async fn fetch_preview(&self, request: &PreviewRequest) -> Result<Vec<PreviewManifest>>;

    /// Create the instances
    async fn submit_instantiation(&self, payload: &InstantiationPayload) -> Result<InstantiationResult>;
}

/// Run a collaborator call with an upper time bound
pub(crate) async fn with_timeout<T, F>(timeout: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{} did not complete within {}s",
            operation,
            timeout.as_secs()
        ))),
    }
}
