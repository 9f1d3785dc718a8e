//! Engine error types
//!
//! Selection problems are reported before any request leaves the engine;
//! collaborator failures carry the step that failed.

use stencil_common::{NamespaceId, ResourceIdentity};
use thiserror::Error;

/// Invalid or incomplete user selection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// No template set version chosen yet
    #[error("No template set version selected")]
    NoVersionSelected,

    /// Every template resource is excluded
    #[error("No template resources selected")]
    NoResourcesSelected,

    /// No target namespace chosen
    #[error("No namespaces selected")]
    NoNamespacesSelected,

    /// Namespace is not among the candidates of this session
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(NamespaceId),

    /// Template resource key not part of the selected version
    #[error("Unknown template resource: {0}")]
    UnknownResource(String),

    /// LB-dependent services without a chosen load balancer
    #[error("Namespace {namespace} has unresolved load balancers for: {}", .services.join(", "))]
    UnresolvedLoadBalancers {
        namespace: NamespaceId,
        services: Vec<String>,
    },

    /// Load balancer id not offered for the namespace's cluster
    #[error("Load balancer {load_balancer} is not available in namespace {namespace}")]
    UnknownLoadBalancer {
        namespace: NamespaceId,
        load_balancer: i64,
    },

    /// Selected resources already exist in the namespace
    #[error("Namespace {namespace} already contains: {}", format_identities(.resources))]
    ConflictingResources {
        namespace: NamespaceId,
        resources: Vec<ResourceIdentity>,
    },

    /// No existing-resource check has run for the namespace and current selection
    #[error("Namespace {0} has not been checked for existing resources")]
    ConflictsUnchecked(NamespaceId),

    /// Variable key rejected by validation
    #[error("Invalid variable key: {0}")]
    InvalidVariableKey(String),

    /// Well-formed key with no binding in the namespace
    #[error("Namespace {namespace} has no variable {key}")]
    UnknownVariable { namespace: NamespaceId, key: String },
}

fn format_identities(resources: &[ResourceIdentity]) -> String {
    resources
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by the instantiation flow
#[derive(Debug, Error)]
pub enum InstantiateError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("Failed to fetch template resources for version {version}: {source}")]
    TemplateFetch {
        version: String,
        #[source]
        source: stencil_common::Error,
    },

    #[error("Failed to fetch existing resources: {0}")]
    ConflictFetch(#[source] stencil_common::Error),

    #[error("Failed to fetch variables for namespace {namespace}: {source}")]
    VariableFetch {
        namespace: NamespaceId,
        #[source]
        source: stencil_common::Error,
    },

    #[error("Failed to fetch load balancers for cluster {cluster}: {source}")]
    LoadBalancerFetch {
        cluster: String,
        #[source]
        source: stencil_common::Error,
    },

    #[error("Failed to fetch preview for namespace {namespace}: {source}")]
    PreviewFetch {
        namespace: NamespaceId,
        #[source]
        source: stencil_common::Error,
    },

    #[error("Failed to submit instantiation: {0}")]
    Submit(#[source] stencil_common::Error),

    #[error("Invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Manifest is not valid YAML: {0}")]
    ManifestParse(#[from] serde_yaml::Error),
}

impl InstantiateError {
    /// Whether the error came from a collaborator rather than the user's selection
    pub fn is_fetch_error(&self) -> bool {
        !matches!(
            self,
            Self::Selection(_) | Self::Pattern(_) | Self::ManifestParse(_)
        )
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, InstantiateError>;
