//! Common types shared between the stencil engine and the services it talks to

pub mod variables;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub use variables::{VariableBinding, VariableType, VariableValue};

/// Namespace identifier as issued by the platform API
pub type NamespaceId = String;

/// Load balancer identifier as issued by the platform API
pub type LoadBalancerId = i64;

/// Wire sentinel for "no load balancer chosen yet"
pub const UNRESOLVED_LOAD_BALANCER: LoadBalancerId = -1;

/// Kind of a deployable unit inside a template set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Deployment,
    Service,
    ConfigMap,
    Secret,
    DaemonSet,
    Job,
    StatefulSet,
    Ingress,
    #[serde(rename = "HPA")]
    Hpa,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::StatefulSet => "StatefulSet",
            Self::Ingress => "Ingress",
            Self::Hpa => "HPA",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(Self::Deployment),
            "service" => Ok(Self::Service),
            "configmap" => Ok(Self::ConfigMap),
            "secret" => Ok(Self::Secret),
            "daemonset" => Ok(Self::DaemonSet),
            "job" => Ok(Self::Job),
            "statefulset" => Ok(Self::StatefulSet),
            "ingress" => Ok(Self::Ingress),
            "hpa" | "horizontalpodautoscaler" => Ok(Self::Hpa),
            other => Err(Error::Validation(format!("Unknown resource kind: {}", other))),
        }
    }
}

/// Kubernetes service type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

/// Selection key of a template resource, formatted `kind-id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(kind: ResourceKind, id: &str) -> Self {
        Self(format!("{}-{}", kind, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an instantiated object inside a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One deployable unit of a template set version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateResource {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    /// Only meaningful for `Service` resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
}

impl TemplateResource {
    pub fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            service_type: None,
        }
    }

    pub fn with_service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, &self.id)
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(self.kind, self.name.clone())
    }

    /// Whether instantiating this resource needs a load balancer chosen per namespace
    pub fn requires_load_balancer(&self) -> bool {
        self.kind == ResourceKind::Service && self.service_type == Some(ServiceType::LoadBalancer)
    }
}

/// A fetched template set version. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSetVersion {
    pub id: String,
    pub resources: Vec<TemplateResource>,
    pub fetched_at: DateTime<Utc>,
}

impl TemplateSetVersion {
    pub fn new(id: impl Into<String>, resources: Vec<TemplateResource>) -> Self {
        Self {
            id: id.into(),
            resources,
            fetched_at: Utc::now(),
        }
    }

    pub fn resource(&self, key: &ResourceKey) -> Option<&TemplateResource> {
        self.resources.iter().find(|r| &r.key() == key)
    }
}

/// Target namespace; belongs to exactly one cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    pub id: NamespaceId,
    pub name: String,
    pub cluster_id: String,
}

impl Namespace {
    pub fn new(id: impl Into<String>, name: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cluster_id: cluster_id.into(),
        }
    }
}

/// Load balancer available in a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancer {
    pub id: LoadBalancerId,
    pub name: String,
    pub cluster_id: String,
}

/// Rendered manifest of one resource for one namespace.
///
/// `original_content` is what the preview endpoint returned; `content` is
/// always derived from it and never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewManifest {
    pub tag: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub content: String,
    pub original_content: String,
}

impl PreviewManifest {
    pub fn new(tag: ResourceKind, name: impl Into<String>, original_content: impl Into<String>) -> Self {
        let original_content = original_content.into();
        Self {
            tag,
            name: name.into(),
            content: original_content.clone(),
            original_content,
        }
    }
}

/// Body of a preview fetch for one namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewRequest {
    pub template_set_version_id: String,
    pub namespace_id: NamespaceId,
    pub resources: Vec<ResourceKey>,
    pub variables: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<BTreeMap<String, LoadBalancerId>>,
}

/// Create-instance request covering every selected namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstantiationPayload {
    pub template_set_version_id: String,
    pub resources: Vec<ResourceKey>,
    pub namespace_ids: Vec<NamespaceId>,
    pub variables: BTreeMap<NamespaceId, BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<BTreeMap<NamespaceId, BTreeMap<String, LoadBalancerId>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstantiationFailure {
    pub namespace_id: NamespaceId,
    pub reason: String,
}

/// Outcome reported by the create-instance endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InstantiationResult {
    #[serde(default)]
    pub succeeded: Vec<NamespaceId>,
    #[serde(default)]
    pub failed: Vec<InstantiationFailure>,
}

impl InstantiationResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Errors reported by the platform services
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
