//! Common test utilities and helpers

#![allow(dead_code)]

use stencil_common::{
    Error, InstantiationPayload, InstantiationResult, LoadBalancer, Namespace, NamespaceId,
    PreviewManifest, PreviewRequest, ResourceKey, ResourceKind, Result, ServiceType,
    TemplateResource, VariableBinding,
};
use stencil_engine::backend::ExistingResources;
use stencil_engine::config::EngineConfig;
use stencil_engine::{InstantiationSession, TemplateBackend};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const VERSION: &str = "v1";
pub const CLUSTER: &str = "cluster-1";

/// Holds a backend response until the test releases it
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct CallCounts {
    pub template_resources: AtomicUsize,
    pub existing_resources: AtomicUsize,
    pub namespace_variables: AtomicUsize,
    pub load_balancers: AtomicUsize,
    pub preview: AtomicUsize,
    pub submit: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// In-memory platform
#[derive(Default)]
pub struct FakeBackend {
    pub versions: Mutex<HashMap<String, Vec<TemplateResource>>>,
    pub existing: Mutex<ExistingResources>,
    pub variables: Mutex<HashMap<NamespaceId, Vec<VariableBinding>>>,
    pub load_balancers: Mutex<HashMap<String, Vec<LoadBalancer>>>,
    pub gates: Mutex<HashMap<NamespaceId, Arc<Gate>>>,
    pub variable_gates: Mutex<HashMap<NamespaceId, Arc<Gate>>>,
    pub preview_requests: Mutex<Vec<PreviewRequest>>,
    pub submissions: Mutex<Vec<InstantiationPayload>>,
    pub fail_preview: AtomicBool,
    pub fail_existing: AtomicBool,
    pub calls: CallCounts,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(self, version_id: &str, resources: Vec<TemplateResource>) -> Self {
        self.versions
            .lock()
            .unwrap()
            .insert(version_id.to_string(), resources);
        self
    }

    pub fn with_variables(self, namespace: &str, bindings: Vec<VariableBinding>) -> Self {
        self.variables
            .lock()
            .unwrap()
            .insert(namespace.to_string(), bindings);
        self
    }

    pub fn with_load_balancers(self, cluster_id: &str, ids: &[i64]) -> Self {
        let load_balancers = ids
            .iter()
            .map(|id| LoadBalancer {
                id: *id,
                name: format!("lb-{}", id),
                cluster_id: cluster_id.to_string(),
            })
            .collect();
        self.load_balancers
            .lock()
            .unwrap()
            .insert(cluster_id.to_string(), load_balancers);
        self
    }

    pub fn with_existing(self, namespace: &str, kind: ResourceKind, name: &str) -> Self {
        self.existing
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .insert(stencil_common::ResourceIdentity::new(kind, name));
        self
    }

    /// Make preview fetches for `namespace` wait for [`Gate::release`]
    pub fn gate(&self, namespace: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .unwrap()
            .insert(namespace.to_string(), gate.clone());
        gate
    }

    /// Make default variable fetches for `namespace` wait for [`Gate::release`]
    pub fn gate_variables(&self, namespace: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.variable_gates
            .lock()
            .unwrap()
            .insert(namespace.to_string(), gate.clone());
        gate
    }

    pub fn last_preview_request(&self) -> Option<PreviewRequest> {
        self.preview_requests.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl TemplateBackend for FakeBackend {
    async fn fetch_template_resources(&self, version_id: &str) -> Result<Vec<TemplateResource>> {
        self.calls.template_resources.fetch_add(1, Ordering::SeqCst);
        self.versions
            .lock()
            .unwrap()
            .get(version_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("template set version {}", version_id)))
    }

    async fn fetch_existing_resources(
        &self,
        _version_id: &str,
        namespace_ids: &[NamespaceId],
        _selection: &[ResourceKey],
    ) -> Result<ExistingResources> {
        self.calls.existing_resources.fetch_add(1, Ordering::SeqCst);
        if self.fail_existing.load(Ordering::SeqCst) {
            return Err(Error::Backend {
                status: 500,
                message: "existing resource lookup failed".to_string(),
            });
        }
        let existing = self.existing.lock().unwrap();
        Ok(namespace_ids
            .iter()
            .filter_map(|ns| existing.get(ns).map(|set| (ns.clone(), set.clone())))
            .collect())
    }

    async fn fetch_namespace_variables(&self, namespace_id: &str) -> Result<Vec<VariableBinding>> {
        self.calls.namespace_variables.fetch_add(1, Ordering::SeqCst);

        let gate = self.variable_gates.lock().unwrap().get(namespace_id).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        Ok(self
            .variables
            .lock()
            .unwrap()
            .get(namespace_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_load_balancers(&self, cluster_id: &str) -> Result<Vec<LoadBalancer>> {
        self.calls.load_balancers.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .load_balancers
            .lock()
            .unwrap()
            .get(cluster_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_preview(&self, request: &PreviewRequest) -> Result<Vec<PreviewManifest>> {
        self.calls.preview.fetch_add(1, Ordering::SeqCst);
        self.preview_requests.lock().unwrap().push(request.clone());

        let gate = self.gates.lock().unwrap().get(&request.namespace_id).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if self.fail_preview.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection reset".to_string()));
        }

        Ok(vec![PreviewManifest::new(
            ResourceKind::Deployment,
            "web",
            format!(
                "metadata:\n  namespace: {}\nspec:\n  replicas: \"{{{{replicas}}}}}}\"\n  image: {{{{image}}}}\n",
                request.namespace_id
            ),
        )])
    }

    async fn submit_instantiation(&self, payload: &InstantiationPayload) -> Result<InstantiationResult> {
        self.calls.submit.fetch_add(1, Ordering::SeqCst);
        self.submissions.lock().unwrap().push(payload.clone());
        Ok(InstantiationResult {
            succeeded: payload.namespace_ids.clone(),
            failed: Vec::new(),
        })
    }
}

/// Deployment plus a ClusterIP service
pub fn plain_resources() -> Vec<TemplateResource> {
    vec![
        TemplateResource::new(ResourceKind::Deployment, "1", "web"),
        TemplateResource::new(ResourceKind::Service, "2", "web-svc")
            .with_service_type(ServiceType::ClusterIP),
    ]
}

/// Deployment plus a LoadBalancer service
pub fn lb_resources() -> Vec<TemplateResource> {
    vec![
        TemplateResource::new(ResourceKind::Deployment, "1", "web"),
        TemplateResource::new(ResourceKind::Service, "2", "web-lb")
            .with_service_type(ServiceType::LoadBalancer),
    ]
}

pub fn namespaces(ids: &[&str]) -> Vec<Namespace> {
    ids.iter()
        .map(|id| Namespace::new(*id, format!("{}-name", id), CLUSTER))
        .collect()
}

/// Session with `VERSION` selected and `ids` as candidates
pub async fn session_with(backend: Arc<FakeBackend>, ids: &[&str]) -> InstantiationSession {
    let session = InstantiationSession::new(backend, EngineConfig::default());
    session
        .select_version(VERSION)
        .await
        .expect("Failed to select version");
    session.set_candidates(namespaces(ids)).await;
    session
}
