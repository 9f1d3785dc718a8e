//! Instantiation session
//!
//! Explicit view-model state for one instantiation flow: the chosen version,
//! the resource and namespace selections, bindings, load balancer choices,
//! conflict index and previews. Everything is discarded with the session.

use crate::backend::{with_timeout, TemplateBackend};
use crate::bindings::BindingStore;
use crate::config::EngineConfig;
use crate::conflicts::{ConflictDetector, ConflictKey, ConflictReport, ExistingResourceIndex};
use crate::error::{InstantiateError, Result, SelectionError};
use crate::loadbalancer::LbResolutionTable;
use crate::preview::{NamespacePreview, PreviewOrchestrator, PreviewOutcome, PreviewPhase, PreviewTracker};
use crate::submit::{self, SubmissionInput};
use crate::substitution::Substitution;
use crate::validation::validate_variable_key;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use stencil_common::{
    InstantiationPayload, InstantiationResult, LoadBalancer, LoadBalancerId, Namespace,
    NamespaceId, PreviewManifest, ResourceKey, TemplateResource, TemplateSetVersion,
    VariableType, VariableValue, UNRESOLVED_LOAD_BALANCER,
};
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

/// Mutable state shared by the session and its preview orchestrator
#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) version: Option<TemplateSetVersion>,
    pub(crate) selection: BTreeSet<ResourceKey>,
    pub(crate) candidates: Vec<Namespace>,
    pub(crate) selected_namespaces: Vec<NamespaceId>,
    pub(crate) bindings: BindingStore,
    pub(crate) load_balancers: LbResolutionTable,
    pub(crate) lb_catalog: HashMap<String, Vec<LoadBalancer>>,
    pub(crate) conflicts: ExistingResourceIndex,
    pub(crate) previews: PreviewTracker,
}

impl SessionState {
    /// Selected resources in version order
    pub fn selected_resources(&self) -> Vec<TemplateResource> {
        self.version
            .as_ref()
            .map(|version| {
                version
                    .resources
                    .iter()
                    .filter(|r| self.selection.contains(&r.key()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn namespace(&self, id: &str) -> Option<&Namespace> {
        self.candidates.iter().find(|ns| ns.id == id)
    }

    fn conflict_key(&self) -> Option<ConflictKey> {
        let version = self.version.as_ref()?;
        Some(ConflictKey::new(&version.id, &self.selected_resources()))
    }

    /// Propagate a change of version or resource selection
    fn selection_changed(&mut self) {
        let resources = self.selected_resources();
        self.load_balancers.set_required_from(&resources);
        if let Some(key) = self.conflict_key() {
            self.conflicts.sync_key(key);
        }
        self.previews.invalidate_all();
    }

    fn reset_for_version(&mut self, version: TemplateSetVersion) {
        self.selection = version.resources.iter().map(TemplateResource::key).collect();
        self.version = Some(version);
        self.bindings.clear();
        self.load_balancers.clear_all();
        self.conflicts.clear();
        self.previews.clear();
        self.selection_changed();
    }
}

/// One instantiation flow against a platform backend
pub struct InstantiationSession {
    id: Uuid,
    backend: Arc<dyn TemplateBackend>,
    config: EngineConfig,
    state: Arc<RwLock<SessionState>>,
    orchestrator: PreviewOrchestrator,
}

impl InstantiationSession {
    pub fn new(backend: Arc<dyn TemplateBackend>, config: EngineConfig) -> Self {
        let state = Arc::new(RwLock::new(SessionState::default()));
        let orchestrator = PreviewOrchestrator::new(backend.clone(), state.clone(), config.clone());
        let id = Uuid::new_v4();
        tracing::info!(session = %id, "Instantiation session created");

        Self {
            id,
            backend,
            config,
            state,
            orchestrator,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!("instantiation", session = %self.id)
    }

    /// Fetch a template set version and start over with it.
    ///
    /// All resources start selected. Bindings, load balancer choices,
    /// conflicts and previews of the previous version are dropped.
    pub async fn select_version(&self, version_id: &str) -> Result<TemplateSetVersion> {
        async {
            let resources = with_timeout(
                self.config.preview.request_timeout(),
                "fetch_template_resources",
                self.backend.fetch_template_resources(version_id),
            )
            .await
            .map_err(|source| InstantiateError::TemplateFetch {
                version: version_id.to_string(),
                source,
            })?;

            let version = TemplateSetVersion::new(version_id, resources);
            tracing::info!(
                version = %version.id,
                resources = version.resources.len(),
                "Template set version selected"
            );

            self.state.write().await.reset_for_version(version.clone());
            Ok::<_, InstantiateError>(version)
        }
        .instrument(self.span())
        .await
    }

    pub async fn version(&self) -> Option<TemplateSetVersion> {
        self.state.read().await.version.clone()
    }

    /// Include or exclude a template resource by its `kind-id` key
    pub async fn set_resource_selected(
        &self,
        key: &ResourceKey,
        selected: bool,
    ) -> std::result::Result<(), SelectionError> {
        let mut state = self.state.write().await;
        let version = state.version.as_ref().ok_or(SelectionError::NoVersionSelected)?;
        if version.resource(key).is_none() {
            return Err(SelectionError::UnknownResource(key.to_string()));
        }

        let changed = if selected {
            state.selection.insert(key.clone())
        } else {
            state.selection.remove(key)
        };
        if changed {
            tracing::debug!(resource = %key, selected, "Resource selection changed");
            state.selection_changed();
        }
        Ok(())
    }

    pub async fn selected_resources(&self) -> Vec<TemplateResource> {
        self.state.read().await.selected_resources()
    }

    /// Replace the candidate namespaces.
    ///
    /// Selections, conflict entries, load balancer cells and previews of
    /// namespaces that left the list are dropped.
    pub async fn set_candidates(&self, namespaces: Vec<Namespace>) {
        let mut state = self.state.write().await;
        let state = &mut *state;
        let ids: Vec<NamespaceId> = namespaces.iter().map(|ns| ns.id.clone()).collect();

        let removed: Vec<NamespaceId> = state
            .candidates
            .iter()
            .filter(|ns| !ids.contains(&ns.id))
            .map(|ns| ns.id.clone())
            .collect();
        for namespace in &removed {
            state.load_balancers.forget_namespace(namespace);
            state.previews.forget_namespace(namespace);
        }

        state.selected_namespaces.retain(|ns| ids.contains(ns));
        state.conflicts.retain_namespaces(&ids);
        state.candidates = namespaces;
    }

    pub async fn select_namespace(
        &self,
        namespace: &str,
        selected: bool,
    ) -> std::result::Result<(), SelectionError> {
        let mut state = self.state.write().await;
        if state.namespace(namespace).is_none() {
            return Err(SelectionError::UnknownNamespace(namespace.to_string()));
        }

        let present = state.selected_namespaces.iter().any(|ns| ns == namespace);
        if selected && !present {
            state.selected_namespaces.push(namespace.to_string());
        } else if !selected && present {
            state.selected_namespaces.retain(|ns| ns != namespace);
        }
        Ok(())
    }

    pub async fn selected_namespaces(&self) -> Vec<NamespaceId> {
        self.state.read().await.selected_namespaces.clone()
    }

    /// Check every candidate namespace for resources that already exist.
    ///
    /// Meant to run once when the namespace step opens; only namespaces not
    /// yet indexed for the current selection are fetched.
    pub async fn detect_conflicts(&self) -> Result<ConflictReport> {
        let candidates: Vec<NamespaceId> = {
            let state = self.state.read().await;
            state.candidates.iter().map(|ns| ns.id.clone()).collect()
        };
        self.index_conflicts(&candidates).await
    }

    /// Fetch existing resources for those of `namespaces` the index lacks
    async fn index_conflicts(&self, namespaces: &[NamespaceId]) -> Result<ConflictReport> {
        let (key, resources, pending) = {
            let state = self.state.read().await;
            let key = state.conflict_key().ok_or(SelectionError::NoVersionSelected)?;
            let pending: Vec<NamespaceId> = namespaces
                .iter()
                .filter(|ns| !state.conflicts.is_indexed(ns))
                .cloned()
                .collect();
            (key, state.selected_resources(), pending)
        };

        let detector = ConflictDetector::new(self.backend.as_ref(), self.config.preview.request_timeout());
        let existing = detector
            .fetch(&key.version_id, &resources, &pending)
            .instrument(self.span())
            .await?;

        let mut state = self.state.write().await;
        if state.conflict_key().as_ref() == Some(&key) {
            let candidates: Vec<NamespaceId> = state.candidates.iter().map(|ns| ns.id.clone()).collect();
            for (namespace, identities) in existing {
                if candidates.contains(&namespace) {
                    state.conflicts.record(namespace, identities);
                }
            }
        } else {
            tracing::debug!("Selection changed during conflict check, results not indexed");
        }

        let report = state.conflicts.report(&resources);
        if !report.is_empty() {
            tracing::info!(blocked = report.conflicts.len(), "Namespaces with existing resources");
        }
        Ok(report)
    }

    /// Conflicting resources of one namespace for the current selection
    pub async fn conflicts_for(&self, namespace: &str) -> Vec<stencil_common::ResourceIdentity> {
        let state = self.state.read().await;
        state.conflicts.conflicts_for(namespace, &state.selected_resources())
    }

    /// Focus a namespace and render its preview
    pub async fn focus_namespace(&self, namespace: &str) -> Result<PreviewOutcome> {
        self.orchestrator.focus(namespace).instrument(self.span()).await
    }

    /// Re-fetch the preview of the focused namespace
    pub async fn refresh_preview(&self) -> Result<PreviewOutcome> {
        self.orchestrator.refresh().instrument(self.span()).await
    }

    pub async fn focused_namespace(&self) -> Option<NamespaceId> {
        self.state.read().await.previews.focused().map(str::to_string)
    }

    /// Edit one variable and re-render the namespace's preview without a fetch
    pub async fn set_variable(
        &self,
        namespace: &str,
        key: &str,
        value: Option<VariableValue>,
    ) -> Result<Vec<PreviewManifest>> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        if state.namespace(namespace).is_none() {
            return Err(SelectionError::UnknownNamespace(namespace.to_string()).into());
        }

        state.bindings.set(namespace, key, value)?;
        self.rerender(state, namespace)
    }

    /// Declare how a variable renders in quoted placeholders
    pub async fn set_variable_type(
        &self,
        namespace: &str,
        key: &str,
        var_type: VariableType,
    ) -> Result<Vec<PreviewManifest>> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        validate_variable_key(key)?;
        if !state.bindings.set_type(namespace, key, var_type) {
            return Err(SelectionError::UnknownVariable {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }
            .into());
        }
        self.rerender(state, namespace)
    }

    pub async fn variables(&self, namespace: &str) -> Vec<stencil_common::VariableBinding> {
        self.state.read().await.bindings.bindings(namespace).to_vec()
    }

    fn rerender(&self, state: &mut SessionState, namespace: &str) -> Result<Vec<PreviewManifest>> {
        let substitution =
            Substitution::compile(state.bindings.bindings(namespace), &self.config.substitution)?;
        Ok(state.previews.rerender(namespace, &substitution))
    }

    /// Choose the load balancer for an LB-dependent service; a negative id clears it
    pub async fn assign_load_balancer(
        &self,
        namespace: &str,
        service: &str,
        load_balancer: LoadBalancerId,
    ) -> std::result::Result<(), SelectionError> {
        let mut state = self.state.write().await;
        let cluster_id = state
            .namespace(namespace)
            .map(|ns| ns.cluster_id.clone())
            .ok_or_else(|| SelectionError::UnknownNamespace(namespace.to_string()))?;

        if !state.load_balancers.required_services().any(|s| s == service) {
            return Err(SelectionError::UnknownResource(service.to_string()));
        }

        if load_balancer > UNRESOLVED_LOAD_BALANCER {
            if let Some(catalog) = state.lb_catalog.get(&cluster_id) {
                if !catalog.iter().any(|lb| lb.id == load_balancer) {
                    return Err(SelectionError::UnknownLoadBalancer {
                        namespace: namespace.to_string(),
                        load_balancer,
                    });
                }
            }
        }

        state.load_balancers.assign(namespace, service, load_balancer);
        Ok(())
    }

    pub async fn is_namespace_ready(&self, namespace: &str) -> bool {
        self.state.read().await.load_balancers.is_namespace_ready(namespace)
    }

    /// Load balancers known for a cluster, if they were fetched
    pub async fn load_balancers(&self, cluster_id: &str) -> Option<Vec<LoadBalancer>> {
        self.state.read().await.lb_catalog.get(cluster_id).cloned()
    }

    pub async fn preview(&self, namespace: &str) -> Option<NamespacePreview> {
        self.state.read().await.previews.preview(namespace).cloned()
    }

    pub async fn phase(&self, namespace: &str) -> PreviewPhase {
        self.state.read().await.previews.phase(namespace)
    }

    /// Build the create-instance request from the current state.
    ///
    /// Does not fetch; with conflict blocking on, a selected namespace never
    /// checked for existing resources is refused.
    pub async fn assemble(&self) -> std::result::Result<InstantiationPayload, SelectionError> {
        let state = self.state.read().await;
        let resources = state.selected_resources();
        submit::assemble(&SubmissionInput {
            version: state.version.as_ref(),
            resources: &resources,
            namespaces: &state.selected_namespaces,
            bindings: &state.bindings,
            load_balancers: &state.load_balancers,
            conflicts: self
                .config
                .preview
                .block_on_conflicts
                .then_some(&state.conflicts),
        })
    }

    /// Assemble and submit; nothing is sent when validation fails.
    ///
    /// Selected namespaces without an existing-resource check for the current
    /// selection are checked first.
    pub async fn submit(&self) -> Result<InstantiationResult> {
        if self.config.preview.block_on_conflicts {
            let (checkable, selected) = {
                let state = self.state.read().await;
                (
                    state.version.is_some() && !state.selection.is_empty(),
                    state.selected_namespaces.clone(),
                )
            };
            if checkable && !selected.is_empty() {
                self.index_conflicts(&selected).await?;
            }
        }

        let payload = self.assemble().await?;
        submit::submit(
            self.backend.as_ref(),
            &payload,
            self.config.preview.request_timeout(),
        )
        .instrument(self.span())
        .await
    }
}
