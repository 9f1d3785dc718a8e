//! Preview orchestration for the focused namespace
//!
//! Every focus change or refresh issues a new per-namespace sequence number.
//! Moving focus away from a namespace bumps its counter, so responses still
//! in flight for it no longer match and are dropped when they arrive. The
//! latest issued request wins, not the latest to complete.
//!
//! Flow per request:
//! `FetchingConflicts -> AwaitingBindings -> FetchingLbMetadata -> FetchingPreview -> Rendered`
//! with `Error` reachable from every fetching phase. When load balancer cells
//! are missing the flow stops in `AwaitingBindings` without an error.

use crate::backend::{with_timeout, TemplateBackend};
use crate::config::EngineConfig;
use crate::conflicts::ConflictDetector;
use crate::error::{InstantiateError, Result, SelectionError};
use crate::log_preview_step;
use crate::session::SessionState;
use crate::substitution::Substitution;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use stencil_common::{NamespaceId, PreviewManifest, PreviewRequest, TemplateResource};
use tokio::sync::RwLock;

/// Phase of the preview flow for one namespace
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PreviewPhase {
    #[default]
    Idle,
    FetchingConflicts,
    AwaitingBindings,
    FetchingLbMetadata,
    FetchingPreview,
    Rendered,
    Error(String),
}

impl PreviewPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingConflicts => "fetching_conflicts",
            Self::AwaitingBindings => "awaiting_bindings",
            Self::FetchingLbMetadata => "fetching_lb_metadata",
            Self::FetchingPreview => "fetching_preview",
            Self::Rendered => "rendered",
            Self::Error(_) => "error",
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(
            self,
            Self::FetchingConflicts | Self::FetchingLbMetadata | Self::FetchingPreview
        )
    }
}

/// Handle of one issued preview request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewTicket {
    pub namespace: NamespaceId,
    pub sequence: u64,
}

/// Preview state of one namespace
#[derive(Debug, Clone, Default)]
pub struct NamespacePreview {
    pub phase: PreviewPhase,
    pub manifests: Vec<PreviewManifest>,
    pub last_error: Option<String>,
    pub rendered_at: Option<DateTime<Utc>>,
}

/// Result of driving one preview request
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    /// Manifests substituted with the newest bindings
    Rendered(Vec<PreviewManifest>),
    /// LB-dependent services still lack a load balancer
    SelectionIncomplete {
        namespace: NamespaceId,
        unresolved: Vec<String>,
    },
    /// Superseded by a newer request; nothing was changed
    Discarded { namespace: NamespaceId, sequence: u64 },
}

/// Synchronous bookkeeping: focus, sequence numbers, phases and manifests
#[derive(Debug, Clone, Default)]
pub struct PreviewTracker {
    focused: Option<NamespaceId>,
    issued: HashMap<NamespaceId, u64>,
    previews: HashMap<NamespaceId, NamespacePreview>,
}

impl PreviewTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    /// Move focus to `namespace` and issue a request for it
    pub fn focus(&mut self, namespace: &str) -> PreviewTicket {
        if let Some(previous) = self.focused.take() {
            if previous != namespace {
                self.invalidate(&previous);
            }
        }
        self.focused = Some(namespace.to_string());
        self.issue(namespace)
    }

    /// Issue a new request for `namespace`, superseding earlier ones
    pub fn issue(&mut self, namespace: &str) -> PreviewTicket {
        let sequence = self.issued.entry(namespace.to_string()).or_insert(0);
        *sequence += 1;
        PreviewTicket {
            namespace: namespace.to_string(),
            sequence: *sequence,
        }
    }

    /// Abandon in-flight requests for `namespace`
    pub fn invalidate(&mut self, namespace: &str) {
        if let Some(sequence) = self.issued.get_mut(namespace) {
            *sequence += 1;
        }
        if let Some(preview) = self.previews.get_mut(namespace) {
            if preview.phase.is_fetching() || preview.phase == PreviewPhase::AwaitingBindings {
                preview.phase = if preview.manifests.is_empty() {
                    PreviewPhase::Idle
                } else {
                    PreviewPhase::Rendered
                };
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        let namespaces: Vec<NamespaceId> = self.issued.keys().cloned().collect();
        for namespace in namespaces {
            self.invalidate(&namespace);
        }
    }

    pub fn is_current(&self, ticket: &PreviewTicket) -> bool {
        self.issued.get(&ticket.namespace) == Some(&ticket.sequence)
    }

    /// Move a current request to `phase`; false when the ticket is stale
    pub fn advance(&mut self, ticket: &PreviewTicket, phase: PreviewPhase) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        log_preview_step!(phase.name(), ticket.namespace, ticket.sequence);
        self.previews
            .entry(ticket.namespace.clone())
            .or_default()
            .phase = phase;
        true
    }

    /// Replace the manifest list of a current request and render it
    pub fn complete(
        &mut self,
        ticket: &PreviewTicket,
        mut manifests: Vec<PreviewManifest>,
        substitution: &Substitution,
    ) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        substitution.render(&mut manifests);

        let preview = self.previews.entry(ticket.namespace.clone()).or_default();
        preview.manifests = manifests;
        preview.phase = PreviewPhase::Rendered;
        preview.last_error = None;
        preview.rendered_at = Some(Utc::now());
        true
    }

    /// Record a failure of a current request; rendered manifests are kept
    pub fn fail(&mut self, ticket: &PreviewTicket, message: String) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        let preview = self.previews.entry(ticket.namespace.clone()).or_default();
        preview.phase = PreviewPhase::Error(message.clone());
        preview.last_error = Some(message);
        true
    }

    /// Re-run substitution for `namespace` without any fetch
    pub fn rerender(&mut self, namespace: &str, substitution: &Substitution) -> Vec<PreviewManifest> {
        match self.previews.get_mut(namespace) {
            Some(preview) => {
                substitution.render(&mut preview.manifests);
                preview.manifests.clone()
            }
            None => Vec::new(),
        }
    }

    pub fn preview(&self, namespace: &str) -> Option<&NamespacePreview> {
        self.previews.get(namespace)
    }

    pub fn phase(&self, namespace: &str) -> PreviewPhase {
        self.previews
            .get(namespace)
            .map(|p| p.phase.clone())
            .unwrap_or_default()
    }

    pub fn manifests(&self, namespace: &str) -> &[PreviewManifest] {
        self.previews
            .get(namespace)
            .map(|p| p.manifests.as_slice())
            .unwrap_or(&[])
    }

    pub fn forget_namespace(&mut self, namespace: &str) {
        self.invalidate(namespace);
        self.previews.remove(namespace);
        if self.focused.as_deref() == Some(namespace) {
            self.focused = None;
        }
    }

    /// Drop every preview; counters survive so late responses are still discarded
    pub fn clear(&mut self) {
        self.invalidate_all();
        self.previews.clear();
        self.focused = None;
    }
}

/// What a request needs, captured under the lock before any await
struct PreviewPlan {
    version_id: String,
    resources: Vec<TemplateResource>,
    cluster_id: String,
    needs_conflicts: bool,
    needs_variables: bool,
}

/// Drives the async fetch sequence against the shared session state.
///
/// The lock is never held across an await; every continuation re-checks its
/// ticket before touching state.
pub struct PreviewOrchestrator {
    backend: Arc<dyn TemplateBackend>,
    state: Arc<RwLock<SessionState>>,
    config: EngineConfig,
}

impl PreviewOrchestrator {
    pub fn new(
        backend: Arc<dyn TemplateBackend>,
        state: Arc<RwLock<SessionState>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            state,
            config,
        }
    }

    /// Focus `namespace` and render its preview
    pub async fn focus(&self, namespace: &str) -> Result<PreviewOutcome> {
        let ticket = {
            let mut state = self.state.write().await;
            state.check_previewable(namespace)?;
            state.previews.focus(namespace)
        };
        tracing::info!(namespace = %namespace, sequence = ticket.sequence, "Namespace focused");
        self.drive(ticket).await
    }

    /// Re-issue the request for the focused namespace
    pub async fn refresh(&self) -> Result<PreviewOutcome> {
        let ticket = {
            let mut state = self.state.write().await;
            let namespace = state
                .previews
                .focused()
                .map(str::to_string)
                .ok_or(SelectionError::NoNamespacesSelected)?;
            state.check_previewable(&namespace)?;
            state.previews.issue(&namespace)
        };
        self.drive(ticket).await
    }

    async fn drive(&self, ticket: PreviewTicket) -> Result<PreviewOutcome> {
        let timeout = self.config.preview.request_timeout();

        let plan = {
            let mut state = self.state.write().await;
            let state = &mut *state;
            let Some(plan) = state.plan_preview(&ticket.namespace) else {
                return Ok(discarded(&ticket));
            };
            if !state.previews.advance(&ticket, PreviewPhase::FetchingConflicts) {
                return Ok(discarded(&ticket));
            }
            plan
        };

        if plan.needs_conflicts {
            let detector = ConflictDetector::new(self.backend.as_ref(), timeout);
            let fetched = detector
                .fetch(&plan.version_id, &plan.resources, &[ticket.namespace.clone()])
                .await;
            match fetched {
                Ok(existing) => {
                    let mut state = self.state.write().await;
                    if !state.previews.is_current(&ticket) {
                        return Ok(discarded(&ticket));
                    }
                    for (namespace, identities) in existing {
                        state.conflicts.record(namespace, identities);
                    }
                }
                Err(e) => return self.record_failure(&ticket, e).await,
            }
        }

        if !self.advance(&ticket, PreviewPhase::AwaitingBindings).await {
            return Ok(discarded(&ticket));
        }

        if plan.needs_variables {
            let fetched = with_timeout(
                timeout,
                "fetch_namespace_variables",
                self.backend.fetch_namespace_variables(&ticket.namespace),
            )
            .await;
            match fetched {
                Ok(defaults) => {
                    let mut state = self.state.write().await;
                    if !state.previews.is_current(&ticket) {
                        return Ok(discarded(&ticket));
                    }
                    state.bindings.initialize(&ticket.namespace, defaults);
                }
                Err(source) => {
                    let err = InstantiateError::VariableFetch {
                        namespace: ticket.namespace.clone(),
                        source,
                    };
                    return self.record_failure(&ticket, err).await;
                }
            }
        }

        let (requires_lb, catalog_known) = {
            let state = self.state.read().await;
            (
                state.load_balancers.requires_selection(),
                state.lb_catalog.contains_key(&plan.cluster_id),
            )
        };

        if requires_lb {
            if !self.advance(&ticket, PreviewPhase::FetchingLbMetadata).await {
                return Ok(discarded(&ticket));
            }

            if !catalog_known {
                let fetched = with_timeout(
                    timeout,
                    "fetch_load_balancers",
                    self.backend.fetch_load_balancers(&plan.cluster_id),
                )
                .await;
                match fetched {
                    Ok(load_balancers) => {
                        let mut state = self.state.write().await;
                        state
                            .lb_catalog
                            .insert(plan.cluster_id.clone(), load_balancers);
                        if !state.previews.is_current(&ticket) {
                            return Ok(discarded(&ticket));
                        }
                    }
                    Err(source) => {
                        let err = InstantiateError::LoadBalancerFetch {
                            cluster: plan.cluster_id.clone(),
                            source,
                        };
                        return self.record_failure(&ticket, err).await;
                    }
                }
            }

            let mut state = self.state.write().await;
            let unresolved = state.load_balancers.unresolved(&ticket.namespace);
            if !unresolved.is_empty() {
                if !state.previews.advance(&ticket, PreviewPhase::AwaitingBindings) {
                    return Ok(discarded(&ticket));
                }
                tracing::info!(
                    namespace = %ticket.namespace,
                    unresolved = unresolved.len(),
                    "Preview waiting for load balancer selection"
                );
                return Ok(PreviewOutcome::SelectionIncomplete {
                    namespace: ticket.namespace.clone(),
                    unresolved,
                });
            }
        }

        let request = {
            let mut state = self.state.write().await;
            if !state.previews.advance(&ticket, PreviewPhase::FetchingPreview) {
                return Ok(discarded(&ticket));
            }
            PreviewRequest {
                template_set_version_id: plan.version_id.clone(),
                namespace_id: ticket.namespace.clone(),
                resources: plan.resources.iter().map(TemplateResource::key).collect(),
                variables: state.bindings.variable_map(&ticket.namespace),
                load_balancers: state.load_balancers.resolved_map(&ticket.namespace),
            }
        };

        let fetched = with_timeout(timeout, "fetch_preview", self.backend.fetch_preview(&request)).await;
        let manifests = match fetched {
            Ok(manifests) => manifests,
            Err(source) => {
                let err = InstantiateError::PreviewFetch {
                    namespace: ticket.namespace.clone(),
                    source,
                };
                return self.record_failure(&ticket, err).await;
            }
        };

        let mut state = self.state.write().await;
        let state = &mut *state;
        if !state.previews.is_current(&ticket) {
            return Ok(discarded(&ticket));
        }

        // Substitute with the bindings as they are now, not as they were at fetch time
        let substitution = Substitution::compile(
            state.bindings.bindings(&ticket.namespace),
            &self.config.substitution,
        )?;
        state.previews.complete(&ticket, manifests, &substitution);

        let rendered = state.previews.manifests(&ticket.namespace).to_vec();
        tracing::info!(
            namespace = %ticket.namespace,
            sequence = ticket.sequence,
            manifests = rendered.len(),
            "Preview rendered"
        );
        Ok(PreviewOutcome::Rendered(rendered))
    }

    async fn advance(&self, ticket: &PreviewTicket, phase: PreviewPhase) -> bool {
        self.state.write().await.previews.advance(ticket, phase)
    }

    async fn record_failure(
        &self,
        ticket: &PreviewTicket,
        err: InstantiateError,
    ) -> Result<PreviewOutcome> {
        let mut state = self.state.write().await;
        if !state.previews.fail(ticket, err.to_string()) {
            return Ok(discarded(ticket));
        }
        tracing::warn!(
            namespace = %ticket.namespace,
            sequence = ticket.sequence,
            "Preview failed: {}",
            err
        );
        Err(err)
    }
}

fn discarded(ticket: &PreviewTicket) -> PreviewOutcome {
    tracing::debug!(
        namespace = %ticket.namespace,
        sequence = ticket.sequence,
        "Discarding stale preview response"
    );
    PreviewOutcome::Discarded {
        namespace: ticket.namespace.clone(),
        sequence: ticket.sequence,
    }
}

impl SessionState {
    fn plan_preview(&self, namespace: &str) -> Option<PreviewPlan> {
        let version = self.version.as_ref()?;
        let cluster_id = self.namespace(namespace)?.cluster_id.clone();
        Some(PreviewPlan {
            version_id: version.id.clone(),
            resources: self.selected_resources(),
            cluster_id,
            needs_conflicts: !self.conflicts.is_indexed(namespace),
            needs_variables: !self.bindings.contains(namespace),
        })
    }

    fn check_previewable(&self, namespace: &str) -> std::result::Result<(), SelectionError> {
        if self.version.is_none() {
            return Err(SelectionError::NoVersionSelected);
        }
        if self.namespace(namespace).is_none() {
            return Err(SelectionError::UnknownNamespace(namespace.to_string()));
        }
        if self.selected_resources().is_empty() {
            return Err(SelectionError::NoResourcesSelected);
        }
        Ok(())
    }
}
