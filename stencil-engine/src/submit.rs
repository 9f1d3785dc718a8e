//! Create-instance request assembly
//!
//! Assembly is all-or-nothing: any selection problem yields an error, never
//! a partial payload, and nothing is sent.

use crate::backend::{with_timeout, TemplateBackend};
use crate::bindings::BindingStore;
use crate::conflicts::ExistingResourceIndex;
use crate::error::{InstantiateError, Result, SelectionError};
use crate::loadbalancer::LbResolutionTable;
use std::collections::BTreeMap;
use std::time::Duration;
use stencil_common::{
    InstantiationPayload, InstantiationResult, NamespaceId, TemplateResource, TemplateSetVersion,
};

/// Everything assembly reads
pub struct SubmissionInput<'a> {
    pub version: Option<&'a TemplateSetVersion>,
    pub resources: &'a [TemplateResource],
    pub namespaces: &'a [NamespaceId],
    pub bindings: &'a BindingStore,
    pub load_balancers: &'a LbResolutionTable,
    /// When present, namespaces already holding a selected resource are refused,
    /// and so are namespaces the index has no entry for
    pub conflicts: Option<&'a ExistingResourceIndex>,
}

pub fn assemble(input: &SubmissionInput<'_>) -> std::result::Result<InstantiationPayload, SelectionError> {
    let version = input.version.ok_or(SelectionError::NoVersionSelected)?;

    if input.resources.is_empty() {
        return Err(SelectionError::NoResourcesSelected);
    }
    if input.namespaces.is_empty() {
        return Err(SelectionError::NoNamespacesSelected);
    }

    for namespace in input.namespaces {
        let unresolved = input.load_balancers.unresolved(namespace);
        if !unresolved.is_empty() {
            return Err(SelectionError::UnresolvedLoadBalancers {
                namespace: namespace.clone(),
                services: unresolved,
            });
        }

        if let Some(index) = input.conflicts {
            if !index.is_indexed(namespace) {
                return Err(SelectionError::ConflictsUnchecked(namespace.clone()));
            }
            let conflicts = index.conflicts_for(namespace, input.resources);
            if !conflicts.is_empty() {
                return Err(SelectionError::ConflictingResources {
                    namespace: namespace.clone(),
                    resources: conflicts,
                });
            }
        }
    }

    let variables = input
        .namespaces
        .iter()
        .map(|ns| (ns.clone(), input.bindings.variable_map(ns)))
        .collect();

    let load_balancers = if input.load_balancers.requires_selection() {
        let mut map = BTreeMap::new();
        for namespace in input.namespaces {
            if let Some(resolved) = input.load_balancers.resolved_map(namespace) {
                map.insert(namespace.clone(), resolved);
            }
        }
        Some(map)
    } else {
        None
    };

    Ok(InstantiationPayload {
        template_set_version_id: version.id.clone(),
        resources: input.resources.iter().map(TemplateResource::key).collect(),
        namespace_ids: input.namespaces.to_vec(),
        variables,
        load_balancers,
    })
}

/// Send an assembled payload
pub async fn submit(
    backend: &dyn TemplateBackend,
    payload: &InstantiationPayload,
    timeout: Duration,
) -> Result<InstantiationResult> {
    tracing::info!(
        version = %payload.template_set_version_id,
        namespaces = payload.namespace_ids.len(),
        resources = payload.resources.len(),
        "Submitting instantiation"
    );

    let result = with_timeout(timeout, "submit_instantiation", backend.submit_instantiation(payload))
        .await
        .map_err(|e| {
            tracing::warn!("Instantiation submit failed: {}", e);
            InstantiateError::Submit(e)
        })?;

    if !result.is_complete() {
        tracing::warn!(
            failed = result.failed.len(),
            succeeded = result.succeeded.len(),
            "Instantiation partially failed"
        );
    }

    Ok(result)
}
