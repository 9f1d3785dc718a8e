//! Conflict detection against already instantiated resources
//!
//! The index is valid for one `(version, selection)` pair. Changing either
//! drops every entry; removing a namespace drops its entry.

use crate::backend::{with_timeout, TemplateBackend};
use crate::error::{InstantiateError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use stencil_common::{NamespaceId, ResourceIdentity, ResourceKey, TemplateResource};

/// What the current index entries were computed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictKey {
    pub version_id: String,
    pub selection: BTreeSet<ResourceKey>,
}

impl ConflictKey {
    pub fn new(version_id: &str, resources: &[TemplateResource]) -> Self {
        Self {
            version_id: version_id.to_string(),
            selection: resources.iter().map(TemplateResource::key).collect(),
        }
    }
}

/// Per-namespace set of `(kind, name)` pairs that already exist
#[derive(Debug, Clone, Default)]
pub struct ExistingResourceIndex {
    key: Option<ConflictKey>,
    entries: HashMap<NamespaceId, HashSet<ResourceIdentity>>,
}

impl ExistingResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the index at `key`, dropping all entries if it changed
    pub fn sync_key(&mut self, key: ConflictKey) -> bool {
        if self.key.as_ref() == Some(&key) {
            return false;
        }
        tracing::debug!(version = %key.version_id, "Conflict index invalidated");
        self.entries.clear();
        self.key = Some(key);
        true
    }

    /// Drop entries of namespaces no longer in the candidate list
    pub fn retain_namespaces(&mut self, namespaces: &[NamespaceId]) {
        self.entries.retain(|ns, _| namespaces.contains(ns));
    }

    pub fn is_indexed(&self, namespace: &str) -> bool {
        self.entries.contains_key(namespace)
    }

    pub fn record(&mut self, namespace: NamespaceId, existing: HashSet<ResourceIdentity>) {
        self.entries.insert(namespace, existing);
    }

    pub fn existing(&self, namespace: &str) -> Option<&HashSet<ResourceIdentity>> {
        self.entries.get(namespace)
    }

    /// Selected resources that already exist in `namespace`, sorted
    pub fn conflicts_for(
        &self,
        namespace: &str,
        resources: &[TemplateResource],
    ) -> Vec<ResourceIdentity> {
        let Some(existing) = self.entries.get(namespace) else {
            return Vec::new();
        };

        resources
            .iter()
            .map(TemplateResource::identity)
            .filter(|identity| existing.contains(identity))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_submittable(&self, namespace: &str, resources: &[TemplateResource]) -> bool {
        self.conflicts_for(namespace, resources).is_empty()
    }

    pub fn report(&self, resources: &[TemplateResource]) -> ConflictReport {
        let conflicts = self
            .entries
            .keys()
            .map(|ns| (ns.clone(), self.conflicts_for(ns, resources)))
            .filter(|(_, conflicts)| !conflicts.is_empty())
            .collect();

        ConflictReport { conflicts }
    }

    pub fn clear(&mut self) {
        self.key = None;
        self.entries.clear();
    }
}

/// Conflicting identities per namespace; namespaces without conflicts are absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub conflicts: BTreeMap<NamespaceId, Vec<ResourceIdentity>>,
}

impl ConflictReport {
    pub fn is_blocked(&self, namespace: &str) -> bool {
        self.conflicts.contains_key(namespace)
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Fetches existing resources for namespaces the index does not know yet
pub struct ConflictDetector<'a> {
    backend: &'a dyn TemplateBackend,
    timeout: Duration,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(backend: &'a dyn TemplateBackend, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Query the platform for `namespaces`.
    ///
    /// Every requested namespace appears in the result; those the platform
    /// leaves out hold no existing resources. Failures are returned, never
    /// treated as "no conflicts".
    pub async fn fetch(
        &self,
        version_id: &str,
        resources: &[TemplateResource],
        namespaces: &[NamespaceId],
    ) -> Result<HashMap<NamespaceId, HashSet<ResourceIdentity>>> {
        if namespaces.is_empty() {
            return Ok(HashMap::new());
        }

        let selection: Vec<ResourceKey> = resources.iter().map(TemplateResource::key).collect();
        tracing::info!(
            version = %version_id,
            namespaces = namespaces.len(),
            resources = selection.len(),
            "Checking for existing resources"
        );

        let mut existing = with_timeout(
            self.timeout,
            "fetch_existing_resources",
            self.backend
                .fetch_existing_resources(version_id, namespaces, &selection),
        )
        .await
        .map_err(|e| {
            tracing::warn!(version = %version_id, "Existing resource check failed: {}", e);
            InstantiateError::ConflictFetch(e)
        })?;

        existing.retain(|ns, _| namespaces.contains(ns));
        for namespace in namespaces {
            existing.entry(namespace.clone()).or_default();
        }

        Ok(existing)
    }
}
