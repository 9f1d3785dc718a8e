//! Load balancer resolution table: `namespace x service -> load balancer`

use std::collections::{BTreeMap, BTreeSet};
use stencil_common::{LoadBalancerId, NamespaceId, TemplateResource, UNRESOLVED_LOAD_BALANCER};

#[derive(Debug, Clone, Default)]
pub struct LbResolutionTable {
    /// LB-dependent services of the current template set selection
    required: BTreeSet<String>,
    cells: BTreeMap<NamespaceId, BTreeMap<String, LoadBalancerId>>,
}

impl LbResolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the required services from a resource selection
    pub fn set_required_from(&mut self, resources: &[TemplateResource]) {
        self.set_required_services(
            resources
                .iter()
                .filter(|r| r.requires_load_balancer())
                .map(|r| r.name.clone()),
        );
    }

    pub fn set_required_services(&mut self, services: impl IntoIterator<Item = String>) {
        self.required = services.into_iter().collect();
    }

    pub fn required_services(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    pub fn requires_selection(&self) -> bool {
        !self.required.is_empty()
    }

    /// Point update. [`UNRESOLVED_LOAD_BALANCER`] or any other negative id clears the cell.
    pub fn assign(&mut self, namespace: &str, service: &str, load_balancer: LoadBalancerId) {
        if load_balancer <= UNRESOLVED_LOAD_BALANCER {
            self.clear(namespace, service);
            return;
        }
        self.cells
            .entry(namespace.to_string())
            .or_default()
            .insert(service.to_string(), load_balancer);
    }

    pub fn clear(&mut self, namespace: &str, service: &str) {
        if let Some(row) = self.cells.get_mut(namespace) {
            row.remove(service);
        }
    }

    pub fn get(&self, namespace: &str, service: &str) -> Option<LoadBalancerId> {
        self.cells.get(namespace)?.get(service).copied()
    }

    /// Required services of `namespace` without a load balancer
    pub fn unresolved(&self, namespace: &str) -> Vec<String> {
        self.required
            .iter()
            .filter(|service| self.get(namespace, service).is_none())
            .cloned()
            .collect()
    }

    pub fn is_namespace_ready(&self, namespace: &str) -> bool {
        self.unresolved(namespace).is_empty()
    }

    /// Resolved cells of the required services, or `None` when nothing is required
    pub fn resolved_map(&self, namespace: &str) -> Option<BTreeMap<String, LoadBalancerId>> {
        if !self.requires_selection() {
            return None;
        }
        Some(
            self.required
                .iter()
                .filter_map(|service| {
                    self.get(namespace, service)
                        .map(|lb| (service.clone(), lb))
                })
                .collect(),
        )
    }

    pub fn forget_namespace(&mut self, namespace: &str) {
        self.cells.remove(namespace);
    }

    pub fn clear_all(&mut self) {
        self.required.clear();
        self.cells.clear();
    }
}
