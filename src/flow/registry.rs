//! Named controllers and the destination → flow routing table.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{info, warn};

use super::controller::{FlowDeps, StepController};
use crate::config::{FlowPlan, INTAKE_FLOW};
use crate::error::FlowError;

/// Holds one controller per flow name. Built once at startup.
#[derive(Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, Arc<StepController>>,
    routes: HashMap<String, String>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a controller for every plan. The landing flow's `next`
    /// destination hands over to the intake flow when one is defined.
    pub fn from_plans(plans: BTreeMap<String, FlowPlan>, deps: FlowDeps) -> crate::error::Result<Self> {
        let mut registry = Self::new();
        for (name, plan) in plans {
            let controller = StepController::new(name.clone(), plan, deps.clone())
                .inspect_err(|e| warn!(flow = %name, error = %e, "Rejected flow plan"))?;
            registry.register(controller);
        }
        if registry.flows.contains_key(INTAKE_FLOW) {
            registry.route("next", INTAKE_FLOW);
        }
        Ok(registry)
    }

    pub fn register(&mut self, controller: Arc<StepController>) {
        let name = controller.name().to_string();
        if self.flows.insert(name.clone(), controller).is_some() {
            warn!(flow = %name, "Replaced an already registered flow");
        }
    }

    /// Map a navigation destination onto a flow, so a handoff to
    /// `destination` starts `flow`.
    pub fn route(&mut self, destination: impl Into<String>, flow: impl Into<String>) {
        self.routes.insert(destination.into(), flow.into());
    }

    pub fn get(&self, name: &str) -> Result<Arc<StepController>, FlowError> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownFlow(name.to_string()))
    }

    /// Flow a destination is routed to, if any. Destinations not routed are
    /// left to the presentation layer.
    pub fn resolve(&self, destination: &str) -> Option<Arc<StepController>> {
        let flow = self.routes.get(destination)?;
        self.flows.get(flow).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.flows.keys().cloned().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<StepController>> {
        self.flows.values()
    }

    /// Stop every running session. Used on shutdown.
    pub async fn stop_all(&self) {
        for controller in self.flows.values() {
            if controller.stop().await.is_ok() {
                info!(flow = %controller.name(), "Stopped on shutdown");
            }
        }
    }
}
