//! Mapping engine plans and states to machines

use std::collections::BTreeMap;

use stackwright_common::Error;

use crate::dial::{agent_query_string, DialState, Klients};
use crate::engine::{EngineState, PlanOutput};
use crate::machine::{MachineDescriptor, MachineState};

/// Reason recorded on machines whose agent answered
pub const RUNNING_REASON: &str = "Created with stackwright.";

/// Machines read from a state snapshot
#[derive(Debug, Default)]
pub struct StateMachines {
    /// Machines keyed by label
    pub machines: BTreeMap<String, MachineDescriptor>,
    /// State resources that could not be mapped
    pub problems: Vec<Error>,
}

/// Maps resources of one provider resource type to machines
#[derive(Clone, Debug)]
pub struct Planner {
    /// Provider name, e.g. `example`
    pub provider: String,
    /// Resource type without provider prefix, e.g. `instance`
    pub resource_type: String,
}

impl Planner {
    /// Create a planner for `{provider}_{resource_type}` resources
    pub fn new(provider: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Full engine resource type, e.g. `example_instance`
    pub fn full_type(&self) -> String {
        format!("{}_{}", self.provider, self.resource_type)
    }

    /// Machines a plan would build, ordered by label
    pub fn machines_from_plan(&self, plan: &PlanOutput) -> Vec<MachineDescriptor> {
        let full_type = self.full_type();
        let mut machines: Vec<_> = plan
            .resources
            .iter()
            .filter(|r| r.resource_type == full_type)
            .map(|r| MachineDescriptor {
                provider: self.provider.clone(),
                label: r.name.clone(),
                region: r.attributes.get("region").cloned().unwrap_or_default(),
                query_string: String::new(),
                state: MachineState::NotInitialized,
                state_reason: String::new(),
                attributes: r.attributes.clone(),
            })
            .collect();
        machines.sort_by(|a, b| a.label.cmp(&b.label));
        machines
    }

    /// Machines realized in `state`, combined with their dial results
    pub fn machines_from_state(&self, state: &EngineState, klients: &Klients) -> StateMachines {
        let full_type = self.full_type();
        let mut result = StateMachines::default();

        for resource in state.resources.iter().filter(|r| r.resource_type == full_type) {
            if !resource.attributes.contains_key("id") {
                result.problems.push(Error::reconciliation(
                    resource.name.clone(),
                    "state resource has no \"id\" attribute",
                ));
                continue;
            }

            let (machine_state, reason, query_string) = match klients.get(&resource.name) {
                Some(DialState::Connected { agent_id }) => (
                    MachineState::Running,
                    RUNNING_REASON.to_string(),
                    agent_query_string(agent_id),
                ),
                Some(DialState::Failed { agent_id, reason }) => (
                    MachineState::Stopped,
                    reason.clone(),
                    agent_query_string(agent_id),
                ),
                None => (MachineState::Unknown, String::new(), String::new()),
            };

            result.machines.insert(
                resource.name.clone(),
                MachineDescriptor {
                    provider: self.provider.clone(),
                    label: resource.name.clone(),
                    region: resource
                        .attributes
                        .get("region")
                        .cloned()
                        .unwrap_or_default(),
                    query_string,
                    state: machine_state,
                    state_reason: reason,
                    attributes: resource.attributes.clone(),
                },
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PlannedResource, StateResource};

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn planner() -> Planner {
        Planner::new("example", "instance")
    }

    #[test]
    fn test_plan_keeps_only_provider_resources() {
        let plan = PlanOutput {
            resources: vec![
                PlannedResource {
                    resource_type: "example_instance".into(),
                    name: "web-2".into(),
                    attributes: attrs(&[("region", "eu-west-1")]),
                },
                PlannedResource {
                    resource_type: "example_bucket".into(),
                    name: "logs".into(),
                    attributes: BTreeMap::new(),
                },
                PlannedResource {
                    resource_type: "example_instance".into(),
                    name: "web-1".into(),
                    attributes: BTreeMap::new(),
                },
            ],
        };

        let machines = planner().machines_from_plan(&plan);
        let labels: Vec<_> = machines.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["web-1", "web-2"]);
        assert_eq!(machines[1].region, "eu-west-1");
        assert!(machines
            .iter()
            .all(|m| m.state == MachineState::NotInitialized && m.provider == "example"));
    }

    #[test]
    fn test_state_maps_dial_results() {
        let state = EngineState {
            outputs: BTreeMap::new(),
            resources: vec![
                StateResource {
                    resource_type: "example_instance".into(),
                    name: "web-1".into(),
                    attributes: attrs(&[("id", "i-1"), ("public_ip", "1.2.3.4")]),
                },
                StateResource {
                    resource_type: "example_instance".into(),
                    name: "web-2".into(),
                    attributes: attrs(&[("id", "i-2")]),
                },
                StateResource {
                    resource_type: "example_instance".into(),
                    name: "web-3".into(),
                    attributes: attrs(&[("id", "i-3")]),
                },
            ],
        };
        let klients = Klients::from([
            (
                "web-1".to_string(),
                DialState::Connected {
                    agent_id: "a-1".into(),
                },
            ),
            (
                "web-2".to_string(),
                DialState::Failed {
                    agent_id: "a-2".into(),
                    reason: "connection refused".into(),
                },
            ),
        ]);

        let mapped = planner().machines_from_state(&state, &klients);
        assert!(mapped.problems.is_empty());

        let web1 = &mapped.machines["web-1"];
        assert_eq!(web1.state, MachineState::Running);
        assert_eq!(web1.state_reason, RUNNING_REASON);
        assert_eq!(web1.query_string, "///////a-1");

        let web2 = &mapped.machines["web-2"];
        assert_eq!(web2.state, MachineState::Stopped);
        assert_eq!(web2.state_reason, "connection refused");

        assert_eq!(mapped.machines["web-3"].state, MachineState::Unknown);
    }

    #[test]
    fn test_state_resource_without_id_is_a_problem() {
        let state = EngineState {
            outputs: BTreeMap::new(),
            resources: vec![StateResource {
                resource_type: "example_instance".into(),
                name: "web-1".into(),
                attributes: attrs(&[("public_ip", "1.2.3.4")]),
            }],
        };

        let mapped = planner().machines_from_state(&state, &Klients::new());
        assert!(mapped.machines.is_empty());
        assert_eq!(mapped.problems.len(), 1);
        assert_eq!(mapped.problems[0].machine(), Some("web-1"));
    }
}
