//! Step dependency graph

use std::collections::{HashMap, VecDeque};

use crate::error::PlanError;
use crate::plan::{PlanStep, StepId};

/// Node in the dependency graph
#[derive(Debug, Clone, PartialEq)]
struct GraphNode {
    /// Steps that must complete first
    depends_on: Vec<StepId>,
    /// Steps waiting on this one
    dependents: Vec<StepId>,
}

/// Dependency graph over a plan's steps.
///
/// Building the graph proves step ids are unique and that every
/// `depends_on` entry resolves; acyclicity is a separate question answered
/// by [`StepGraph::topological_order`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepGraph {
    nodes: HashMap<StepId, GraphNode>,
    /// Step ids in plan order
    order: Vec<StepId>,
}

impl StepGraph {
    pub fn build(steps: &[PlanStep]) -> Result<Self, PlanError> {
        let mut nodes = HashMap::with_capacity(steps.len());
        let mut order = Vec::with_capacity(steps.len());

        for step in steps {
            let node = GraphNode {
                depends_on: step.depends_on.clone(),
                dependents: Vec::new(),
            };
            if nodes.insert(step.step_id.clone(), node).is_some() {
                return Err(PlanError::DuplicateStepId(step.step_id.clone()));
            }
            order.push(step.step_id.clone());
        }

        for step in steps {
            for dep in &step.depends_on {
                match nodes.get_mut(dep) {
                    Some(parent) => parent.dependents.push(step.step_id.clone()),
                    None => {
                        return Err(PlanError::UnknownDependency {
                            step: step.step_id.clone(),
                            missing: dep.clone(),
                        })
                    }
                }
            }
        }

        Ok(Self { nodes, order })
    }

    /// Kahn's algorithm.
    ///
    /// Returns `None` when the graph has a cycle. Ready steps are released
    /// in plan order, so the result is deterministic.
    pub fn topological_order(&self) -> Option<Vec<StepId>> {
        let mut in_degree: HashMap<&StepId, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (id, node.depends_on.len()))
            .collect();

        let mut queue: VecDeque<&StepId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id.clone());
            for dependent in self.dependents(id) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        (sorted.len() == self.order.len()).then_some(sorted)
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_some()
    }

    /// Steps with no dependencies
    pub fn roots(&self) -> Vec<StepId> {
        self.order
            .iter()
            .filter(|id| self.dependencies(id).is_empty())
            .cloned()
            .collect()
    }

    /// Steps nothing depends on
    pub fn leaves(&self) -> Vec<StepId> {
        self.order
            .iter()
            .filter(|id| self.dependents(id).is_empty())
            .cloned()
            .collect()
    }

    pub fn dependencies(&self, id: &StepId) -> &[StepId] {
        self.nodes.get(id).map(|n| n.depends_on.as_slice()).unwrap_or_default()
    }

    pub fn dependents(&self, id: &StepId) -> &[StepId] {
        self.nodes.get(id).map(|n| n.dependents.as_slice()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
