use crate::error::ValidationError;
use crate::types::{
    StepDefinition, Workflow, WorkflowDefinition, WorkflowId, WorkflowStatus, WorkflowStep,
};
use chrono::Utc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};

/// DAG representation of a workflow, keyed by step name.
///
/// Edges run from a dependency to its dependent.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    graph: DiGraph<String, ()>,
    step_indices: HashMap<String, NodeIndex>,
}

/// A definition that passed validation, with its dependency graph.
#[derive(Debug, Clone)]
pub struct ValidatedWorkflow {
    pub definition: WorkflowDefinition,
    pub dag: WorkflowDag,
}

impl ValidatedWorkflow {
    /// Materialize a fresh `pending` workflow with every step `waiting`
    pub fn into_workflow(self) -> Workflow {
        let definition = self.definition;
        Workflow {
            id: WorkflowId::new(),
            name: definition.name,
            description: definition.description,
            session_id: definition.session_id,
            status: WorkflowStatus::Pending,
            cancel_requested: false,
            steps: definition
                .steps
                .into_iter()
                .map(WorkflowStep::from_definition)
                .collect(),
            results: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Check a definition for structural correctness.
///
/// Repeated `depends_on` entries collapse to their first occurrence.
pub fn validate(mut definition: WorkflowDefinition) -> Result<ValidatedWorkflow, ValidationError> {
    let mut names = HashSet::new();
    for step in &definition.steps {
        if !names.insert(step.name.as_str()) {
            return Err(ValidationError::DuplicateStepName {
                name: step.name.clone(),
            });
        }
    }

    for step in &mut definition.steps {
        dedup_dependencies(step);
        if step.depends_on.iter().any(|d| d == &step.name) {
            return Err(ValidationError::SelfDependency {
                step: step.name.clone(),
            });
        }
    }

    let dag = WorkflowDag::build(
        definition
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.depends_on.as_slice())),
    )?;

    Ok(ValidatedWorkflow { definition, dag })
}

fn dedup_dependencies(step: &mut StepDefinition) {
    let mut seen = HashSet::new();
    step.depends_on.retain(|d| seen.insert(d.clone()));
}

impl WorkflowDag {
    /// Build the graph from `(name, depends_on)` pairs, rejecting unknown
    /// references and cycles.
    pub fn build<'a, I>(steps: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let steps: Vec<(&str, &[String])> = steps.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        for (name, _) in &steps {
            let node = graph.add_node(name.to_string());
            step_indices.insert(name.to_string(), node);
        }

        for (name, deps) in &steps {
            let step_idx = step_indices[*name];
            for dep in deps.iter() {
                let dep_idx = step_indices.get(dep.as_str()).ok_or_else(|| {
                    ValidationError::UnknownDependency {
                        step: name.to_string(),
                        dependency: dep.clone(),
                    }
                })?;
                graph.update_edge(*dep_idx, step_idx, ());
            }
        }

        let dag = Self {
            graph,
            step_indices,
        };

        if let Some(cycle) = dag.find_cycle() {
            return Err(ValidationError::CyclicDependency { cycle });
        }

        Ok(dag)
    }

    /// Rebuild the graph for a stored workflow.
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, ValidationError> {
        Self::build(
            workflow
                .steps
                .iter()
                .map(|s| (s.name.as_str(), s.depends_on.as_slice())),
        )
    }

    /// Depth-first search over every node; reaching a node that is still in
    /// progress closes a cycle. Returns the cycle path, first node repeated at
    /// the end.
    /// The search is iterative over a stack of `(node, unvisited neighbors)`.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();

        for start in self.graph.node_indices() {
            if marks.contains_key(&start) {
                continue;
            }

            marks.insert(start, Mark::InProgress);
            let mut stack = vec![(start, self.graph.neighbors_directed(start, Direction::Outgoing))];

            loop {
                let Some((node, neighbors)) = stack.last_mut() else {
                    break;
                };
                let node = *node;

                match neighbors.next() {
                    Some(next) => match marks.get(&next) {
                        Some(Mark::InProgress) => {
                            let begin = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                            let mut cycle: Vec<String> = stack[begin..]
                                .iter()
                                .map(|(n, _)| self.graph[*n].clone())
                                .collect();
                            cycle.push(self.graph[next].clone());
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(next, Mark::InProgress);
                            stack.push((next, self.graph.neighbors_directed(next, Direction::Outgoing)));
                        }
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        stack.pop();
                    }
                }
            }
        }
        None
    }

    /// Names of the steps `name` depends on
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        match self.step_indices.get(name) {
            Some(node) => self
                .graph
                .neighbors_directed(*node, Direction::Incoming)
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition::new(name, "zero_shot", format!("do {}", name)).depends_on(deps.to_vec())
    }

    fn definition(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".to_string(),
            description: None,
            steps,
            session_id: None,
        }
    }

    #[test]
    fn test_linear_dag() {
        let validated = validate(definition(vec![
            step("step1", &[]),
            step("step2", &["step1"]),
            step("step3", &["step2"]),
        ]))
        .unwrap();

        assert!(validated.dag.dependencies("step1").is_empty());
        assert_eq!(validated.dag.dependencies("step2"), vec!["step1"]);
        assert_eq!(validated.dag.dependencies("step3"), vec!["step2"]);
        assert!(validated.dag.dependencies("missing").is_empty());
    }

    #[test]
    fn test_parallel_dag() {
        let validated = validate(definition(vec![
            step("step1", &[]),
            step("step2", &[]),
            step("step3", &["step1", "step2"]),
            step("step4", &["step3"]),
        ]))
        .unwrap();

        let mut joined = validated.dag.dependencies("step3");
        joined.sort();
        assert_eq!(joined, vec!["step1", "step2"]);
        assert_eq!(validated.dag.dependencies("step4"), vec!["step3"]);
    }

    #[test]
    fn test_into_workflow_starts_pending() {
        let wf = validate(definition(vec![step("a", &[]), step("b", &["a"])]))
            .unwrap()
            .into_workflow();
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert!(wf.steps.iter().all(|s| s.status == crate::types::StepStatus::Waiting));
        assert_ne!(wf.steps[0].id, wf.steps[1].id);
        assert!(wf.started_at.is_none());
        assert!(WorkflowDag::from_workflow(&wf).is_ok());
    }

    #[test]
    fn test_empty_definition_is_valid() {
        let validated = validate(definition(vec![])).unwrap();
        assert!(validated.into_workflow().steps.is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = validate(definition(vec![step("a", &[]), step("a", &[])])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateStepName {
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = validate(definition(vec![step("C", &["X"])])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownDependency {
                step: "C".to_string(),
                dependency: "X".to_string()
            }
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = validate(definition(vec![step("a", &["a"])])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::SelfDependency {
                step: "a".to_string()
            }
        );
    }

    #[test]
    fn test_cyclic_dag_rejected() {
        let err = validate(definition(vec![step("A", &["B"]), step("B", &["A"])])).unwrap_err();
        match err {
            ValidationError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 3);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_long_cycle_reports_path() {
        let err = validate(definition(vec![
            step("entry", &[]),
            step("a", &["entry", "c"]),
            step("b", &["a"]),
            step("c", &["b"]),
        ]))
        .unwrap_err();

        let ValidationError::CyclicDependency { cycle } = err else {
            panic!("expected cycle");
        };
        assert!(!cycle.contains(&"entry".to_string()));
        for name in ["a", "b", "c"] {
            assert!(cycle.contains(&name.to_string()));
        }
        assert!(err_message_lists_cycle(&cycle));
    }

    fn err_message_lists_cycle(cycle: &[String]) -> bool {
        let msg = ValidationError::CyclicDependency {
            cycle: cycle.to_vec(),
        }
        .to_string();
        msg.starts_with("cyclic dependency: ") && msg.contains(" -> ")
    }

    #[test]
    fn test_repeated_dependency_collapses() {
        let validated = validate(definition(vec![step("a", &[]), step("b", &["a", "a"])])).unwrap();
        assert_eq!(validated.definition.steps[1].depends_on, vec!["a"]);
        assert_eq!(validated.dag.dependencies("b"), vec!["a"]);
    }

    #[test]
    fn test_diamond_accepted() {
        let validated = validate(definition(vec![
            step("root", &[]),
            step("left", &["root"]),
            step("right", &["root"]),
            step("join", &["left", "right"]),
        ]))
        .unwrap();

        let mut joined = validated.dag.dependencies("join");
        joined.sort();
        assert_eq!(joined, vec!["left", "right"]);
    }

    fn chain(len: usize) -> Vec<StepDefinition> {
        (0..len)
            .map(|i| {
                let deps = if i == 0 { vec![] } else { vec![format!("s{}", i - 1)] };
                StepDefinition::new(format!("s{}", i), "zero_shot", "go").depends_on(deps)
            })
            .collect()
    }

    #[test]
    fn test_very_long_chain_accepted() {
        let validated = validate(definition(chain(100_000))).unwrap();
        assert_eq!(validated.dag.dependencies("s99999"), vec!["s99998"]);
    }

    #[test]
    fn test_very_long_cycle_reports_whole_path() {
        let mut steps = chain(100_000);
        steps[0].depends_on = vec!["s99999".to_string()];

        let err = validate(definition(steps)).unwrap_err();
        let ValidationError::CyclicDependency { cycle } = err else {
            panic!("expected cycle");
        };
        assert_eq!(cycle.len(), 100_001);
        assert_eq!(cycle.first(), cycle.last());
    }
}
