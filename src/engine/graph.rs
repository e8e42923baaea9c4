// SPDX-License-Identifier: MIT

//! Static step graph and its validation

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use super::step::Step;
use crate::error::{EngineError, GraphViolation};

/// A validated directed acyclic graph of steps with one start and one end
#[derive(Debug, Clone)]
pub struct Graph {
    steps: HashMap<String, Step>,
    /// Steps in topological order (declaration order breaks ties)
    order: Vec<String>,
    /// Reverse adjacency, predecessors in declaration order
    predecessors: HashMap<String, Vec<String>>,
    start: String,
    end: String,
}

impl Graph {
    /// Validate the steps and build a graph
    pub fn new(steps: Vec<Step>) -> Result<Self, EngineError> {
        if steps.is_empty() {
            return Err(GraphViolation::Empty.into());
        }

        let declared: Vec<String> = steps.iter().map(|s| s.name().to_string()).collect();
        let mut map: HashMap<String, Step> = HashMap::with_capacity(steps.len());
        for step in steps {
            if map.contains_key(step.name()) {
                return Err(GraphViolation::DuplicateStep(step.name().to_string()).into());
            }
            map.insert(step.name().to_string(), step);
        }

        let mut predecessors: HashMap<String, Vec<String>> =
            declared.iter().map(|n| (n.clone(), Vec::new())).collect();

        for name in &declared {
            let step = &map[name];
            let mut seen = HashSet::new();
            for next in step.successors() {
                if !map.contains_key(next) {
                    return Err(GraphViolation::DanglingEdge {
                        from: name.clone(),
                        to: next.clone(),
                    }
                    .into());
                }
                if !seen.insert(next) {
                    return Err(GraphViolation::DuplicateEdge {
                        from: name.clone(),
                        to: next.clone(),
                    }
                    .into());
                }
                if let Some(preds) = predecessors.get_mut(next) {
                    preds.push(name.clone());
                }
            }
        }

        let starts: Vec<String> = declared
            .iter()
            .filter(|n| predecessors[*n].is_empty())
            .cloned()
            .collect();
        let start = match starts.len() {
            0 => return Err(GraphViolation::NoStart.into()),
            1 => starts[0].clone(),
            _ => return Err(GraphViolation::MultipleStarts(starts).into()),
        };

        let ends: Vec<String> = declared
            .iter()
            .filter(|n| map[*n].successors().is_empty())
            .cloned()
            .collect();
        let end = match ends.len() {
            0 => return Err(GraphViolation::NoEnd.into()),
            1 => ends[0].clone(),
            _ => return Err(GraphViolation::MultipleEnds(ends).into()),
        };

        // Reachability from the start step
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([start.as_str()]);
        while let Some(name) = queue.pop_front() {
            if !reached.insert(name) {
                continue;
            }
            for next in map[name].successors() {
                queue.push_back(next.as_str());
            }
        }
        if let Some(unreached) = declared.iter().find(|n| !reached.contains(n.as_str())) {
            return Err(GraphViolation::Unreachable(unreached.clone()).into());
        }

        let order = topological_order(&declared, &map, &predecessors)?;

        if let Some(join) = declared
            .iter()
            .find(|n| predecessors[*n].len() > 1 && !map[*n].is_join())
        {
            return Err(GraphViolation::UnmarkedJoin(join.clone()).into());
        }

        Ok(Self {
            steps: map,
            order,
            predecessors,
            start,
            end,
        })
    }

    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    /// Predecessors of a step in declaration order
    pub fn predecessors(&self, name: &str) -> &[String] {
        self.predecessors
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn successors(&self, name: &str) -> &[String] {
        self.steps.get(name).map(|s| s.successors()).unwrap_or(&[])
    }

    /// Whether the executor must wait for several branches before running this step
    pub fn is_join(&self, name: &str) -> bool {
        self.steps.get(name).is_some_and(|s| s.is_join())
    }

    /// Step names in topological order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Steps in topological order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().map(|n| &self.steps[n])
    }

    /// Catch flags declared anywhere in the graph, in topological order
    pub fn catch_flags(&self) -> Vec<String> {
        self.steps()
            .filter_map(|s| s.catch_flag().map(str::to_string))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Kahn's algorithm; steps left over once no step is ready lie on a cycle
fn topological_order(
    declared: &[String],
    steps: &HashMap<String, Step>,
    predecessors: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, EngineError> {
    let mut in_degree: HashMap<&str, usize> = declared
        .iter()
        .map(|n| (n.as_str(), predecessors[n].len()))
        .collect();
    let mut ready: VecDeque<&str> = declared
        .iter()
        .filter(|n| in_degree[n.as_str()] == 0)
        .map(|n| n.as_str())
        .collect();
    let mut order = Vec::with_capacity(declared.len());

    while let Some(name) = ready.pop_front() {
        order.push(name.to_string());
        for next in steps[name].successors() {
            if let Some(degree) = in_degree.get_mut(next.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(next.as_str());
                }
            }
        }
    }

    if order.len() < declared.len() {
        let placed: HashSet<&String> = order.iter().collect();
        let cycle: BTreeSet<String> = declared
            .iter()
            .filter(|n| !placed.contains(n))
            .cloned()
            .collect();
        return Err(GraphViolation::Cycle(cycle.into_iter().collect()).into());
    }

    Ok(order)
}

/// Fluent graph construction
#[derive(Debug, Default)]
pub struct GraphBuilder {
    steps: Vec<Step>,
}

impl GraphBuilder {
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<Graph, EngineError> {
        Graph::new(self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(result: Result<Graph, EngineError>) -> GraphViolation {
        match result {
            Err(EngineError::InvalidGraph(v)) => v,
            other => panic!(
                "expected InvalidGraph, got {:?}",
                other.map(|g| g.order().to_vec())
            ),
        }
    }

    fn diamond() -> Vec<Step> {
        vec![
            Step::noop("start").then("read"),
            Step::noop("read").fan_out(["tag", "annotate"]),
            Step::noop("tag").catch("tag_failed").then("join"),
            Step::noop("annotate").catch("annotate_failed").then("join"),
            Step::noop("join").join().then("end"),
            Step::noop("end"),
        ]
    }

    #[test]
    fn test_valid_diamond() {
        let graph = Graph::new(diamond()).unwrap();
        assert_eq!(graph.start(), "start");
        assert_eq!(graph.end(), "end");
        assert_eq!(graph.len(), 6);
        assert!(graph.is_join("join"));
        assert_eq!(
            graph.predecessors("join"),
            &["tag".to_string(), "annotate".to_string()]
        );
        assert_eq!(
            graph.order(),
            &["start", "read", "tag", "annotate", "join", "end"]
        );
        assert_eq!(graph.catch_flags(), vec!["tag_failed", "annotate_failed"]);
    }

    #[test]
    fn test_single_step_graph() {
        let graph = Graph::builder().step(Step::noop("only")).build().unwrap();
        assert_eq!(graph.start(), "only");
        assert_eq!(graph.end(), "only");
    }

    #[test]
    fn test_empty_graph() {
        assert_eq!(violation(Graph::new(vec![])), GraphViolation::Empty);
    }

    #[test]
    fn test_removing_end_step() {
        let steps: Vec<Step> = diamond()
            .into_iter()
            .filter(|s| s.name() != "end")
            .collect();
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::DanglingEdge {
                from: "join".to_string(),
                to: "end".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_name() {
        let mut steps = diamond();
        steps.push(Step::noop("tag"));
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::DuplicateStep("tag".to_string())
        );
    }

    #[test]
    fn test_unknown_successor() {
        let steps = vec![Step::noop("start").then("ghost"), Step::noop("end")];
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::DanglingEdge {
                from: "start".to_string(),
                to: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_edge() {
        let steps = vec![
            Step::noop("start").then("end").then("end"),
            Step::noop("end"),
        ];
        assert!(matches!(
            violation(Graph::new(steps)),
            GraphViolation::DuplicateEdge { .. }
        ));
    }

    #[test]
    fn test_multiple_starts() {
        let steps = vec![
            Step::noop("a").then("end"),
            Step::noop("b").then("end"),
            Step::noop("end").join(),
        ];
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::MultipleStarts(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_no_start() {
        let steps = vec![Step::noop("a").then("b"), Step::noop("b").then("a")];
        assert_eq!(violation(Graph::new(steps)), GraphViolation::NoStart);
    }

    #[test]
    fn test_no_end() {
        let steps = vec![
            Step::noop("start").then("a"),
            Step::noop("a").then("b"),
            Step::noop("b").then("a"),
        ];
        assert_eq!(violation(Graph::new(steps)), GraphViolation::NoEnd);
    }

    #[test]
    fn test_multiple_ends() {
        let steps = vec![
            Step::noop("start").fan_out(["x", "y"]),
            Step::noop("x"),
            Step::noop("y"),
        ];
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::MultipleEnds(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn test_unmarked_join() {
        let steps: Vec<Step> = diamond()
            .into_iter()
            .map(|s| {
                if s.name() == "join" {
                    Step::noop("join").then("end")
                } else {
                    s
                }
            })
            .collect();
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::UnmarkedJoin("join".to_string())
        );
    }

    #[test]
    fn test_cycle() {
        let steps = vec![
            Step::noop("start").then("a"),
            Step::noop("a").then("b"),
            Step::noop("b").fan_out(["a", "end"]),
            Step::noop("end"),
        ];
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::Cycle(vec!["a".to_string(), "b".to_string(), "end".to_string()])
        );
    }

    #[test]
    fn test_unreachable_island() {
        // x and y feed each other, so neither counts as a start
        let steps = vec![
            Step::noop("start").then("end"),
            Step::noop("end"),
            Step::noop("x").then("y"),
            Step::noop("y").then("x"),
        ];
        assert_eq!(
            violation(Graph::new(steps)),
            GraphViolation::Unreachable("x".to_string())
        );
    }
}
