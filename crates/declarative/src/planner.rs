//! Reconciliation planner - orders desired containers by start dependencies

use crate::error::{Error, Result};
use crate::types::{DesiredApplication, ReconcilePlan};
use dockerkit::ObservedContainerState;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Desired containers grouped into dependency levels.
///
/// Every container of a level depends only on containers of earlier levels,
/// so a level can converge in parallel. Indices refer to the desired slice and
/// keep its order within a level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyLevels {
    pub levels: Vec<Vec<usize>>,
}

impl DependencyLevels {
    /// Order `desired` by dependencies.
    ///
    /// Fails on duplicate names, unknown dependencies and cycles, before
    /// anything is touched.
    pub fn compute(desired: &[DesiredApplication]) -> Result<Self> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for (index, (_, definition)) in desired.iter().enumerate() {
            let node = graph.add_node(index);
            if nodes.insert(definition.name.as_str(), node).is_some() {
                return Err(Error::DuplicateApplication {
                    name: definition.name.clone(),
                });
            }
        }

        for (_, definition) in desired {
            let dependent = nodes[definition.name.as_str()];
            for dependency in &definition.depends_on {
                let Some(&required) = nodes.get(dependency.as_str()) else {
                    return Err(Error::UnknownDependency {
                        application: definition.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                graph.update_edge(required, dependent, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| Error::DependencyCycle {
            application: desired[graph[cycle.node_id()]].1.name.clone(),
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        for node in &order {
            let level = graph
                .neighbors_directed(*node, petgraph::Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*node, level);
        }

        let count = depth.values().max().map_or(0, |max| max + 1);
        let mut levels = vec![Vec::new(); count];
        for (node, level) in &depth {
            levels[*level].push(graph[*node]);
        }
        for level in &mut levels {
            level.sort_unstable();
        }
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Observed container names that no desired definition claims, in listing order.
pub fn prune_candidates(observed: &ObservedContainerState, desired: &[DesiredApplication]) -> Vec<String> {
    let wanted: HashSet<&str> = desired.iter().map(|(_, d)| d.name.as_str()).collect();
    observed
        .names()
        .filter(|name| !wanted.contains(name))
        .map(str::to_string)
        .collect()
}

/// Build the full plan of a pass without touching any container.
pub fn build_plan(
    observed: &ObservedContainerState,
    desired: &[DesiredApplication],
    prune: bool,
) -> Result<ReconcilePlan> {
    let levels = DependencyLevels::compute(desired)?;
    Ok(ReconcilePlan {
        prune: if prune {
            prune_candidates(observed, desired)
        } else {
            Vec::new()
        },
        levels: levels
            .levels
            .iter()
            .map(|level| level.iter().map(|i| desired[*i].1.name.clone()).collect())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApplicationDefinition, OutputContext};
    use dockerkit::{ContainerRecord, ContainerStatus};

    fn app(name: &str, deps: &[&str]) -> DesiredApplication {
        let mut definition = ApplicationDefinition::new(name, "FROM scratch");
        for dep in deps {
            definition = definition.depends_on(*dep);
        }
        (OutputContext::new("core", "m1"), definition)
    }

    #[test]
    fn test_levels_follow_dependencies() {
        let desired = vec![
            app("web", &["api"]),
            app("api", &["db", "cache"]),
            app("db", &[]),
            app("cache", &[]),
            app("docs", &[]),
        ];
        let levels = DependencyLevels::compute(&desired).unwrap();
        assert_eq!(levels.levels, vec![vec![2, 3, 4], vec![1], vec![0]]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let desired = vec![app("a", &["b"]), app("b", &["c"]), app("c", &["a"])];
        assert!(matches!(
            DependencyLevels::compute(&desired),
            Err(Error::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let desired = vec![app("a", &["a"])];
        assert!(matches!(
            DependencyLevels::compute(&desired),
            Err(Error::DependencyCycle { application }) if application == "a"
        ));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let desired = vec![app("web", &["db"])];
        match DependencyLevels::compute(&desired) {
            Err(Error::UnknownDependency {
                application,
                dependency,
            }) => {
                assert_eq!(application, "web");
                assert_eq!(dependency, "db");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let desired = vec![app("web", &[]), app("web", &[])];
        assert!(matches!(
            DependencyLevels::compute(&desired),
            Err(Error::DuplicateApplication { .. })
        ));
    }

    #[test]
    fn test_plan_lists_prune_candidates() {
        let observed = ObservedContainerState::new(vec![
            ContainerRecord {
                name: "old".to_string(),
                id: "1".to_string(),
                image: "x".to_string(),
                status: ContainerStatus::Running,
                ports: Vec::new(),
            },
            ContainerRecord {
                name: "db".to_string(),
                id: "2".to_string(),
                image: "x".to_string(),
                status: ContainerStatus::Running,
                ports: Vec::new(),
            },
        ]);
        let desired = vec![app("db", &[]), app("web", &["db"])];

        let plan = build_plan(&observed, &desired, true).unwrap();
        assert_eq!(plan.prune, vec!["old"]);
        assert_eq!(plan.levels, vec![vec!["db"], vec!["web"]]);

        assert!(build_plan(&observed, &desired, false).unwrap().prune.is_empty());
    }
}
