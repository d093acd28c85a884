// tests/graph_properties.rs

mod common;
use crate::common::driver::GraphHarness;

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use taskdag::graph::Jobs;
use taskdag::util::Multimap;

/// Random acyclic adjacencies: task N may only depend on tasks 0..N-1, so
/// cycles are impossible by construction.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(move |raw_deps| {
            raw_deps
                .into_iter()
                .enumerate()
                .map(|(i, potential)| {
                    let mut deps: HashSet<usize> = HashSet::new();
                    for d in potential {
                        if i > 0 {
                            deps.insert(d % i);
                        }
                    }
                    (
                        format!("task_{i}"),
                        deps.into_iter().map(|d| format!("task_{d}")).collect(),
                    )
                })
                .collect()
        })
    })
}

fn to_multimap(entries: &[(String, Vec<String>)]) -> Multimap<String, String> {
    entries
        .iter()
        .map(|(task, deps)| (task.clone(), deps.clone()))
        .collect()
}

/// Transitive parents of `start`, per the raw entry list.
fn ancestors_of(entries: &[(String, Vec<String>)], start: &str) -> HashSet<String> {
    let mut parents_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (task, deps) in entries {
        for dep in deps {
            parents_of.entry(dep.as_str()).or_default().push(task.as_str());
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(parents) = parents_of.get(current.as_str()) {
            stack.extend(parents.iter().map(|p| p.to_string()));
        }
    }
    seen.remove(start);
    seen
}

proptest! {
    #[test]
    fn topological_order_respects_edges(entries in dag_strategy(12)) {
        let mut h = GraphHarness::new(Jobs::Unlimited);
        h.graph.set_tasks(&to_multimap(&entries)).expect("acyclic by construction");

        let order = h.graph.topological_order();
        prop_assert_eq!(order.len(), entries.len());

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        for (task, deps) in &entries {
            for dep in deps {
                prop_assert!(
                    position[dep.as_str()] < position[task.as_str()],
                    "{} should precede {} in {:?}", dep, task, order
                );
            }
        }
    }

    #[test]
    fn bfs_order_visits_every_task_starting_at_roots(entries in dag_strategy(12)) {
        let mut h = GraphHarness::new(Jobs::Unlimited);
        h.graph.set_tasks(&to_multimap(&entries)).expect("acyclic by construction");

        let order = h.graph.bfs_order();
        prop_assert_eq!(order.len(), entries.len());
        let unique: HashSet<&String> = order.iter().collect();
        prop_assert_eq!(unique.len(), order.len());

        // Roots (tasks nothing depends on... i.e. with no parents) lead.
        let is_dep: HashSet<&String> =
            entries.iter().flat_map(|(_, deps)| deps.iter()).collect();
        let root_count = entries.iter().filter(|(t, _)| !is_dep.contains(t)).count();
        for id in order.iter().take(root_count) {
            prop_assert!(!is_dep.contains(id), "non-root {} before roots in {:?}", id, order);
        }
    }

    #[test]
    fn mark_changed_bumps_exactly_self_and_ancestors(
        entries in dag_strategy(12),
        pick in any::<usize>(),
    ) {
        let mut h = GraphHarness::new(Jobs::Unlimited);
        h.graph.set_tasks(&to_multimap(&entries)).expect("acyclic by construction");

        let target = format!("task_{}", pick % entries.len());
        let before: HashMap<String, _> = entries
            .iter()
            .map(|(t, _)| (t.clone(), h.graph.task_version(t)))
            .collect();

        h.graph.mark_changed(&target);

        let affected = ancestors_of(&entries, &target);
        for (task, _) in &entries {
            let now = h.graph.task_version(task);
            if task == &target || affected.contains(task) {
                prop_assert_ne!(&now, &before[task], "{} should have a new version", task);
            } else {
                prop_assert_eq!(&now, &before[task], "{} should be untouched", task);
            }
        }
    }

    #[test]
    fn repeated_set_tasks_is_quiet(entries in dag_strategy(12)) {
        let mut h = GraphHarness::new(Jobs::Unlimited);
        let adjacency = to_multimap(&entries);
        h.graph.set_tasks(&adjacency).expect("acyclic by construction");
        h.drive(|_| Some(true));
        h.events();

        h.graph.set_tasks(&adjacency).expect("acyclic by construction");
        prop_assert!(h.task_events().is_empty());
    }
}
