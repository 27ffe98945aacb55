//! Load-order resolution over declared module dependencies.
//!
//! Kahn's algorithm over the "requires" graph. Among modules that become
//! ready at the same time, the one registered first is emitted first, so the
//! order is a pure function of the descriptors and their registration order.

use std::collections::{BTreeSet, HashMap};

use crate::descriptor::ModuleDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("module '{module}' depends on '{dependency}', which is not registered")]
    UnknownDependency { module: String, dependency: String },

    /// `modules` lists every module left unresolved (cycle members and their
    /// dependents), in registration order. `cycle` is one concrete loop.
    #[error(
        "dependency cycle detected ({}); unresolved modules: {}",
        .cycle.join(" -> "),
        .modules.join(", ")
    )]
    Cycle {
        modules: Vec<String>,
        cycle: Vec<String>,
    },
}

/// Compute the load order for `descriptors`, given in registration order.
///
/// Every module appears after all of its dependencies.
///
/// # Errors
/// - [`ResolveError::UnknownDependency`] if a dependency names a module that
///   is not in `descriptors` (checked before ordering starts).
/// - [`ResolveError::Cycle`] if the graph is not acyclic.
pub fn resolve_load_order(descriptors: &[&ModuleDescriptor]) -> Result<Vec<String>, ResolveError> {
    let index: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name(), i))
        .collect();

    let mut requires: Vec<Vec<usize>> = Vec::with_capacity(descriptors.len());
    for d in descriptors {
        let mut deps = Vec::with_capacity(d.dependencies().len());
        for dep in d.dependencies() {
            let Some(&j) = index.get(dep.as_str()) else {
                return Err(ResolveError::UnknownDependency {
                    module: d.name().to_owned(),
                    dependency: dep.clone(),
                });
            };
            deps.push(j);
        }
        requires.push(deps);
    }

    let mut pending: Vec<usize> = requires.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    for (i, deps) in requires.iter().enumerate() {
        for &j in deps {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter_map(|(i, &n)| (n == 0).then_some(i))
        .collect();

    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &k in &dependents[i] {
            pending[k] -= 1;
            if pending[k] == 0 {
                ready.insert(k);
            }
        }
    }

    if order.len() < descriptors.len() {
        let unresolved: Vec<usize> = (0..descriptors.len()).filter(|&i| pending[i] > 0).collect();
        let cycle = find_cycle(&requires, &pending)
            .into_iter()
            .map(|i| descriptors[i].name().to_owned())
            .collect();
        return Err(ResolveError::Cycle {
            modules: unresolved
                .into_iter()
                .map(|i| descriptors[i].name().to_owned())
                .collect(),
            cycle,
        });
    }

    Ok(order
        .into_iter()
        .map(|i| descriptors[i].name().to_owned())
        .collect())
}

/// Walk "requires" edges among unresolved nodes until a node repeats.
///
/// Every unresolved node has at least one unresolved dependency, so the walk
/// always closes a loop. The returned path starts and ends on the same node.
fn find_cycle(requires: &[Vec<usize>], pending: &[usize]) -> Vec<usize> {
    let Some(start) = (0..pending.len()).find(|&i| pending[i] > 0) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = requires[current].iter().find(|&&j| pending[j] > 0) else {
            return path;
        };
        if let Some(&at) = position.get(&next) {
            let mut cycle = path.split_off(at);
            cycle.push(next);
            return cycle;
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn desc(name: &str, deps: &[&str]) -> ModuleDescriptor {
        ModuleDescriptor::builder(name, "1.0.0")
            .dependencies(deps.iter().copied())
            .build()
            .unwrap()
    }

    fn order(descs: &[ModuleDescriptor]) -> Result<Vec<String>, ResolveError> {
        let refs: Vec<&ModuleDescriptor> = descs.iter().collect();
        resolve_load_order(&refs)
    }

    #[test]
    fn chain_resolves_dependencies_first() {
        let descs = [desc("a", &[]), desc("b", &["a"]), desc("c", &["b", "a"])];
        assert_eq!(order(&descs).unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn registration_order_breaks_ties() {
        let descs = [
            desc("zeta", &[]),
            desc("alpha", &[]),
            desc("mid", &["alpha"]),
        ];
        assert_eq!(order(&descs).unwrap(), ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn dependents_registered_before_their_dependencies() {
        let descs = [
            desc("claims", &["billing"]),
            desc("wellness", &[]),
            desc("billing", &["accounts"]),
            desc("accounts", &[]),
        ];
        assert_eq!(
            order(&descs).unwrap(),
            ["wellness", "accounts", "billing", "claims"]
        );
    }

    #[test]
    fn diamond_is_deterministic() {
        let descs = [
            desc("top", &["left", "right"]),
            desc("right", &["base"]),
            desc("left", &["base"]),
            desc("base", &[]),
        ];
        let first = order(&descs).unwrap();
        assert_eq!(first, ["base", "right", "left", "top"]);
        assert_eq!(order(&descs).unwrap(), first);
    }

    #[test]
    fn unknown_dependency_reported_before_cycles() {
        let descs = [desc("x", &["y"]), desc("y", &["x"]), desc("z", &["ghost"])];
        assert_eq!(
            order(&descs).unwrap_err(),
            ResolveError::UnknownDependency {
                module: "z".to_owned(),
                dependency: "ghost".to_owned(),
            }
        );
    }

    #[test]
    fn two_node_cycle_names_both() {
        let descs = [desc("x", &["y"]), desc("y", &["x"])];
        let err = order(&descs).unwrap_err();
        let ResolveError::Cycle { modules, cycle } = &err else {
            panic!("expected cycle, got {err:?}");
        };
        assert_eq!(modules, &["x", "y"]);
        assert_eq!(cycle, &["x", "y", "x"]);
        let msg = err.to_string();
        assert!(msg.contains('x') && msg.contains('y'), "{msg}");
    }

    #[test]
    fn cycle_report_includes_blocked_dependents() {
        let descs = [
            desc("ok", &[]),
            desc("p", &["q"]),
            desc("q", &["r"]),
            desc("r", &["p"]),
            desc("downstream", &["r", "ok"]),
        ];
        let ResolveError::Cycle { modules, cycle } = order(&descs).unwrap_err() else {
            panic!("expected cycle");
        };
        assert_eq!(modules, ["p", "q", "r", "downstream"]);
        assert_eq!(cycle, ["p", "q", "r", "p"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let descs = [desc("solo", &["solo"])];
        let ResolveError::Cycle { modules, cycle } = order(&descs).unwrap_err() else {
            panic!("expected cycle");
        };
        assert_eq!(modules, ["solo"]);
        assert_eq!(cycle, ["solo", "solo"]);
    }

    #[test]
    fn empty_input() {
        assert!(order(&[]).unwrap().is_empty());
    }
}
