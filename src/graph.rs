//! In-workspace dependency graph and publish ordering.
//!
//! Edges are never stored on the packages themselves; they are derived from each
//! package's declared dependencies, keeping only those that name another member
//! of the same workspace.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::ReleaseError;
use crate::workspace::{Package, Workspace};

/// An edge from a dependent package to one of its in-workspace dependencies.
#[derive(Debug, Clone, Copy)]
pub struct DependencyEdge<'a> {
    pub dependency: &'a Package,
    /// `true` when the dependency is only needed for tests, examples and benches.
    /// Build dependencies count as normal.
    pub is_dev: bool,
}

/// Dependency graph over the members of a workspace.
#[derive(Debug, Clone, Copy)]
pub struct DependencyGraph<'a> {
    workspace: &'a Workspace,
}

impl<'a> DependencyGraph<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self { workspace }
    }

    /// Immediate in-workspace dependencies of `package`.
    ///
    /// A dependency declared more than once (say as both a normal and a dev
    /// dependency) yields one edge, which is normal if any declaration is.
    pub fn immediate_dependencies(&self, package: &Package) -> Vec<DependencyEdge<'a>> {
        let mut edges: Vec<DependencyEdge<'a>> = Vec::new();

        for dep in &package.dependencies {
            // A dev-dependency on the package itself is not an edge.
            if dep.name == package.package_name {
                continue;
            }
            let Some(dependency) = self.workspace.package(&dep.name) else {
                continue;
            };

            match edges
                .iter_mut()
                .find(|e| e.dependency.package_name == dep.name)
            {
                Some(edge) => edge.is_dev &= dep.kind.is_dev(),
                None => edges.push(DependencyEdge {
                    dependency,
                    is_dev: dep.kind.is_dev(),
                }),
            }
        }

        edges
    }

    /// Members that depend on `name` directly, in workspace order.
    pub fn dependents(&self, name: &str) -> Vec<&'a Package> {
        self.workspace
            .packages()
            .iter()
            .filter(|package| {
                self.immediate_dependencies(package)
                    .iter()
                    .any(|e| e.dependency.package_name == name)
            })
            .collect()
    }

    /// Every member reachable from `package` through dependency edges of any kind,
    /// depth first.
    pub fn descendants(&self, package: &Package) -> Vec<&'a Package> {
        self.walk(package, true)
    }

    /// Members reachable from `package` through normal (and build) edges only: what
    /// has to be on the registry before `package` can be published.
    pub fn normal_descendants(&self, package: &Package) -> Vec<&'a Package> {
        self.walk(package, false)
    }

    fn walk(&self, package: &Package, follow_dev: bool) -> Vec<&'a Package> {
        let next_edges = |from: &Package| -> Vec<&'a Package> {
            self.immediate_dependencies(from)
                .into_iter()
                .rev()
                .filter(|e| follow_dev || !e.is_dev)
                .map(|e| e.dependency)
                .collect()
        };

        let mut seen: HashSet<&str> = HashSet::new();
        let mut result = Vec::new();
        let mut stack = next_edges(package);

        while let Some(next) = stack.pop() {
            if next.package_name == package.package_name
                || !seen.insert(next.package_name.as_str())
            {
                continue;
            }
            result.push(next);
            stack.extend(next_edges(next));
        }

        result
    }

    /// All workspace members in publish order.
    pub fn publish_order(&self) -> Result<Vec<&'a Package>> {
        self.resolve_publish_order(self.workspace.packages().iter())
    }

    /// Order `packages` so every package follows its normal dependencies.
    ///
    /// Packages are inserted one at a time, in input order. Inserting `P` fails if an
    /// already placed `Q` and `P` declare edges of the same kind on each other, or if
    /// the two reach each other over normal edges.
    ///
    /// Otherwise the placed list is scanned from the start; at each placed `Q` that
    /// depends on `P`:
    ///
    /// * if `P` does not depend on `Q`, or `Q`'s edge is normal, `P` goes in front of
    ///   `Q` and the scan stops;
    /// * otherwise (`Q` only dev-depends on `P`, `P` normally depends on `Q`) the scan
    ///   moves on past `Q`.
    ///
    /// With no stop, `P` is appended. For placement, "depends on" follows chains of
    /// normal dependencies, while a dev edge only counts when declared directly. `P`
    /// is never placed in front of one of its own normal dependencies.
    pub fn resolve_publish_order<I>(&self, packages: I) -> Result<Vec<&'a Package>>
    where
        I: IntoIterator<Item = &'a Package>,
    {
        let reach = Reachability::new(self);
        let mut sorted: Vec<&'a Package> = Vec::new();

        for package in packages {
            if let Some(placed) = sorted.iter().find(|placed| reach.is_cycle(package, placed)) {
                return Err(ReleaseError::CircularDependency {
                    first: package.package_name.clone(),
                    second: placed.package_name.clone(),
                }
                .into());
            }

            let mut insert_at = sorted.len();
            for (index, &placed) in sorted.iter().enumerate() {
                let Some(back_is_dev) = reach.edge(placed, package) else {
                    continue;
                };
                if reach.edge(package, placed).is_none() || !back_is_dev {
                    insert_at = index;
                    break;
                }
            }

            let floor = sorted
                .iter()
                .rposition(|placed| reach.depends_normally(package, placed))
                .map_or(0, |i| i + 1);
            let index = insert_at.max(floor);

            debug!(package = %package.package_name, index, "placed in publish order");
            sorted.insert(index, package);
        }

        Ok(sorted)
    }
}

/// Precomputed "depends on" relations between members, by package name.
struct Reachability<'a> {
    /// Immediate normal edges.
    direct: HashMap<&'a str, HashSet<&'a str>>,
    /// Immediate dev edges.
    dev: HashMap<&'a str, HashSet<&'a str>>,
    /// Transitive closure over normal edges.
    normal: HashMap<&'a str, HashSet<&'a str>>,
}

impl<'a> Reachability<'a> {
    fn new(graph: &DependencyGraph<'a>) -> Self {
        let mut direct: HashMap<&'a str, HashSet<&'a str>> = HashMap::new();
        let mut dev: HashMap<&'a str, HashSet<&'a str>> = HashMap::new();

        for package in graph.workspace.packages() {
            let edges = graph.immediate_dependencies(package);
            let name = package.package_name.as_str();
            let (dev_edges, normal_edges): (Vec<&DependencyEdge<'a>>, Vec<&DependencyEdge<'a>>) =
                edges.iter().partition(|e| e.is_dev);
            direct.insert(
                name,
                normal_edges
                    .iter()
                    .map(|e| e.dependency.package_name.as_str())
                    .collect(),
            );
            dev.insert(
                name,
                dev_edges
                    .iter()
                    .map(|e| e.dependency.package_name.as_str())
                    .collect(),
            );
        }

        let normal = direct
            .iter()
            .map(|(&name, children)| {
                let mut seen: HashSet<&'a str> = HashSet::new();
                let mut stack: Vec<&'a str> = children.iter().copied().collect();
                while let Some(next) = stack.pop() {
                    if seen.insert(next) {
                        if let Some(children) = direct.get(next) {
                            stack.extend(children.iter().copied());
                        }
                    }
                }
                (name, seen)
            })
            .collect();

        Self {
            direct,
            dev,
            normal,
        }
    }

    fn contains(map: &HashMap<&'a str, HashSet<&'a str>>, from: &Package, to: &Package) -> bool {
        map.get(from.package_name.as_str())
            .is_some_and(|set| set.contains(to.package_name.as_str()))
    }

    fn depends_normally(&self, from: &Package, to: &Package) -> bool {
        Self::contains(&self.normal, from, to)
    }

    /// The declared edge from `from` to `to`, as `Some(is_dev)`.
    fn direct_edge(&self, from: &Package, to: &Package) -> Option<bool> {
        if Self::contains(&self.direct, from, to) {
            Some(false)
        } else {
            Self::contains(&self.dev, from, to).then_some(true)
        }
    }

    /// Same-kind declared edges both ways, or a normal cycle of any length.
    fn is_cycle(&self, a: &Package, b: &Package) -> bool {
        let declared = match (self.direct_edge(a, b), self.direct_edge(b, a)) {
            (Some(forward), Some(back)) => forward == back,
            _ => false,
        };
        declared || (self.depends_normally(a, b) && self.depends_normally(b, a))
    }

    /// `Some(is_dev)` when `from` depends on `to`; a normal path wins over a dev edge.
    fn edge(&self, from: &Package, to: &Package) -> Option<bool> {
        if self.depends_normally(from, to) {
            return Some(false);
        }
        Self::contains(&self.dev, from, to).then_some(true)
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
