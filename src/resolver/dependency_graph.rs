//! The resolved dependency graph.
//!
//! A [`DependencyGraph`] holds exactly one [`ResolvedPackage`] per name plus
//! the set of root names (the manifest's declarations). Packages are kept in
//! a `BTreeMap`, so every iteration is sorted by name and every output built
//! from the graph is deterministic.
//!
//! Graph algorithms (reachability, installation order) run on a petgraph
//! [`DiGraph`] built on demand from the map.

use anyhow::{Result, anyhow};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use semver::Version;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{ContentHash, PackageName};

/// A package pinned by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// Package name
    pub name: PackageName,
    /// Exact version
    pub version: Version,
    /// Hash of the package blob
    pub content_hash: ContentHash,
    /// Identifier of the source the metadata came from (registry URL)
    pub source: String,
    /// Direct dependencies, each pinned to an exact version
    pub dependencies: BTreeMap<PackageName, Version>,
}

impl ResolvedPackage {
    /// `name@version`, the form used in messages and lockfile edges.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Flat, conflict-free set of resolved packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    packages: BTreeMap<PackageName, ResolvedPackage>,
    roots: BTreeSet<PackageName>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a package, replacing any previous entry of the same name.
    pub fn insert(&mut self, package: ResolvedPackage) {
        self.packages.insert(package.name.clone(), package);
    }

    /// Mark `name` as declared by the manifest.
    pub fn add_root(&mut self, name: PackageName) {
        self.roots.insert(name);
    }

    /// Names declared by the manifest.
    #[must_use]
    pub fn roots(&self) -> &BTreeSet<PackageName> {
        &self.roots
    }

    /// Look up a package by name.
    #[must_use]
    pub fn get(&self, name: &PackageName) -> Option<&ResolvedPackage> {
        self.packages.get(name)
    }

    /// Whether the graph contains `name`.
    #[must_use]
    pub fn contains(&self, name: &PackageName) -> bool {
        self.packages.contains_key(name)
    }

    /// All packages, sorted by name.
    pub fn packages(&self) -> impl Iterator<Item = &ResolvedPackage> {
        self.packages.values()
    }

    /// Number of packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the graph has no packages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Names of packages that directly depend on `name`, sorted.
    #[must_use]
    pub fn dependents_of(&self, name: &PackageName) -> Vec<PackageName> {
        self.packages
            .values()
            .filter(|p| p.dependencies.contains_key(name))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Every edge that points at a package missing from the graph, or at a
    /// different version than the one in the graph, as `(from, to@version)`.
    #[must_use]
    pub fn dangling_edges(&self) -> Vec<(String, String)> {
        let mut dangling = Vec::new();
        for package in self.packages.values() {
            for (dep, version) in &package.dependencies {
                let resolves = self.packages.get(dep).is_some_and(|p| &p.version == version);
                if !resolves {
                    dangling.push((package.id(), format!("{dep}@{version}")));
                }
            }
        }
        dangling
    }

    /// Names reachable from `starts` by following dependency edges,
    /// including the starts themselves when present in the graph.
    #[must_use]
    pub fn reachable_from<'a>(
        &self,
        starts: impl IntoIterator<Item = &'a PackageName>,
    ) -> BTreeSet<PackageName> {
        let (graph, index) = self.petgraph();
        let mut reachable = BTreeSet::new();
        for start in starts {
            let Some(&start_idx) = index.get(start) else {
                continue;
            };
            let mut dfs = Dfs::new(&graph, start_idx);
            while let Some(node) = dfs.next(&graph) {
                reachable.insert(graph[node].clone());
            }
        }
        reachable
    }

    /// Packages reachable from the roots.
    #[must_use]
    pub fn reachable_from_roots(&self) -> BTreeSet<PackageName> {
        self.reachable_from(self.roots.iter())
    }

    /// Packages that would become unreachable if the root `name` were dropped:
    /// `name` itself and everything reachable only through it.
    #[must_use]
    pub fn orphaned_by(&self, name: &PackageName) -> BTreeSet<PackageName> {
        let through_name = self.reachable_from([name]);
        let remaining_roots = self.roots.iter().filter(|root| *root != name);
        let still_reachable = self.reachable_from(remaining_roots);
        through_name.difference(&still_reachable).cloned().collect()
    }

    /// Packages ordered so that every package comes after its dependencies.
    ///
    /// Ties are broken by name, so the order is stable.
    ///
    /// # Errors
    ///
    /// Fails if the graph contains a cycle, which the resolver never produces.
    pub fn install_order(&self) -> Result<Vec<&ResolvedPackage>> {
        let (graph, _) = self.petgraph();
        let sorted = toposort(&graph, None).map_err(|cycle| {
            anyhow!("Circular dependency detected at '{}'", graph[cycle.node_id()])
        })?;
        // Edges point from dependent to dependency, so reverse the order
        Ok(sorted.into_iter().rev().filter_map(|idx| self.packages.get(&graph[idx])).collect())
    }

    /// Render the graph as a tree below each root, for `mosaic list --tree`.
    #[must_use]
    pub fn to_tree_string(&self) -> String {
        let mut result = String::new();
        for root in &self.roots {
            self.build_tree_string(root, &mut result, "", &mut Vec::new());
        }
        result
    }

    fn build_tree_string(
        &self,
        name: &PackageName,
        result: &mut String,
        prefix: &str,
        path: &mut Vec<PackageName>,
    ) {
        let Some(package) = self.packages.get(name) else {
            result.push_str(&format!("{prefix}{name} (missing)\n"));
            return;
        };
        result.push_str(&format!("{prefix}{}\n", package.id()));
        if path.contains(name) {
            return;
        }
        path.push(name.clone());
        let child_prefix = if prefix.is_empty() {
            "└── ".to_string()
        } else {
            format!("    {prefix}")
        };
        for dep in package.dependencies.keys() {
            self.build_tree_string(dep, result, &child_prefix, path);
        }
        path.pop();
    }

    fn petgraph(&self) -> (DiGraph<PackageName, ()>, HashMap<PackageName, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for name in self.packages.keys() {
            index.insert(name.clone(), graph.add_node(name.clone()));
        }
        for package in self.packages.values() {
            let from = index[&package.name];
            for dep in package.dependencies.keys() {
                if let Some(&to) = index.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        (graph, index)
    }
}
