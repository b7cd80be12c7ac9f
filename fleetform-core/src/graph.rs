//! Graph - Dependency analysis of a compiled template

use std::collections::{HashMap, HashSet};

use crate::template::Template;

/// How a dependency was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// `Ref` or `Fn::GetAtt` inside a property or output value
    Reference,
    /// Listed in `DependsOn`
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub target: String,
    pub kind: DependencyKind,
}

/// Dependency graph between resources of a template
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Resource (or output) key -> list of dependencies
    pub edges: HashMap<String, Vec<Dependency>>,
    /// Reverse edges: target -> keys that depend on it
    pub reverse_edges: HashMap<String, Vec<String>>,
    nodes: HashSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every reference and explicit dependency in the template.
    /// Outputs take part as sources only.
    pub fn from_template(template: &Template) -> Self {
        let mut graph = Self::new();
        for (key, resource) in template.resources() {
            graph.nodes.insert(key.clone());
            for value in resource.properties.values() {
                for target in value.references() {
                    graph.add_edge(key.clone(), target, DependencyKind::Reference);
                }
            }
            for target in &resource.depends_on {
                graph.add_edge(key.clone(), target, DependencyKind::Explicit);
            }
        }
        for (key, output) in template.outputs() {
            for target in output.value.references() {
                graph.add_edge(key.clone(), target, DependencyKind::Reference);
            }
        }
        graph
    }

    pub fn add_edge(&mut self, from: String, target: &str, kind: DependencyKind) {
        let edges = self.edges.entry(from.clone()).or_default();
        if edges.iter().any(|d| d.target == target && d.kind == kind) {
            return;
        }
        edges.push(Dependency {
            target: target.to_string(),
            kind,
        });
        self.reverse_edges
            .entry(target.to_string())
            .or_default()
            .push(from);
    }

    pub fn dependencies_of(&self, key: &str) -> &[Dependency] {
        self.edges.get(key).map_or(&[], |v| v.as_slice())
    }

    pub fn dependents_of(&self, key: &str) -> &[String] {
        self.reverse_edges.get(key).map_or(&[], |v| v.as_slice())
    }

    /// `(from, target)` pairs whose target is neither a resource of the
    /// graph nor an `AWS::` pseudo parameter, sorted for stable reporting
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        let mut dangling: Vec<(String, String)> = self
            .edges
            .iter()
            .flat_map(|(from, deps)| {
                deps.iter()
                    .filter(|d| !d.target.starts_with("AWS::") && !self.nodes.contains(&d.target))
                    .map(move |d| (from.clone(), d.target.clone()))
            })
            .collect();
        dangling.sort();
        dangling
    }

    pub fn has_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in self.edges.keys() {
            if self.has_cycle_util(node, &mut visited, &mut rec_stack) {
                return true;
            }
        }
        false
    }

    fn has_cycle_util(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> bool {
        if rec_stack.contains(node) {
            return true;
        }
        if visited.contains(node) {
            return false;
        }

        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());

        for dep in self.dependencies_of(node) {
            if self.has_cycle_util(&dep.target, visited, rec_stack) {
                return true;
            }
        }

        rec_stack.remove(node);
        false
    }
}
