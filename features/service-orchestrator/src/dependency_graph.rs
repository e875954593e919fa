use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::descriptor::DescriptorTable;

/// Graph of all registered services
/// Used to order initialization, check for circular dependencies and for diagnostics
pub struct DependencyGraph {
    /// Service names in registration order
    order: Vec<String>,
    /// service -> declared dependencies
    edges: HashMap<String, Vec<String>>,
}
impl DependencyGraph {
    pub(crate) fn new(table: &DescriptorTable) -> Self {
        let mut graph = Self {
            order: Vec::new(),
            edges: HashMap::new(),
        };

        for service in table.iter() {
            graph.add(&service.name, service.dependencies.clone());
        }

        graph
    }

    pub fn add(&mut self, name: &str, dependencies: Vec<String>) {
        if self.edges.insert(name.to_string(), dependencies).is_none() {
            self.order.push(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// All declared edges, sorted by service name
    pub fn edges(&self) -> BTreeMap<String, Vec<String>> {
        self.edges
            .iter()
            .map(|(name, deps)| (name.clone(), deps.clone()))
            .collect()
    }

    /// Validate the graph
    ///
    /// Returns a list of all issues
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();
        for name in &self.order {
            let mut dependency_chain = Vec::new();
            check_recurse(self, &mut checked, &mut errors, &mut dependency_chain, name);
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        return Ok(());

        fn check_recurse<'a>(
            graph: &'a DependencyGraph,
            checked: &mut HashSet<&'a str>,
            errors: &mut Vec<DependencyGraphError>,
            dependency_chain: &mut Vec<&'a str>,
            name: &'a str,
        ) {
            // Circular Dependency Check
            if let Some(start) = dependency_chain.iter().position(|entry| *entry == name) {
                let mut chain: Vec<String> = dependency_chain[start..]
                    .iter()
                    .map(|entry| entry.to_string())
                    .collect();
                chain.push(name.to_string()); // Add current so chain is complete

                errors.push(DependencyGraphError::CircularDependency { chain });
            }

            // Skip other checks if already checked
            if !checked.insert(name) {
                return;
            };

            dependency_chain.push(name);

            for dependency in graph.dependencies_of(name) {
                if !graph.contains(dependency) {
                    errors.push(DependencyGraphError::MissingDependency {
                        dependency: dependency.clone(),
                        required_by: name.to_string(),
                    });
                    continue;
                }

                check_recurse(graph, checked, errors, dependency_chain, dependency);
            }

            dependency_chain.pop();
        }
    }

    /// Orders all services so every dependency precedes its dependents
    ///
    /// Visits services in registration order, dependencies depth first.
    /// Unregistered dependencies are skipped, they fail once executed.
    pub fn execution_order(&self) -> Result<Vec<String>, DependencyGraphError> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut order = Vec::with_capacity(self.order.len());
        let mut path = Vec::new();

        for name in &self.order {
            self.visit(name, &mut marks, &mut path, &mut order)?;
        }

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), DependencyGraphError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|entry| *entry == name).unwrap_or(0);
                let mut chain: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                chain.push(name.to_string());
                return Err(DependencyGraphError::CircularDependency { chain });
            }
            None => {}
        }

        marks.insert(name, Mark::InProgress);
        path.push(name);

        for dependency in self.dependencies_of(name) {
            if self.contains(dependency) {
                self.visit(dependency, marks, path, order)?;
            }
        }

        path.pop();
        marks.insert(name, Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    /// Finds a dependency path from `from` to any service matching `target`
    ///
    /// The returned path starts with `from` and ends with the matched service.
    pub fn find_path(&self, from: &str, target: impl Fn(&str) -> bool) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        return search(self, from, &target, &mut visited, &mut path).then(|| {
            path.into_iter().map(str::to_string).collect()
        });

        fn search<'a>(
            graph: &'a DependencyGraph,
            name: &'a str,
            target: &impl Fn(&str) -> bool,
            visited: &mut HashSet<&'a str>,
            path: &mut Vec<&'a str>,
        ) -> bool {
            path.push(name);
            for dependency in graph.dependencies_of(name) {
                if target(dependency) {
                    path.push(dependency);
                    return true;
                }
                if visited.insert(dependency) && search(graph, dependency, target, visited, path) {
                    return true;
                }
            }
            path.pop();
            false
        }
    }
}

/// DFS colouring - unvisited services have no mark
#[derive(Clone, Copy)]
enum Mark {
    InProgress,
    Done,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyGraphError {
    #[error("'{required_by}' needs '{dependency}' but it is not registered")]
    MissingDependency {
        dependency: String,
        required_by: String,
    },
    #[error("A Circular Dependency exists through {chain:?}")]
    CircularDependency { chain: Vec<String> },
}
impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(services: &[(&str, &[&str])]) -> DependencyGraph {
        let mut graph = DependencyGraph {
            order: Vec::new(),
            edges: HashMap::new(),
        };
        for (name, deps) in services {
            graph.add(name, deps.iter().map(|d| d.to_string()).collect());
        }
        graph
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|entry| entry == name).unwrap()
    }

    #[test]
    fn dependencies_precede_dependents() {
        let graph = graph(&[
            ("api", &["db", "cache"]),
            ("cache", &["config"]),
            ("db", &["config"]),
            ("config", &[]),
        ]);

        let order = graph.execution_order().unwrap();

        assert_eq!(order, ["config", "db", "cache", "api"]);
        assert_eq!(order.len(), 4);
        assert!(position(&order, "config") < position(&order, "db"));
        assert!(position(&order, "config") < position(&order, "cache"));
        assert!(position(&order, "db") < position(&order, "api"));
        assert!(position(&order, "cache") < position(&order, "api"));
    }

    #[test]
    fn order_follows_registration_and_declaration() {
        let graph = graph(&[("api", &["db", "cache"]), ("cache", &[]), ("db", &[])]);

        assert_eq!(graph.execution_order().unwrap(), ["db", "cache", "api"]);
    }

    #[test]
    fn order_skips_unregistered_dependencies() {
        let graph = graph(&[("api", &["missing"])]);

        assert_eq!(graph.execution_order().unwrap(), ["api"]);
    }

    #[test]
    fn order_reports_cycles() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["b"])]);

        assert_eq!(
            graph.execution_order(),
            Err(DependencyGraphError::CircularDependency {
                chain: vec!["b".into(), "c".into(), "b".into()]
            })
        );
    }

    #[test]
    fn check_collects_every_issue() {
        let graph = graph(&[("a", &["b", "ghost"]), ("b", &["a"]), ("c", &["c"])]);

        let errors = graph.check().unwrap_err().errors;

        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&DependencyGraphError::MissingDependency {
            dependency: "ghost".into(),
            required_by: "a".into(),
        }));
        assert!(errors.contains(&DependencyGraphError::CircularDependency {
            chain: vec!["a".into(), "b".into(), "a".into()]
        }));
        assert!(errors.contains(&DependencyGraphError::CircularDependency {
            chain: vec!["c".into(), "c".into()]
        }));
    }

    #[test]
    fn find_path_walks_dependencies() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[]), ("d", &[])]);

        assert_eq!(
            graph.find_path("a", |name| name == "c"),
            Some(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(graph.find_path("a", |name| name == "d"), None);
    }
}
