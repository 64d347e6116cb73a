//! Service registry.
//!
//! The registry is the validated, immutable table of [`ServiceDefinition`]s
//! together with the dependency graph between them. Construction fails before
//! anything is spawned if a name is duplicated, a dependency is unknown, or the
//! graph contains a cycle.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::config::ServiceDefinition;
use crate::error::{KanshiError, Result};

/// Ordered, validated list of service definitions.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    /// Definitions in registry (configuration) order.
    services: Vec<ServiceDefinition>,
    /// Name to registry index.
    index: HashMap<String, usize>,
    /// For each service, the indices of the services that depend on it.
    dependents: Vec<Vec<usize>>,
    /// Topological order over every service, ties broken by registry order.
    order: Vec<usize>,
}

impl ServiceRegistry {
    /// Builds the registry and its dependency graph.
    pub fn new(services: Vec<ServiceDefinition>) -> Result<Self> {
        let mut index = HashMap::with_capacity(services.len());
        for (i, def) in services.iter().enumerate() {
            if index.insert(def.name.clone(), i).is_some() {
                return Err(KanshiError::config(format!(
                    "service '{}' is defined more than once",
                    def.name
                )));
            }
        }

        let mut dependents = vec![Vec::new(); services.len()];
        let mut in_degree = vec![0usize; services.len()];
        for (i, def) in services.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &def.depends_on {
                if !seen.insert(dep.as_str()) {
                    return Err(KanshiError::config(format!(
                        "service '{}' lists dependency '{}' more than once",
                        def.name, dep
                    )));
                }
                let Some(&d) = index.get(dep) else {
                    return Err(KanshiError::config(format!(
                        "service '{}' depends on unknown service '{}'",
                        def.name, dep
                    )));
                };
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }

        // Kahn's algorithm; the min-heap keeps ready services in registry order.
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(services.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != services.len() {
            let cyclic: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d > 0)
                .map(|(i, _)| services[i].name.as_str())
                .collect();
            return Err(KanshiError::config(format!(
                "dependency cycle detected among services: {}",
                cyclic.join(", ")
            )));
        }

        Ok(Self {
            services,
            index,
            dependents,
            order,
        })
    }

    /// Definitions in registry order.
    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    /// Enabled definitions in registry order.
    pub fn enabled(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Direct dependencies of a service.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.get(name)
            .map(|def| def.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Services that list `name` in their `depends_on`, in registry order.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(&i) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<usize> = self.dependents[i].clone();
        out.sort_unstable();
        out.into_iter()
            .map(|d| self.services[d].name.as_str())
            .collect()
    }

    /// Dependency-respecting start order of the enabled services.
    pub fn start_order(&self) -> Vec<&ServiceDefinition> {
        self.order
            .iter()
            .map(|&i| &self.services[i])
            .filter(|def| def.enabled)
            .collect()
    }

    /// Dependents-first ordering over the given names.
    pub fn stop_order<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let wanted: HashSet<&str> = names.into_iter().collect();
        let mut out: Vec<String> = self
            .order
            .iter()
            .rev()
            .map(|&i| self.services[i].name.as_str())
            .filter(|name| wanted.contains(name))
            .map(str::to_string)
            .collect();
        // Unknown names cannot be ordered against the graph; stop them last.
        let mut unknown: Vec<&str> = wanted
            .into_iter()
            .filter(|name| !self.index.contains_key(*name))
            .collect();
        unknown.sort_unstable();
        out.extend(unknown.into_iter().map(str::to_string));
        out
    }
}
