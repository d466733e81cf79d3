//! Dependency resolution and transitive closures.
//!
//! [`resolve`] orders a plugin set so that every plugin appears after
//! everything it depends on, validating version constraints on the way.
//! The traversal is depth-first with an explicit descent path, so cycle
//! errors carry the offending path.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crucible_core::{PluginError, PluginMetadata, PluginResult};

/// Orders plugins by declared dependencies.
///
/// On success the result is a permutation of the input ids: dependencies
/// first, dependents after, roots visited in input order so the overall
/// order is deterministic.
///
/// # Errors
///
/// - [`PluginError::CircularDependency`] with the cycle path
/// - [`PluginError::DependencyNotFound`] when a required dependency id is
///   absent from the input set (optional dependencies may be absent)
/// - [`PluginError::IncompatibleDependency`] when a dependency is present
///   but its version violates the constraint (optional or not)
pub fn resolve(plugins: &[PluginMetadata]) -> PluginResult<Vec<String>> {
    let by_id: HashMap<&str, &PluginMetadata> =
        plugins.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();
    let mut order: Vec<String> = Vec::with_capacity(plugins.len());

    for meta in plugins {
        visit(meta, &by_id, &mut visited, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    meta: &'a PluginMetadata,
    by_id: &HashMap<&str, &'a PluginMetadata>,
    visited: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> PluginResult<()> {
    let id = meta.id.as_str();

    if let Some(start) = path.iter().position(|p| *p == id) {
        let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
        cycle.push(id.to_string());
        return Err(PluginError::CircularDependency { path: cycle });
    }
    if visited.contains(id) {
        return Ok(());
    }

    path.push(id);
    for dep in &meta.dependencies {
        match by_id.get(dep.plugin_id.as_str()) {
            None if dep.optional => continue,
            None => {
                return Err(PluginError::DependencyNotFound {
                    plugin: id.to_string(),
                    dependency: dep.plugin_id.clone(),
                });
            }
            Some(dep_meta) => {
                if !dep.constraint.matches(&dep_meta.version) {
                    return Err(PluginError::IncompatibleDependency {
                        plugin: id.to_string(),
                        dependency: dep.plugin_id.clone(),
                        constraint: dep.constraint.to_string(),
                        found: dep_meta.version.clone(),
                    });
                }
                visit(dep_meta, by_id, visited, path, order)?;
            }
        }
    }
    path.pop();
    visited.insert(id);
    order.push(id.to_string());
    Ok(())
}

/// The transitive prerequisites of `id` (present dependencies, required
/// or optional), in dependency order, ending with `id` itself.
///
/// This is the order the facade starts plugins in.
pub fn start_closure(plugins: &[PluginMetadata], id: &str) -> PluginResult<Vec<String>> {
    if !plugins.iter().any(|m| m.id == id) {
        return Err(PluginError::not_found(id));
    }
    let full_order = resolve(plugins)?;
    let closure = transitive_dependencies(plugins, id);
    Ok(full_order
        .into_iter()
        .filter(|pid| pid == id || closure.contains(pid.as_str()))
        .collect())
}

/// The transitive dependents of `id`, dependents first, ending with `id`
/// itself.
///
/// This is the order the facade stops plugins in.
pub fn stop_closure(plugins: &[PluginMetadata], id: &str) -> PluginResult<Vec<String>> {
    if !plugins.iter().any(|m| m.id == id) {
        return Err(PluginError::not_found(id));
    }
    let full_order = resolve(plugins)?;
    let dependents = transitive_dependents(plugins, id);
    let mut closure: Vec<String> = full_order
        .into_iter()
        .filter(|pid| pid == id || dependents.contains(pid.as_str()))
        .collect();
    closure.reverse();
    Ok(closure)
}

fn transitive_dependencies<'a>(plugins: &'a [PluginMetadata], id: &str) -> HashSet<&'a str> {
    let by_id: HashMap<&str, &PluginMetadata> =
        plugins.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut closure: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![];
    if let Some(meta) = by_id.get(id) {
        stack.extend(present_dependency_ids(meta, &by_id));
    }
    while let Some(dep) = stack.pop() {
        if closure.insert(dep) {
            if let Some(meta) = by_id.get(dep) {
                stack.extend(present_dependency_ids(meta, &by_id));
            } else {
                warn!(plugin = dep, "Dependency disappeared during closure computation");
            }
        }
    }
    closure
}

fn transitive_dependents<'a>(plugins: &'a [PluginMetadata], id: &str) -> HashSet<&'a str> {
    // Reverse adjacency over present dependencies.
    let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for meta in plugins {
        for dep in &meta.dependencies {
            dependents_of
                .entry(dep.plugin_id.as_str())
                .or_default()
                .push(meta.id.as_str());
        }
    }

    let mut closure: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = dependents_of.get(id).cloned().unwrap_or_default();
    while let Some(dependent) = stack.pop() {
        if closure.insert(dependent)
            && let Some(next) = dependents_of.get(dependent)
        {
            stack.extend(next);
        }
    }
    closure
}

fn present_dependency_ids<'a>(
    meta: &'a PluginMetadata,
    by_id: &HashMap<&str, &'a PluginMetadata>,
) -> Vec<&'a str> {
    meta.dependencies
        .iter()
        .filter(|dep| by_id.contains_key(dep.plugin_id.as_str()))
        .map(|dep| dep.plugin_id.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, version: &str, deps: &[&str]) -> PluginMetadata {
        let mut builder = PluginMetadata::builder(id, id, version);
        for dep in deps {
            builder = builder.dependency(dep).unwrap();
        }
        builder.build()
    }

    #[test]
    fn linear_chain_orders_dependencies_first() {
        let plugins = vec![
            meta("c", "1.0.0", &["b"]),
            meta("a", "1.0.0", &[]),
            meta("b", "1.0.0", &["a>=1.0.0"]),
        ];
        let order = resolve(&plugins).unwrap();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn result_is_permutation_of_input() {
        let plugins = vec![
            meta("d", "1.0", &["a", "c"]),
            meta("a", "1.0", &[]),
            meta("c", "1.0", &["a"]),
            meta("b", "1.0", &[]),
        ];
        let order = resolve(&plugins).unwrap();
        assert_eq!(order.len(), 4);
        for meta in &plugins {
            let own = order.iter().position(|p| *p == meta.id).unwrap();
            for dep in &meta.dependencies {
                let dep_pos = order.iter().position(|p| *p == dep.plugin_id).unwrap();
                assert!(dep_pos < own, "{} must precede {}", dep.plugin_id, meta.id);
            }
        }
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let plugins = vec![meta("a", "1.0", &["b"]), meta("b", "1.0", &["a"])];
        match resolve(&plugins) {
            Err(PluginError::CircularDependency { path }) => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_dependency() {
        let plugins = vec![meta("a", "1.0", &["ghost"])];
        match resolve(&plugins) {
            Err(PluginError::DependencyNotFound { plugin, dependency }) => {
                assert_eq!(plugin, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected not-found error, got {other:?}"),
        }
    }

    #[test]
    fn missing_optional_dependency_is_fine() {
        let plugins = vec![meta("a", "1.0", &["?ghost>=1"])];
        assert_eq!(resolve(&plugins).unwrap(), ["a"]);
    }

    #[test]
    fn incompatible_version_names_constraint() {
        let plugins = vec![meta("a", "1.0.0", &[]), meta("b", "1.0.0", &["a>=2.0.0"])];
        match resolve(&plugins) {
            Err(PluginError::IncompatibleDependency {
                plugin,
                dependency,
                constraint,
                found,
            }) => {
                assert_eq!(plugin, "b");
                assert_eq!(dependency, "a");
                assert_eq!(constraint, ">=2.0.0");
                assert_eq!(found, "1.0.0");
            }
            other => panic!("expected incompatibility error, got {other:?}"),
        }
    }

    #[test]
    fn present_optional_dependency_is_still_version_checked() {
        let plugins = vec![meta("x", "0.9", &[]), meta("a", "1.0", &["?x>=1"])];
        assert!(matches!(
            resolve(&plugins),
            Err(PluginError::IncompatibleDependency { .. })
        ));
    }

    #[test]
    fn start_closure_ends_with_target() {
        let plugins = vec![
            meta("a", "1.0", &[]),
            meta("b", "1.0", &["a"]),
            meta("c", "1.0", &["b"]),
            meta("unrelated", "1.0", &[]),
        ];
        assert_eq!(start_closure(&plugins, "c").unwrap(), ["a", "b", "c"]);
        assert_eq!(start_closure(&plugins, "a").unwrap(), ["a"]);
    }

    #[test]
    fn stop_closure_puts_dependents_first() {
        let plugins = vec![
            meta("a", "1.0", &[]),
            meta("b", "1.0", &["a"]),
            meta("c", "1.0", &["b"]),
        ];
        assert_eq!(stop_closure(&plugins, "a").unwrap(), ["c", "b", "a"]);
        assert_eq!(stop_closure(&plugins, "c").unwrap(), ["c"]);
    }

    #[test]
    fn closures_reject_unknown_target() {
        let plugins = vec![meta("a", "1.0", &[])];
        assert!(start_closure(&plugins, "nope").is_err());
        assert!(stop_closure(&plugins, "nope").is_err());
    }
}
