//! Extension-point registry.
//!
//! An extension point couples an identifier with a capability contract:
//! the Rust type every registered implementation must be (commonly an
//! `Arc<dyn SomeContract>`). Implementations carry an integer priority;
//! enumeration is in descending priority with ties broken by
//! registration order.
//!
//! Readers take an `Arc` snapshot of the entry list and never block on
//! writers; writers rebuild and re-sort the list under the registry
//! lock.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crucible_core::{ExtensionHandle, PluginError, PluginResult};

/// Public description of a registered extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPointInfo {
    /// The point identifier.
    pub id: String,
    /// Name of the contract type, for diagnostics.
    pub contract: &'static str,
    /// Whether more than one implementation may be registered.
    pub allow_multiple: bool,
}

#[derive(Clone)]
struct Entry {
    handle: ExtensionHandle,
    priority: i32,
    seq: u64,
    owner: Option<String>,
}

struct PointRecord {
    contract: TypeId,
    contract_name: &'static str,
    allow_multiple: bool,
    /// Copy-on-write snapshot, kept sorted by `(-priority, seq)`.
    entries: Arc<Vec<Entry>>,
    next_seq: u64,
}

impl PointRecord {
    fn mutate(&mut self, f: impl FnOnce(&mut Vec<Entry>)) {
        let mut entries: Vec<Entry> = self.entries.as_ref().clone();
        f(&mut entries);
        entries.sort_by_key(|e| (std::cmp::Reverse(e.priority), e.seq));
        self.entries = Arc::new(entries);
    }
}

/// Maps extension-point ids to priority-ordered implementation lists.
pub struct ExtensionRegistry {
    points: RwLock<HashMap<String, PointRecord>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an extension point with contract type `C`.
    ///
    /// Idempotent for identical arguments; re-registering the same id
    /// with a different contract or multiplicity fails.
    pub fn register_point<C: Any>(
        &self,
        id: impl Into<String>,
        allow_multiple: bool,
    ) -> PluginResult<()> {
        let id = id.into();
        let mut points = self.points.write();
        if let Some(existing) = points.get(&id) {
            if existing.contract == TypeId::of::<C>()
                && existing.allow_multiple == allow_multiple
            {
                return Ok(());
            }
            return Err(PluginError::invalid(format!(
                "extension point '{id}' already registered with contract {}",
                existing.contract_name
            )));
        }
        debug!(point = %id, contract = type_name::<C>(), "Extension point registered");
        points.insert(
            id,
            PointRecord {
                contract: TypeId::of::<C>(),
                contract_name: type_name::<C>(),
                allow_multiple,
                entries: Arc::new(Vec::new()),
                next_seq: 0,
            },
        );
        Ok(())
    }

    /// Registers an implementation value of the contract type.
    ///
    /// Returns the erased handle, which identifies the entry for
    /// [`unregister`](Self::unregister).
    pub fn register<C: Any + Send + Sync>(
        &self,
        point_id: &str,
        implementation: C,
        priority: i32,
    ) -> PluginResult<ExtensionHandle> {
        let handle: ExtensionHandle = Arc::new(implementation);
        self.register_handle(point_id, Arc::clone(&handle), priority, None)?;
        Ok(handle)
    }

    /// Registers a pre-erased handle, optionally owned by a plugin.
    ///
    /// Fails when the point is unknown, when the handle's concrete type
    /// does not satisfy the point's contract, or when a second
    /// implementation is offered to a single-implementation point.
    pub fn register_handle(
        &self,
        point_id: &str,
        handle: ExtensionHandle,
        priority: i32,
        owner: Option<&str>,
    ) -> PluginResult<()> {
        let mut points = self.points.write();
        let record = points
            .get_mut(point_id)
            .ok_or_else(|| PluginError::not_found(point_id))?;

        if handle.as_ref().type_id() != record.contract {
            return Err(PluginError::invalid(format!(
                "implementation does not satisfy contract {} of extension point '{point_id}'",
                record.contract_name
            )));
        }
        if !record.allow_multiple && !record.entries.is_empty() {
            return Err(PluginError::duplicate(point_id));
        }

        let seq = record.next_seq;
        record.next_seq += 1;
        let owner = owner.map(str::to_string);
        record.mutate(|entries| {
            entries.push(Entry {
                handle,
                priority,
                seq,
                owner,
            });
        });
        debug!(point = point_id, priority, "Extension registered");
        Ok(())
    }

    /// Removes an implementation by identity. No-op if absent.
    pub fn unregister(&self, point_id: &str, handle: &ExtensionHandle) -> bool {
        let mut points = self.points.write();
        let Some(record) = points.get_mut(point_id) else {
            return false;
        };
        let before = record.entries.len();
        record.mutate(|entries| entries.retain(|e| !Arc::ptr_eq(&e.handle, handle)));
        record.entries.len() != before
    }

    /// Withdraws every extension registered on behalf of a plugin.
    pub fn drop_owned(&self, plugin_id: &str) -> usize {
        let mut removed = 0;
        let mut points = self.points.write();
        for record in points.values_mut() {
            let before = record.entries.len();
            record.mutate(|entries| {
                entries.retain(|e| e.owner.as_deref() != Some(plugin_id));
            });
            removed += before - record.entries.len();
        }
        if removed > 0 {
            debug!(plugin = plugin_id, removed, "Extensions withdrawn");
        }
        removed
    }

    /// Enumerates implementations of a point as the contract type, in
    /// descending priority (ties by registration order).
    pub fn extensions_of<C: Any + Clone>(&self, point_id: &str) -> PluginResult<Vec<C>> {
        let entries = self.snapshot(point_id)?;
        Ok(entries
            .iter()
            .filter_map(|e| e.handle.downcast_ref::<C>().cloned())
            .collect())
    }

    /// The highest-priority implementation of a point, if any.
    pub fn highest_priority<C: Any + Clone>(&self, point_id: &str) -> PluginResult<Option<C>> {
        let entries = self.snapshot(point_id)?;
        Ok(entries
            .first()
            .and_then(|e| e.handle.downcast_ref::<C>().cloned()))
    }

    /// Enumerates the erased handles of a point, priority-ordered.
    pub fn handles(&self, point_id: &str) -> PluginResult<Vec<ExtensionHandle>> {
        let entries = self.snapshot(point_id)?;
        Ok(entries.iter().map(|e| Arc::clone(&e.handle)).collect())
    }

    /// Number of implementations registered against a point.
    pub fn extension_count(&self, point_id: &str) -> PluginResult<usize> {
        Ok(self.snapshot(point_id)?.len())
    }

    /// Descriptions of all registered points.
    pub fn points(&self) -> Vec<ExtensionPointInfo> {
        self.points
            .read()
            .iter()
            .map(|(id, record)| ExtensionPointInfo {
                id: id.clone(),
                contract: record.contract_name,
                allow_multiple: record.allow_multiple,
            })
            .collect()
    }

    /// Ids of all registered points.
    pub fn point_ids(&self) -> Vec<String> {
        self.points.read().keys().cloned().collect()
    }

    /// Whether a point is registered.
    pub fn contains_point(&self, point_id: &str) -> bool {
        self.points.read().contains_key(point_id)
    }

    fn snapshot(&self, point_id: &str) -> PluginResult<Arc<Vec<Entry>>> {
        self.points
            .read()
            .get(point_id)
            .map(|record| Arc::clone(&record.entries))
            .ok_or_else(|| PluginError::not_found(point_id))
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("points", &self.point_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Named(&'static str);

    impl Greeter for Named {
        fn greet(&self) -> String {
            self.0.to_string()
        }
    }

    type GreeterHandle = Arc<dyn Greeter>;

    fn greeter(name: &'static str) -> GreeterHandle {
        Arc::new(Named(name))
    }

    #[test]
    fn priority_order_with_stable_ties() {
        let registry = ExtensionRegistry::new();
        registry.register_point::<GreeterHandle>("ep1", true).unwrap();

        registry.register("ep1", greeter("x"), 100).unwrap();
        registry.register("ep1", greeter("y"), 200).unwrap();
        registry.register("ep1", greeter("z"), 50).unwrap();
        registry.register("ep1", greeter("y2"), 200).unwrap();

        let names: Vec<String> = registry
            .extensions_of::<GreeterHandle>("ep1")
            .unwrap()
            .iter()
            .map(|g| g.greet())
            .collect();
        assert_eq!(names, ["y", "y2", "x", "z"]);

        let top = registry
            .highest_priority::<GreeterHandle>("ep1")
            .unwrap()
            .unwrap();
        assert_eq!(top.greet(), "y");
    }

    #[test]
    fn point_registration_is_idempotent_on_identical_arguments() {
        let registry = ExtensionRegistry::new();
        registry.register_point::<GreeterHandle>("ep1", true).unwrap();
        registry.register_point::<GreeterHandle>("ep1", true).unwrap();

        // Different contract for the same id is rejected.
        assert!(registry.register_point::<String>("ep1", true).is_err());
        // Different multiplicity is rejected too.
        assert!(registry.register_point::<GreeterHandle>("ep1", false).is_err());
    }

    #[test]
    fn contract_mismatch_is_rejected() {
        let registry = ExtensionRegistry::new();
        registry.register_point::<GreeterHandle>("ep1", true).unwrap();
        let err = registry.register("ep1", "not a greeter".to_string(), 1);
        assert!(matches!(err, Err(PluginError::InvalidArgument(_))));
    }

    #[test]
    fn unknown_point_is_rejected() {
        let registry = ExtensionRegistry::new();
        assert!(matches!(
            registry.register("missing", greeter("x"), 1),
            Err(PluginError::NotFound { .. })
        ));
        assert!(registry.extensions_of::<GreeterHandle>("missing").is_err());
    }

    #[test]
    fn single_implementation_points_reject_seconds() {
        let registry = ExtensionRegistry::new();
        registry.register_point::<GreeterHandle>("solo", false).unwrap();
        registry.register("solo", greeter("a"), 1).unwrap();
        assert!(matches!(
            registry.register("solo", greeter("b"), 2),
            Err(PluginError::Duplicate { .. })
        ));
    }

    #[test]
    fn unregister_by_identity() {
        let registry = ExtensionRegistry::new();
        registry.register_point::<GreeterHandle>("ep1", true).unwrap();
        let kept = registry.register("ep1", greeter("keep"), 10).unwrap();
        let gone = registry.register("ep1", greeter("gone"), 20).unwrap();

        assert!(registry.unregister("ep1", &gone));
        assert!(!registry.unregister("ep1", &gone));
        let _ = kept;

        let names: Vec<String> = registry
            .extensions_of::<GreeterHandle>("ep1")
            .unwrap()
            .iter()
            .map(|g| g.greet())
            .collect();
        assert_eq!(names, ["keep"]);
    }

    #[test]
    fn drop_owned_withdraws_only_that_plugin() {
        let registry = ExtensionRegistry::new();
        registry.register_point::<GreeterHandle>("ep1", true).unwrap();
        registry
            .register_handle("ep1", Arc::new(greeter("mine")), 10, Some("p1"))
            .unwrap();
        registry
            .register_handle("ep1", Arc::new(greeter("theirs")), 5, Some("p2"))
            .unwrap();

        assert_eq!(registry.drop_owned("p1"), 1);
        assert_eq!(registry.extension_count("ep1").unwrap(), 1);
    }
}
