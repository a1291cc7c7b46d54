// src/task/store.rs

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::errors::{Result, WardenError};
use crate::task::model::{
    Collection, CollectionConfig, CollectionDef, CollectionView, Task, TaskDef,
};
use crate::task::validate::{
    FixedIdentity, build_task, resolve_identity, validate_dependencies, validate_name,
};
use crate::trigger::TriggerManager;
use crate::types::{TaskId, is_task_id, split_task_id};

/// What a full collection sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub collection: String,
    pub created: Vec<TaskId>,
    pub updated: Vec<TaskId>,
    pub deleted: Vec<TaskId>,
}

/// What a batch sync applied and rejected.
#[derive(Debug, Default)]
pub struct BatchSync {
    pub applied: Vec<SyncReport>,
    /// Position in the input batch and the reason it was not applied.
    pub rejected: Vec<(usize, WardenError)>,
}

/// A bulk definition whose tasks are built but not yet applied.
#[derive(Debug)]
struct PreparedSync {
    collection: String,
    defaults: Map<String, Value>,
    config: CollectionConfig,
    incoming: Vec<Task>,
}

impl PreparedSync {
    fn first_unknown_dependency<'a>(&'a self, known: &BTreeSet<TaskId>) -> Option<(&'a str, &'a str)> {
        self.incoming.iter().find_map(|t| {
            t.depends_on()
                .filter(|dep| !known.contains(*dep))
                .map(|dep| (t.id.as_str(), dep))
        })
    }
}

/// In-memory registry of collections and their tasks.
///
/// Every mutation that affects triggers takes the [`TriggerManager`]
/// explicitly so the two never drift apart.
#[derive(Debug, Clone)]
pub struct TaskStore {
    collections: BTreeMap<String, Collection>,
    default_collection: String,
}

impl TaskStore {
    pub fn new(default_collection: impl Into<String>) -> Self {
        Self {
            collections: BTreeMap::new(),
            default_collection: default_collection.into(),
        }
    }

    pub fn default_collection(&self) -> &str {
        &self.default_collection
    }

    pub fn set_default_collection(&mut self, name: impl Into<String>) {
        self.default_collection = name.into();
    }

    // ---------- queries ----------

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn total_tasks(&self) -> usize {
        self.collections.values().map(|c| c.tasks.len()).sum()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.collections.values().flat_map(|c| c.tasks.values())
    }

    pub fn get_task(&self, id: &str) -> Result<&Task> {
        self.lookup(id)
            .ok_or_else(|| WardenError::NotFound(format!("task {id}")))
    }

    pub fn get_collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| WardenError::NotFound(format!("collection {name}")))
    }

    pub fn get_collection_defaults(&self, name: &str) -> Result<&Map<String, Value>> {
        Ok(&self.get_collection(name)?.defaults)
    }

    /// Whether the named collection exists and is enabled.
    pub fn is_collection_enabled(&self, name: &str) -> bool {
        self.collections
            .get(name)
            .map(|c| c.config.enabled)
            .unwrap_or(false)
    }

    /// List tasks grouped by collection.
    ///
    /// `filter` is either a task id (contains a dot), a collection name, or
    /// `None` for everything.
    pub fn get_tasks(&self, filter: Option<&str>) -> Result<Vec<CollectionView>> {
        match filter {
            None => Ok(self.collections.values().map(Collection::view).collect()),
            Some(f) if is_task_id(f) => {
                let task = self.get_task(f)?;
                let collection = self.get_collection(&task.collection)?;
                let mut view = collection.view();
                view.tasks.retain(|name, _| *name == task.name);
                Ok(vec![view])
            }
            Some(name) => Ok(vec![self.get_collection(name)?.view()]),
        }
    }

    /// Ids of every stored task whose trigger is `after: id`.
    pub fn dependents_of(&self, id: &str) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| t.depends_on() == Some(id))
            .map(|t| t.id.clone())
            .collect()
    }

    fn lookup(&self, id: &str) -> Option<&Task> {
        let (collection, name) = split_task_id(id)?;
        self.collections.get(collection)?.tasks.get(name)
    }

    fn lookup_mut(&mut self, id: &str) -> Option<&mut Task> {
        let (collection, name) = split_task_id(id)?;
        self.collections.get_mut(collection)?.tasks.get_mut(name)
    }

    fn defaults_for(&self, collection: &str) -> Map<String, Value> {
        self.collections
            .get(collection)
            .map(|c| c.defaults.clone())
            .unwrap_or_default()
    }

    fn ensure_collection(&mut self, name: &str) -> &mut Collection {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(collection = %name, "creating collection");
                Collection::new(name)
            })
    }

    /// Check the dependency graph as it would look with `candidates`
    /// replacing their namesakes and every task matched by `dropped` gone.
    fn check_graph(&self, candidates: &[Task], dropped: impl Fn(&Task) -> bool) -> Result<()> {
        let replaced: BTreeSet<&str> = candidates.iter().map(|t| t.id.as_str()).collect();
        let mut universe: Vec<&Task> = self
            .tasks()
            .filter(|t| !replaced.contains(t.id.as_str()) && !dropped(t))
            .collect();
        universe.extend(candidates.iter());
        validate_dependencies(&universe, &replaced)
    }

    // ---------- single-task mutations ----------

    /// Create a task from a raw definition.
    pub fn create_task(&mut self, def: TaskDef, triggers: &mut TriggerManager) -> Result<Task> {
        let (collection, name) = resolve_identity(&def, None, &self.default_collection)?;
        let task = build_task(&collection, &name, &self.defaults_for(&collection), &def)?;

        if self.contains(&task.id) {
            return Err(WardenError::DuplicateTask(task.id));
        }
        self.check_graph(std::slice::from_ref(&task), |_| false)?;

        let coll = self.ensure_collection(&collection);
        let collection_enabled = coll.config.enabled;
        coll.tasks.insert(name, task.clone());
        triggers.setup_task_triggers(&task, collection_enabled);

        debug!(taskid = %task.id, "task created");
        Ok(task)
    }

    /// Replace the definition of an existing task.
    pub fn update_task(
        &mut self,
        id: &str,
        def: TaskDef,
        triggers: &mut TriggerManager,
    ) -> Result<Task> {
        let (collection, name) = {
            let existing = self.get_task(id)?;
            (existing.collection.clone(), existing.name.clone())
        };
        let fixed = FixedIdentity {
            collection: &collection,
            name: Some(&name),
        };
        resolve_identity(&def, Some(fixed), &self.default_collection)?;
        let task = build_task(&collection, &name, &self.defaults_for(&collection), &def)?;
        self.check_graph(std::slice::from_ref(&task), |_| false)?;

        triggers.remove_task_triggers(id);
        let collection_enabled = self.is_collection_enabled(&collection);
        if let Some(slot) = self.lookup_mut(id) {
            *slot = task.clone();
        }
        triggers.setup_task_triggers(&task, collection_enabled);

        debug!(taskid = %id, "task updated");
        Ok(task)
    }

    /// Remove a task. Tasks that still depend on it block the deletion.
    pub fn delete_task(&mut self, id: &str, triggers: &mut TriggerManager) -> Result<Task> {
        let (collection, name) = {
            let task = self.get_task(id)?;
            (task.collection.clone(), task.name.clone())
        };
        self.check_graph(&[], |t| t.id == id)?;

        triggers.remove_task_triggers(id);
        let removed = self
            .collections
            .get_mut(&collection)
            .and_then(|c| c.tasks.remove(&name))
            .ok_or_else(|| WardenError::NotFound(format!("task {id}")))?;

        debug!(taskid = %id, "task deleted");
        Ok(removed)
    }

    pub fn enable_task(&mut self, id: &str, triggers: &mut TriggerManager) -> Result<Task> {
        let collection = self.get_task(id)?.collection.clone();
        if !self.is_collection_enabled(&collection) {
            return Err(WardenError::CollectionDisabled(collection));
        }

        let task = match self.lookup_mut(id) {
            Some(task) => {
                task.set_enabled(true);
                task.clone()
            }
            None => return Err(WardenError::NotFound(format!("task {id}"))),
        };
        triggers.setup_task_triggers(&task, true);
        Ok(task)
    }

    pub fn disable_task(&mut self, id: &str, triggers: &mut TriggerManager) -> Result<Task> {
        let task = match self.lookup_mut(id) {
            Some(task) => {
                task.set_enabled(false);
                task.clone()
            }
            None => return Err(WardenError::NotFound(format!("task {id}"))),
        };
        triggers.remove_task_triggers(id);
        Ok(task)
    }

    // ---------- collection mutations ----------

    /// Reconcile one collection against a bulk definition.
    ///
    /// The whole definition is validated before anything changes: tasks in
    /// `bulk` are created or replaced, stored tasks missing from `bulk` are
    /// deleted, and `defaults`/`config` are replaced.
    pub fn sync_collection(
        &mut self,
        bulk: CollectionDef,
        triggers: &mut TriggerManager,
    ) -> Result<SyncReport> {
        let prepared = self.prepare_sync(bulk)?;
        self.check_syncs(&[&prepared])?;
        Ok(self.apply_sync(prepared, triggers))
    }

    /// Reconcile several collections at once.
    ///
    /// Dependencies are resolved across the whole batch, so collections whose
    /// tasks depend on each other apply together. A definition that is
    /// malformed, or whose `after` targets exist neither in the store nor in
    /// the batch, is rejected without holding back the others.
    pub fn sync_collections(
        &mut self,
        bulks: Vec<CollectionDef>,
        triggers: &mut TriggerManager,
    ) -> BatchSync {
        let mut outcome = BatchSync::default();
        let mut names = BTreeSet::new();
        let mut pending = Vec::with_capacity(bulks.len());

        for (index, bulk) in bulks.into_iter().enumerate() {
            if !names.insert(bulk.collection.clone()) {
                outcome.rejected.push((
                    index,
                    WardenError::Validation(format!(
                        "collection {} is defined more than once",
                        bulk.collection
                    )),
                ));
                continue;
            }
            match self.prepare_sync(bulk) {
                Ok(prepared) => pending.push((index, prepared)),
                Err(err) => outcome.rejected.push((index, err)),
            }
        }

        // Drop definitions with dangling references until the rest is closed.
        loop {
            let known = self.ids_after_syncs(pending.iter().map(|(_, p)| p));
            let (closed, dangling): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|(_, p)| p.first_unknown_dependency(&known).is_none());
            pending = closed;
            if dangling.is_empty() {
                break;
            }
            for (index, prepared) in dangling {
                if let Some((task, dep)) = prepared.first_unknown_dependency(&known) {
                    outcome.rejected.push((
                        index,
                        WardenError::Validation(format!(
                            "task '{task}' has unknown dependency '{dep}' in `after`"
                        )),
                    ));
                }
            }
        }

        let batch: Vec<&PreparedSync> = pending.iter().map(|(_, p)| p).collect();
        match self.check_syncs(&batch) {
            Ok(()) => {
                for (_, prepared) in pending {
                    outcome.applied.push(self.apply_sync(prepared, triggers));
                }
            }
            Err(err) => {
                debug!(error = %err, "batch sync rejected; applying one at a time");
                self.apply_one_at_a_time(pending, triggers, &mut outcome);
            }
        }

        outcome.rejected.sort_by_key(|(index, _)| *index);
        outcome
    }

    fn apply_one_at_a_time(
        &mut self,
        mut pending: Vec<(usize, PreparedSync)>,
        triggers: &mut TriggerManager,
        outcome: &mut BatchSync,
    ) {
        loop {
            let mut progressed = false;
            let mut failed = Vec::new();

            for (index, prepared) in pending {
                match self.check_syncs(&[&prepared]) {
                    Ok(()) => {
                        outcome.applied.push(self.apply_sync(prepared, triggers));
                        progressed = true;
                    }
                    Err(err) => failed.push((index, prepared, err)),
                }
            }

            if !progressed || failed.is_empty() {
                outcome
                    .rejected
                    .extend(failed.into_iter().map(|(index, _, err)| (index, err)));
                return;
            }
            pending = failed
                .into_iter()
                .map(|(index, prepared, _)| (index, prepared))
                .collect();
        }
    }

    /// Build and validate the tasks of a bulk definition, without checking
    /// the dependency graph.
    fn prepare_sync(&self, bulk: CollectionDef) -> Result<PreparedSync> {
        let CollectionDef {
            collection,
            defaults,
            config,
            tasks: defs,
        } = bulk;
        validate_name("collection", &collection)?;

        let mut incoming = Vec::with_capacity(defs.len());
        for (name, def) in defs.iter() {
            let fixed = FixedIdentity {
                collection: &collection,
                name: Some(name.as_str()),
            };
            let (_, name) = resolve_identity(def, Some(fixed), &self.default_collection)?;
            incoming.push(build_task(&collection, &name, &defaults, def)?);
        }

        Ok(PreparedSync {
            collection,
            defaults,
            config,
            incoming,
        })
    }

    /// Check the graph as it would look with every collection in `batch`
    /// replaced by its incoming tasks.
    fn check_syncs(&self, batch: &[&PreparedSync]) -> Result<()> {
        let synced: BTreeSet<&str> = batch.iter().map(|p| p.collection.as_str()).collect();
        let candidates: Vec<Task> = batch
            .iter()
            .flat_map(|p| p.incoming.iter().cloned())
            .collect();
        let incoming_ids: BTreeSet<&str> = candidates.iter().map(|t| t.id.as_str()).collect();

        self.check_graph(&candidates, |t| {
            synced.contains(t.collection.as_str()) && !incoming_ids.contains(t.id.as_str())
        })
    }

    /// Task ids present once `batch` has been applied.
    fn ids_after_syncs<'a>(
        &self,
        batch: impl Iterator<Item = &'a PreparedSync> + Clone,
    ) -> BTreeSet<TaskId> {
        let synced: BTreeSet<&str> = batch.clone().map(|p| p.collection.as_str()).collect();
        self.tasks()
            .filter(|t| !synced.contains(t.collection.as_str()))
            .map(|t| t.id.clone())
            .chain(batch.flat_map(|p| p.incoming.iter().map(|t| t.id.clone())))
            .collect()
    }

    fn apply_sync(&mut self, prepared: PreparedSync, triggers: &mut TriggerManager) -> SyncReport {
        let PreparedSync {
            collection,
            defaults,
            config,
            incoming,
        } = prepared;

        let mut report = SyncReport {
            collection: collection.clone(),
            ..SyncReport::default()
        };

        let incoming_ids: BTreeSet<TaskId> = incoming.iter().map(|t| t.id.clone()).collect();
        let existing: BTreeSet<TaskId> = self
            .collections
            .get(&collection)
            .map(|c| c.tasks.values().map(|t| t.id.clone()).collect())
            .unwrap_or_default();
        for id in existing.iter() {
            triggers.remove_task_triggers(id);
            if !incoming_ids.contains(id) {
                report.deleted.push(id.clone());
            }
        }

        let coll = self.ensure_collection(&collection);
        coll.defaults = defaults;
        coll.config = config;
        coll.tasks.clear();
        for task in incoming {
            if existing.contains(&task.id) {
                report.updated.push(task.id.clone());
            } else {
                report.created.push(task.id.clone());
            }
            triggers.setup_task_triggers(&task, config.enabled);
            coll.tasks.insert(task.name.clone(), task);
        }

        info!(
            collection = %report.collection,
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            "collection synced"
        );
        report
    }

    /// Replace a collection's defaults, creating the collection if needed.
    ///
    /// Returns `true` when the collection was created. Existing tasks keep the
    /// values they were built with.
    pub fn set_collection_defaults(
        &mut self,
        name: &str,
        defaults: Map<String, Value>,
    ) -> Result<bool> {
        validate_name("collection", name)?;
        let created = !self.collections.contains_key(name);
        self.ensure_collection(name).defaults = defaults;
        Ok(created)
    }

    /// Enable a collection and register triggers of its enabled tasks.
    ///
    /// Returns the ids of the collection's tasks, or an empty list when the
    /// collection was already enabled.
    pub fn enable_collection(
        &mut self,
        name: &str,
        triggers: &mut TriggerManager,
    ) -> Result<Vec<TaskId>> {
        let coll = self
            .collections
            .get_mut(name)
            .ok_or_else(|| WardenError::NotFound(format!("collection {name}")))?;
        if coll.config.enabled {
            return Ok(Vec::new());
        }

        coll.config.enabled = true;
        for task in coll.tasks.values() {
            triggers.setup_task_triggers(task, true);
        }
        Ok(coll.tasks.values().map(|t| t.id.clone()).collect())
    }

    /// Disable a collection, removing every trigger of its tasks.
    pub fn disable_collection(
        &mut self,
        name: &str,
        triggers: &mut TriggerManager,
    ) -> Result<Vec<TaskId>> {
        let coll = self
            .collections
            .get_mut(name)
            .ok_or_else(|| WardenError::NotFound(format!("collection {name}")))?;
        if !coll.config.enabled {
            return Ok(Vec::new());
        }

        coll.config.enabled = false;
        let ids: Vec<TaskId> = coll.tasks.values().map(|t| t.id.clone()).collect();
        for id in ids.iter() {
            triggers.remove_task_triggers(id);
        }
        Ok(ids)
    }

    /// Delete a collection with all its tasks, defaults and config.
    pub fn delete_collection(
        &mut self,
        name: &str,
        triggers: &mut TriggerManager,
    ) -> Result<Vec<TaskId>> {
        self.get_collection(name)?;
        self.check_graph(&[], |t| t.collection == name)?;

        let removed = self
            .collections
            .remove(name)
            .ok_or_else(|| WardenError::NotFound(format!("collection {name}")))?;
        let ids: Vec<TaskId> = removed.tasks.values().map(|t| t.id.clone()).collect();
        for id in ids.iter() {
            triggers.remove_task_triggers(id);
        }

        info!(collection = %name, tasks = ids.len(), "collection deleted");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(v: Value) -> TaskDef {
        TaskDef::from_value(v).unwrap()
    }

    #[test]
    fn dotted_name_creates_collection() {
        let mut store = TaskStore::new("default");
        let mut triggers = TriggerManager::new();

        let task = store
            .create_task(
                def(json!({"name": "foo.bar", "command": "echo hi"})),
                &mut triggers,
            )
            .unwrap();
        assert_eq!(task.id, "foo.bar");
        assert!(store.is_collection_enabled("foo"));
        assert_eq!(store.total_tasks(), 1);
    }

    #[test]
    fn get_tasks_by_task_id_returns_single_task_view() {
        let mut store = TaskStore::new("default");
        let mut triggers = TriggerManager::new();
        for name in ["a.one", "a.two"] {
            store
                .create_task(def(json!({"name": name, "command": "true"})), &mut triggers)
                .unwrap();
        }

        let views = store.get_tasks(Some("a.two")).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].tasks.keys().collect::<Vec<_>>(), vec!["two"]);

        assert_eq!(store.get_tasks(Some("a")).unwrap()[0].tasks.len(), 2);
        assert!(matches!(
            store.get_tasks(Some("nope")),
            Err(WardenError::NotFound(_))
        ));
    }

    #[test]
    fn dependency_blocks_deletion() {
        let mut store = TaskStore::new("default");
        let mut triggers = TriggerManager::new();
        store
            .create_task(def(json!({"name": "x.up", "command": "true"})), &mut triggers)
            .unwrap();
        store
            .create_task(
                def(json!({"name": "x.down", "command": "true", "trigger": {"after": "x.up"}})),
                &mut triggers,
            )
            .unwrap();

        assert_eq!(store.dependents_of("x.up"), vec!["x.down".to_string()]);
        assert!(matches!(
            store.delete_task("x.up", &mut triggers),
            Err(WardenError::Validation(_))
        ));

        store.delete_task("x.down", &mut triggers).unwrap();
        store.delete_task("x.up", &mut triggers).unwrap();
        assert_eq!(store.total_tasks(), 0);
    }

    #[test]
    fn set_defaults_creates_collection() {
        let mut store = TaskStore::new("default");
        let defaults = json!({"cwd": "/tmp"}).as_object().cloned().unwrap();
        assert!(store.set_collection_defaults("fresh", defaults.clone()).unwrap());
        assert!(!store.set_collection_defaults("fresh", defaults).unwrap());
        assert_eq!(
            store.get_collection_defaults("fresh").unwrap()["cwd"],
            json!("/tmp")
        );
    }

    fn bulk(v: Value) -> CollectionDef {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn batch_sync_accepts_references_between_collections() {
        let mut store = TaskStore::new("default");
        let mut triggers = TriggerManager::new();

        let batch = store.sync_collections(
            vec![
                bulk(json!({"collection": "a", "tasks": {
                    "w": {"command": "true"},
                    "x": {"command": "true", "trigger": {"after": "b.y"}}
                }})),
                bulk(json!({"collection": "b", "tasks": {
                    "y": {"command": "true"},
                    "z": {"command": "true", "trigger": {"after": "a.w"}}
                }})),
                bulk(json!({"collection": "a", "tasks": {}})),
            ],
            &mut triggers,
        );

        assert_eq!(batch.applied.len(), 2);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].0, 2);
        assert_eq!(store.total_tasks(), 4);
        assert_eq!(store.dependents_of("a.w"), vec!["b.z".to_string()]);
    }

    #[test]
    fn batch_sync_falls_back_when_the_union_has_a_cycle() {
        let mut store = TaskStore::new("default");
        let mut triggers = TriggerManager::new();

        let batch = store.sync_collections(
            vec![
                bulk(json!({"collection": "a", "tasks": {
                    "p": {"command": "true", "trigger": {"after": "b.q"}}
                }})),
                bulk(json!({"collection": "b", "tasks": {
                    "q": {"command": "true", "trigger": {"after": "a.p"}}
                }})),
                bulk(json!({"collection": "c", "tasks": {"r": {"command": "true"}}})),
            ],
            &mut triggers,
        );

        let rejected: Vec<usize> = batch.rejected.iter().map(|(i, _)| *i).collect();
        assert_eq!(rejected, vec![0, 1]);
        assert_eq!(store.collection_names(), vec!["c"]);
    }
}
