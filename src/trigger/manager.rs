// src/trigger/manager.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{debug, warn};

use crate::task::Task;
use crate::trigger::cron::{next_after, parse_schedule};
use crate::types::TaskId;

/// One armed time trigger.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub expression: String,
    schedule: Schedule,
    /// `None` once the schedule has no further occurrences.
    pub next_fire: Option<DateTime<Utc>>,
}

/// Registered triggers: the timer table and the reverse dependency index.
///
/// Timers are not threads; the control loop calls [`TriggerManager::due_timers`]
/// on every tick and enqueues whatever comes back.
#[derive(Debug, Default)]
pub struct TriggerManager {
    timers: BTreeMap<TaskId, TimerEntry>,
    /// upstream task id -> ids of tasks with `after: upstream`.
    dependents: HashMap<TaskId, BTreeSet<TaskId>>,
}

impl TriggerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the trigger of `task`, armed relative to the current time.
    pub fn setup_task_triggers(&mut self, task: &Task, collection_enabled: bool) {
        self.setup_task_triggers_at(task, collection_enabled, Utc::now());
    }

    /// Register the trigger of `task`, if both it and its collection are
    /// enabled. Calling this again for the same task is a no-op.
    pub fn setup_task_triggers_at(
        &mut self,
        task: &Task,
        collection_enabled: bool,
        now: DateTime<Utc>,
    ) {
        if !task.enabled || !collection_enabled {
            return;
        }

        if let Some(expr) = task.cron() {
            if self.timers.contains_key(&task.id) {
                return;
            }
            match parse_schedule(expr) {
                Ok(schedule) => {
                    let next_fire = next_after(&schedule, now);
                    debug!(taskid = %task.id, cron = %expr, next = ?next_fire, "timer armed");
                    self.timers.insert(
                        task.id.clone(),
                        TimerEntry {
                            expression: expr.to_string(),
                            schedule,
                            next_fire,
                        },
                    );
                }
                Err(err) => warn!(taskid = %task.id, error = %err, "not arming timer"),
            }
        }

        if let Some(upstream) = task.depends_on() {
            self.dependents
                .entry(upstream.to_string())
                .or_default()
                .insert(task.id.clone());
        }
    }

    /// Cancel the timer of `task_id` and purge it from the reverse index.
    pub fn remove_task_triggers(&mut self, task_id: &str) {
        if self.timers.remove(task_id).is_some() {
            debug!(taskid = %task_id, "timer cancelled");
        }
        self.dependents.retain(|_, set| {
            set.remove(task_id);
            !set.is_empty()
        });
    }

    pub fn has_timer(&self, task_id: &str) -> bool {
        self.timers.contains_key(task_id)
    }

    pub fn timer(&self, task_id: &str) -> Option<&TimerEntry> {
        self.timers.get(task_id)
    }

    /// Number of armed timers.
    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn timer_ids(&self) -> Vec<TaskId> {
        self.timers.keys().cloned().collect()
    }

    pub fn is_dependency_registered(&self, task_id: &str) -> bool {
        self.dependents.values().any(|set| set.contains(task_id))
    }

    /// Registered direct dependents of `task_id`, in id order.
    pub fn dependents_of(&self, task_id: &str) -> Vec<TaskId> {
        self.dependents
            .get(task_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registered dependents of `task_id` at any depth, breadth first.
    pub fn transitive_dependents(&self, task_id: &str) -> Vec<TaskId> {
        let mut seen: BTreeSet<TaskId> = BTreeSet::new();
        let mut out = Vec::new();
        let mut frontier: VecDeque<TaskId> = self.dependents_of(task_id).into();

        while let Some(id) = frontier.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            frontier.extend(self.dependents_of(&id));
            out.push(id);
        }
        out
    }

    /// Ids of timers due at `now`, re-armed for their next occurrence after
    /// `now`. Occurrences missed between ticks fire once.
    pub fn due_timers(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut due = Vec::new();
        for (id, entry) in self.timers.iter_mut() {
            match entry.next_fire {
                Some(at) if at <= now => {
                    due.push(id.clone());
                    entry.next_fire = next_after(&entry.schedule, now);
                }
                _ => {}
            }
        }
        due
    }

    pub fn clear(&mut self) {
        self.timers.clear();
        self.dependents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::validate::build_task;
    use chrono::TimeZone;
    use serde_json::{Map, json};

    fn task(name: &str, trigger: serde_json::Value) -> Task {
        let def = crate::task::TaskDef::new()
            .with("command", "true")
            .with("trigger", trigger);
        build_task("c", name, &Map::new(), &def).unwrap()
    }

    #[test]
    fn timer_fires_when_due_and_rearms() {
        let mut mgr = TriggerManager::new();
        let t = task("tick", json!({"time": "*/10 * * * *"}));
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 3, 30).unwrap();
        mgr.setup_task_triggers_at(&t, true, start);

        assert!(mgr.due_timers(start).is_empty());

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap();
        assert_eq!(mgr.due_timers(at), vec!["c.tick".to_string()]);
        assert_eq!(
            mgr.timer("c.tick").unwrap().next_fire,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 20, 0).unwrap())
        );

        // An hour late still fires just once.
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 13, 15, 0).unwrap();
        assert_eq!(mgr.due_timers(late).len(), 1);
        assert!(mgr.due_timers(late).is_empty());
    }

    #[test]
    fn setup_is_idempotent_and_respects_enabled() {
        let mut mgr = TriggerManager::new();
        let t = task("tick", json!({"time": "* * * * *"}));
        mgr.setup_task_triggers(&t, false);
        assert_eq!(mgr.active_timers(), 0);

        mgr.setup_task_triggers(&t, true);
        mgr.setup_task_triggers(&t, true);
        assert_eq!(mgr.active_timers(), 1);

        mgr.remove_task_triggers("c.tick");
        assert!(!mgr.has_timer("c.tick"));
    }

    #[test]
    fn reverse_index_tracks_dependents() {
        let mut mgr = TriggerManager::new();
        let b = task("b", json!({"after": "c.a"}));
        let c = task("c", json!({"after": "c.b"}));
        mgr.setup_task_triggers(&b, true);
        mgr.setup_task_triggers(&c, true);
        mgr.setup_task_triggers(&c, true);

        assert_eq!(mgr.dependents_of("c.a"), vec!["c.b".to_string()]);
        assert_eq!(
            mgr.transitive_dependents("c.a"),
            vec!["c.b".to_string(), "c.c".to_string()]
        );

        mgr.remove_task_triggers("c.b");
        assert!(mgr.dependents_of("c.a").is_empty());
        assert!(!mgr.is_dependency_registered("c.b"));
        assert!(mgr.is_dependency_registered("c.c"));
    }
}
