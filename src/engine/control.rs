// src/engine/control.rs

//! Request/reply surface of the control loop.
//!
//! External layers hold a [`SchedulerHandle`]. Every call becomes a
//! [`ControlRequest`] carrying a oneshot reply sender, travels through the
//! runtime event channel and is answered by the control loop, one at a time.

use std::path::PathBuf;

use nix::sys::signal::Signal;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::core::{PsSnapshot, Scheduler, StatusSnapshot};
use crate::engine::run::Run;
use crate::engine::{CoreCommand, CoreStep, LifecycleEvent, RuntimeEvent};
use crate::errors::{Result, WardenError};
use crate::persist::{LoadReport, Persistence};
use crate::task::{CollectionDef, CollectionView, SyncReport, Task, TaskDef};
use crate::types::TaskId;

pub type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum ControlRequest {
    GetConfig { reply: Reply<Config> },
    SetConfig { key: String, value: String, reply: Reply<Config> },
    Status { reply: Reply<StatusSnapshot> },
    Ps { reply: Reply<PsSnapshot> },

    CreateTask { def: TaskDef, reply: Reply<Task> },
    UpdateTask { id: TaskId, def: TaskDef, reply: Reply<Task> },
    DeleteTask { id: TaskId, reply: Reply<Task> },
    EnableTask { id: TaskId, reply: Reply<Task> },
    DisableTask { id: TaskId, reply: Reply<Task> },
    GetTask { id: TaskId, reply: Reply<Task> },
    GetTasks { filter: Option<String>, reply: Reply<Vec<CollectionView>> },

    CreateCollection { def: CollectionDef, reply: Reply<SyncReport> },
    UpdateCollection { def: CollectionDef, reply: Reply<SyncReport> },
    GetCollection { name: String, reply: Reply<CollectionView> },
    DeleteCollection { name: String, reply: Reply<Vec<TaskId>> },
    GetCollectionDefaults { name: String, reply: Reply<Map<String, Value>> },
    SetCollectionDefaults { name: String, defaults: Map<String, Value>, reply: Reply<bool> },
    EnableCollection { name: String, reply: Reply<Vec<TaskId>> },
    DisableCollection { name: String, reply: Reply<Vec<TaskId>> },

    RunTask { target: String, reply: Reply<Run> },
    GetQueue { reply: Reply<Vec<String>> },
    ClearQueue { filter: Option<String>, reply: Reply<usize> },

    LoadTasks { reply: Reply<LoadReport> },
    SaveTasks { reply: Reply<Vec<PathBuf>> },
    Shutdown { reply: Reply<()> },
}

fn respond<T>(reply: Reply<T>, result: Result<T>) -> bool {
    let ok = result.is_ok();
    if reply.send(result).is_err() {
        debug!("control reply receiver dropped");
    }
    ok
}

fn require(persistence: Option<&Persistence>) -> Result<&Persistence> {
    persistence.ok_or_else(|| {
        WardenError::Configuration("no tasks_path configured; nothing to load or save".to_string())
    })
}

/// Answer one control request against the scheduler.
///
/// Successful mutations are followed by a save of every collection when
/// `auto_save` is on and a tasks directory is configured.
pub(crate) fn apply(
    core: &mut Scheduler,
    persistence: Option<&Persistence>,
    request: ControlRequest,
) -> CoreStep {
    let mut commands = Vec::new();

    let mutated = match request {
        ControlRequest::GetConfig { reply } => {
            respond(reply, Ok(core.config().clone()));
            false
        }
        ControlRequest::SetConfig { key, value, reply } => {
            respond(reply, core.set_config(&key, &value));
            false
        }
        ControlRequest::Status { reply } => {
            respond(reply, Ok(core.status()));
            false
        }
        ControlRequest::Ps { reply } => {
            respond(reply, Ok(core.ps()));
            false
        }

        ControlRequest::CreateTask { def, reply } => respond(reply, core.create_task(def)),
        ControlRequest::UpdateTask { id, def, reply } => {
            respond(reply, core.update_task(&id, def))
        }
        ControlRequest::DeleteTask { id, reply } => respond(reply, core.delete_task(&id)),
        ControlRequest::EnableTask { id, reply } => respond(reply, core.enable_task(&id)),
        ControlRequest::DisableTask { id, reply } => respond(reply, core.disable_task(&id)),
        ControlRequest::GetTask { id, reply } => {
            respond(reply, core.get_task(&id));
            false
        }
        ControlRequest::GetTasks { filter, reply } => {
            respond(reply, core.get_tasks(filter.as_deref()));
            false
        }

        ControlRequest::CreateCollection { def, reply } => {
            respond(reply, core.create_collection_and_tasks(def))
        }
        ControlRequest::UpdateCollection { def, reply } => {
            respond(reply, core.update_collection_and_tasks(def))
        }
        ControlRequest::GetCollection { name, reply } => {
            respond(reply, core.get_collection(&name));
            false
        }
        ControlRequest::DeleteCollection { name, reply } => {
            let result = core.delete_collection(&name);
            if let (Ok(_), Some(p)) = (&result, persistence) {
                if let Err(err) = p.remove_collection_file(&name) {
                    warn!(collection = %name, error = %err, "failed to remove collection file");
                }
            }
            respond(reply, result)
        }
        ControlRequest::GetCollectionDefaults { name, reply } => {
            respond(reply, core.get_collection_defaults(&name));
            false
        }
        ControlRequest::SetCollectionDefaults {
            name,
            defaults,
            reply,
        } => respond(reply, core.set_collection_defaults(&name, defaults)),
        ControlRequest::EnableCollection { name, reply } => {
            respond(reply, core.enable_collection(&name))
        }
        ControlRequest::DisableCollection { name, reply } => {
            respond(reply, core.disable_collection(&name))
        }

        ControlRequest::RunTask { target, reply } => {
            respond(reply, Ok(core.run_task(&target)));
            false
        }
        ControlRequest::GetQueue { reply } => {
            respond(reply, Ok(core.queue_ids()));
            false
        }
        ControlRequest::ClearQueue { filter, reply } => {
            respond(reply, Ok(core.clear_queue(filter.as_deref())));
            false
        }

        ControlRequest::LoadTasks { reply } => {
            let result = require(persistence).and_then(|p| {
                let (store, triggers) = core.parts_mut();
                p.load_tasks(store, triggers)
            });
            respond(reply, result);
            false
        }
        ControlRequest::SaveTasks { reply } => {
            let result = require(persistence).and_then(|p| p.save_tasks(core.store()));
            respond(reply, result);
            false
        }
        ControlRequest::Shutdown { reply } => {
            let signal = Signal::SIGTERM;
            let pids = core.begin_shutdown(signal);
            if !pids.is_empty() {
                commands.push(CoreCommand::Signal { pids, signal });
            }
            respond(reply, Ok(()));
            false
        }
    };

    if mutated && core.config().auto_save {
        if let Some(p) = persistence {
            if let Err(err) = p.save_tasks(core.store()) {
                warn!(error = %err, "auto-save failed");
            }
        }
    }

    core.settle(commands)
}

/// Cloneable client of the control loop.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<RuntimeEvent>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl SchedulerHandle {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>, events: broadcast::Sender<LifecycleEvent>) -> Self {
        Self { tx, events }
    }

    /// Receive lifecycle events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> ControlRequest) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RuntimeEvent::Control(make(reply_tx)))
            .await
            .map_err(|_| WardenError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WardenError::ChannelClosed)?
    }

    pub async fn get_config(&self) -> Result<Config> {
        self.request(|reply| ControlRequest::GetConfig { reply }).await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<Config> {
        self.request(|reply| ControlRequest::SetConfig {
            key: key.to_string(),
            value: value.to_string(),
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.request(|reply| ControlRequest::Status { reply }).await
    }

    pub async fn ps(&self) -> Result<PsSnapshot> {
        self.request(|reply| ControlRequest::Ps { reply }).await
    }

    pub async fn create_task(&self, def: TaskDef) -> Result<Task> {
        self.request(|reply| ControlRequest::CreateTask { def, reply })
            .await
    }

    pub async fn update_task(&self, id: &str, def: TaskDef) -> Result<Task> {
        self.request(|reply| ControlRequest::UpdateTask {
            id: id.to_string(),
            def,
            reply,
        })
        .await
    }

    pub async fn delete_task(&self, id: &str) -> Result<Task> {
        self.request(|reply| ControlRequest::DeleteTask {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn enable_task(&self, id: &str) -> Result<Task> {
        self.request(|reply| ControlRequest::EnableTask {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn disable_task(&self, id: &str) -> Result<Task> {
        self.request(|reply| ControlRequest::DisableTask {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.request(|reply| ControlRequest::GetTask {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_tasks(&self, filter: Option<&str>) -> Result<Vec<CollectionView>> {
        self.request(|reply| ControlRequest::GetTasks {
            filter: filter.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn create_collection(&self, def: CollectionDef) -> Result<SyncReport> {
        self.request(|reply| ControlRequest::CreateCollection { def, reply })
            .await
    }

    pub async fn update_collection(&self, def: CollectionDef) -> Result<SyncReport> {
        self.request(|reply| ControlRequest::UpdateCollection { def, reply })
            .await
    }

    pub async fn get_collection(&self, name: &str) -> Result<CollectionView> {
        self.request(|reply| ControlRequest::GetCollection {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn delete_collection(&self, name: &str) -> Result<Vec<TaskId>> {
        self.request(|reply| ControlRequest::DeleteCollection {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_collection_defaults(&self, name: &str) -> Result<Map<String, Value>> {
        self.request(|reply| ControlRequest::GetCollectionDefaults {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn set_collection_defaults(
        &self,
        name: &str,
        defaults: Map<String, Value>,
    ) -> Result<bool> {
        self.request(|reply| ControlRequest::SetCollectionDefaults {
            name: name.to_string(),
            defaults,
            reply,
        })
        .await
    }

    pub async fn enable_collection(&self, name: &str) -> Result<Vec<TaskId>> {
        self.request(|reply| ControlRequest::EnableCollection {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn disable_collection(&self, name: &str) -> Result<Vec<TaskId>> {
        self.request(|reply| ControlRequest::DisableCollection {
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Run a task by id, or `target` as a shell command if no such task.
    pub async fn run_task(&self, target: &str) -> Result<Run> {
        self.request(|reply| ControlRequest::RunTask {
            target: target.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_queue(&self) -> Result<Vec<String>> {
        self.request(|reply| ControlRequest::GetQueue { reply }).await
    }

    pub async fn clear_queue(&self, filter: Option<&str>) -> Result<usize> {
        self.request(|reply| ControlRequest::ClearQueue {
            filter: filter.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn load_tasks(&self) -> Result<LoadReport> {
        self.request(|reply| ControlRequest::LoadTasks { reply }).await
    }

    pub async fn save_tasks(&self) -> Result<Vec<PathBuf>> {
        self.request(|reply| ControlRequest::SaveTasks { reply }).await
    }

    /// Ask the control loop to stop; live workers receive SIGTERM.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ControlRequest::Shutdown { reply }).await
    }
}
