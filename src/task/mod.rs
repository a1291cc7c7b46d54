// src/task/mod.rs

//! Tasks and collections.
//!
//! - [`model`] defines definitions, tasks, triggers and collections.
//! - [`validate`] turns definitions into tasks and checks the `after` graph.
//! - [`store`] is the registry all mutations go through.

pub mod model;
pub mod store;
pub mod validate;

pub use model::{
    Collection, CollectionConfig, CollectionDef, CollectionView, Task, TaskDef, Trigger,
};
pub use store::{BatchSync, SyncReport, TaskStore};
