// tests/persistence.rs

mod common;
use crate::common::builders::TaskDefBuilder;
use crate::common::fixture;

use std::error::Error;
use std::sync::Arc;

use taskwarden::errors::WardenError;
use taskwarden::fs::mock::MockFileSystem;
use taskwarden::persist::Persistence;
use taskwarden::task::{TaskStore, Trigger};
use taskwarden::trigger::TriggerManager;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn loads_a_collection_file_from_disk() -> TestResult {
    let persistence = Persistence::on_disk(fixture(""));
    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();

    let report = persistence.load_collection_from_file(
        &fixture("florida.tasks.json"),
        &mut store,
        &mut triggers,
    )?;

    assert_eq!(report.collection, "florida");
    assert_eq!(report.created.len(), 4);

    let task1 = store.get_task("florida.task1")?;
    assert_eq!(task1.cwd.as_deref(), Some("/var/www/website/"));
    assert_eq!(task1.cron(), Some("*/10 * * * *"));
    assert!(triggers.has_timer("florida.task1"));

    // An explicit null drops the inherited working directory.
    assert_eq!(store.get_task("florida.task4")?.cwd, None);

    assert_eq!(
        triggers.transitive_dependents("florida.task1"),
        vec!["florida.task2", "florida.task3", "florida.task4"]
    );
    Ok(())
}

#[test]
fn malformed_file_is_a_validation_error() {
    let persistence = Persistence::on_disk(fixture(""));
    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();

    let err = persistence
        .load_collection_from_file(&fixture("error.tasks.json"), &mut store, &mut triggers)
        .unwrap_err();

    assert!(matches!(err, WardenError::Validation(_)));
    assert!(err.to_string().contains("error.tasks.json"));
    assert_eq!(store.total_tasks(), 0);
}

#[test]
fn loads_a_directory_with_cross_collection_dependencies() -> TestResult {
    let persistence = Persistence::on_disk(fixture("tasks"));
    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();

    let report = persistence.load_tasks(&mut store, &mut triggers)?;

    assert!(report.is_clean(), "failures: {:?}", report.failed);
    assert_eq!(report.loaded.len(), 2);
    assert_eq!(store.collection_names(), vec!["autosample", "palace"]);

    assert_eq!(
        triggers.dependents_of("autosample.task1"),
        vec!["autosample.task2".to_string()]
    );
    assert_eq!(
        triggers.dependents_of("autosample.task2"),
        vec!["palace.pizza".to_string()]
    );

    let pizza = store.get_task("palace.pizza")?;
    assert_eq!(pizza.env.get("TOPPING").map(String::as_str), Some("pepperoni"));
    assert_eq!(pizza.cwd, None);
    assert!(!store.get_task("palace.menu")?.enabled);
    Ok(())
}

#[test]
fn missing_directory_loads_nothing() -> TestResult {
    let persistence = Persistence::on_disk(fixture("does-not-exist"));
    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();

    let report = persistence.load_tasks(&mut store, &mut triggers)?;

    assert!(report.loaded.is_empty() && report.is_clean());
    Ok(())
}

#[test]
fn unresolvable_files_are_reported_and_the_rest_load() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file(
        "/tasks/lonely.tasks.json",
        r#"{"collection": "lonely", "tasks": {"a": {"command": "true", "trigger": {"after": "ghost.x"}}}}"#,
    );
    fs.add_file(
        "/tasks/fine.tasks.json",
        r#"{"collection": "fine", "tasks": {"a": {"command": "true"}}}"#,
    );
    fs.add_file("/tasks/notes.txt", "not a collection");
    let persistence = Persistence::new(Arc::new(fs), "/tasks");
    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();

    let report = persistence.load_tasks(&mut store, &mut triggers)?;

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].0.ends_with("lonely.tasks.json"));
    assert!(store.contains("fine.a"));
    assert!(!store.contains("lonely.a"));
    Ok(())
}

#[test]
fn save_then_load_into_a_fresh_store() -> TestResult {
    let dir = tempfile::tempdir()?;
    let persistence = Persistence::on_disk(dir.path());

    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();
    store.create_task(
        TaskDefBuilder::new("./backup.sh")
            .name("ops.backup")
            .time("30 2 * * *")
            .env("TARGET", "s3")
            .build(),
        &mut triggers,
    )?;
    store.create_task(
        TaskDefBuilder::new("./verify.sh")
            .name("ops.verify")
            .after("ops.backup")
            .build(),
        &mut triggers,
    )?;
    store.disable_task("ops.verify", &mut triggers)?;

    let written = persistence.save_tasks(&store)?;
    assert_eq!(written, vec![dir.path().join("ops.tasks.json")]);

    let mut reloaded = TaskStore::new("default");
    let mut reloaded_triggers = TriggerManager::new();
    persistence.load_tasks(&mut reloaded, &mut reloaded_triggers)?;

    let backup = reloaded.get_task("ops.backup")?;
    assert_eq!(
        backup.trigger,
        Some(Trigger::Time {
            cron: "30 2 * * *".into()
        })
    );
    assert_eq!(backup.env.get("TARGET").map(String::as_str), Some("s3"));
    // The disabled flag survives the round trip.
    assert!(!reloaded.get_task("ops.verify")?.enabled);
    assert!(reloaded_triggers.dependents_of("ops.backup").is_empty());
    Ok(())
}

#[test]
fn removing_a_collection_file() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("/tasks/gone.tasks.json", "{}");
    let persistence = Persistence::new(Arc::new(fs.clone()), "/tasks");

    assert!(persistence.remove_collection_file("gone")?);
    assert!(!persistence.remove_collection_file("gone")?);
    assert!(fs.contents("/tasks/gone.tasks.json").is_none());
    Ok(())
}

#[test]
fn collections_that_depend_on_each_other_survive_a_round_trip() -> TestResult {
    let dir = tempfile::tempdir()?;
    let persistence = Persistence::on_disk(dir.path());

    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();
    store.create_task(TaskDefBuilder::new("./w").name("a.w").build(), &mut triggers)?;
    store.create_task(TaskDefBuilder::new("./y").name("b.y").build(), &mut triggers)?;
    store.create_task(
        TaskDefBuilder::new("./x").name("a.x").after("b.y").build(),
        &mut triggers,
    )?;
    store.create_task(
        TaskDefBuilder::new("./z").name("b.z").after("a.w").build(),
        &mut triggers,
    )?;
    persistence.save_tasks(&store)?;

    let mut reloaded = TaskStore::new("default");
    let mut reloaded_triggers = TriggerManager::new();
    let report = persistence.load_tasks(&mut reloaded, &mut reloaded_triggers)?;

    assert!(report.is_clean(), "failures: {:?}", report.failed);
    assert_eq!(reloaded.total_tasks(), 4);
    assert_eq!(reloaded_triggers.dependents_of("b.y"), vec!["a.x".to_string()]);
    assert_eq!(reloaded_triggers.dependents_of("a.w"), vec!["b.z".to_string()]);
    Ok(())
}

#[test]
fn a_dangling_file_does_not_block_mutually_dependent_ones() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file(
        "/tasks/a.tasks.json",
        r#"{"collection": "a", "tasks": {"w": {"command": "true"}, "x": {"command": "true", "trigger": {"after": "b.y"}}}}"#,
    );
    fs.add_file(
        "/tasks/b.tasks.json",
        r#"{"collection": "b", "tasks": {"y": {"command": "true"}, "z": {"command": "true", "trigger": {"after": "a.w"}}}}"#,
    );
    // Depends on a task that only the rejected file would provide.
    fs.add_file(
        "/tasks/c.tasks.json",
        r#"{"collection": "c", "tasks": {"q": {"command": "true", "trigger": {"after": "d.r"}}}}"#,
    );
    fs.add_file(
        "/tasks/d.tasks.json",
        r#"{"collection": "d", "tasks": {"r": {"command": "true", "trigger": {"after": "nowhere.s"}}}}"#,
    );
    let persistence = Persistence::new(Arc::new(fs), "/tasks");
    let mut store = TaskStore::new("default");
    let mut triggers = TriggerManager::new();

    let report = persistence.load_tasks(&mut store, &mut triggers)?;

    assert_eq!(report.loaded.len(), 2);
    let failed: Vec<_> = report.failed.iter().map(|(path, _)| path.clone()).collect();
    assert_eq!(
        failed,
        vec![
            std::path::PathBuf::from("/tasks/c.tasks.json"),
            std::path::PathBuf::from("/tasks/d.tasks.json"),
        ]
    );
    assert_eq!(store.collection_names(), vec!["a", "b"]);
    Ok(())
}
