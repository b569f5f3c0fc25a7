mod common;

use calcgraph_core::{
    BasicChangeManager, ChangeEvent, ChangeManager, ChangeType, InMemoryMaster, ObjectId,
    ResultValue, VersionCorrection,
};
use calcgraph_engine::*;
use calcgraph_graph::{CalculationFunction, FormulaFunction, Operation};
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

fn convention() -> ObjectId {
    ObjectId::of("Convention", "USD")
}

/// `V = X + Y`, resolved against the USD convention.
fn convention_context() -> EngineContext {
    let v: Arc<dyn CalculationFunction> = Arc::new(
        FormulaFunction::new("v", "V", Operation::Sum, ["X", "Y"]).with_entities([convention()]),
    );
    context(vec![v], &["X", "Y"])
}

#[tokio::test]
async fn entity_changes_invalidate_dependent_nodes_only() {
    let process = ViewProcess::start(view(&["V"]), manual(), &convention_context()).unwrap();
    let mut cycles = process.subscribe_cycles();
    process.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    run_cycle(&process, &mut cycles).await;

    process
        .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, convention()))
        .unwrap();
    let summary = run_cycle(&process, &mut cycles).await;
    let configuration = summary.configuration(CONFIGURATION).unwrap();
    assert_eq!(configuration.executed.len(), 1);
    assert!(configuration.was_executed("V"));

    process
        .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, ticker("X")))
        .unwrap();
    let summary = run_cycle(&process, &mut cycles).await;
    let configuration = summary.configuration(CONFIGURATION).unwrap();
    assert!(configuration.was_executed("X"));
    assert!(configuration.was_executed("V"));
    assert!(!configuration.was_executed("Y"));

    process.stop().await.unwrap();
}

#[tokio::test]
async fn entity_changes_trigger_cycles_when_enabled() {
    let process = ViewProcess::start(
        view(&["V"]),
        ExecutionOptions::infinite(),
        &convention_context(),
    )
    .unwrap();
    let mut cycles = process.subscribe_cycles();
    process.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    next_cycle(&mut cycles).await;

    let manager = BasicChangeManager::new();
    manager.add_change_listener(process.change_listener());
    manager
        .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, convention()))
        .unwrap();

    let summary = next_cycle(&mut cycles).await;
    assert_eq!(summary.cycle, 2);
    assert!(summary.configuration(CONFIGURATION).unwrap().was_executed("V"));

    manager.remove_change_listener(&process.change_listener());
    assert_eq!(manager.listener_count(), 0);
    process.stop().await.unwrap();
}

#[tokio::test]
async fn master_updates_reach_the_view_process() {
    let manager = Arc::new(BasicChangeManager::new());
    let master: InMemoryMaster<f64> = InMemoryMaster::new(manager.clone());
    master.add(convention(), 0.05, Utc::now()).unwrap();

    let process = ViewProcess::start(view(&["V"]), manual(), &convention_context()).unwrap();
    manager.add_change_listener(process.change_listener());
    let mut cycles = process.subscribe_cycles();
    process.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    run_cycle(&process, &mut cycles).await;

    master.update(&convention(), 0.06, Utc::now()).unwrap();
    let summary = run_cycle(&process, &mut cycles).await;
    assert!(summary.configuration(CONFIGURATION).unwrap().was_executed("V"));

    process.stop().await.unwrap();
}

#[tokio::test]
async fn changes_outside_the_resolver_version_are_ignored() {
    let resolver_time = Utc::now() - ChronoDuration::hours(2);
    let options = manual()
        .with_resolver_version_correction(VersionCorrection::of_version_as_of(resolver_time));
    let process = ViewProcess::start(view(&["V"]), options, &convention_context()).unwrap();
    let mut cycles = process.subscribe_cycles();
    process.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    run_cycle(&process, &mut cycles).await;

    // Versions from one hour ago onwards are invisible at two hours ago.
    let recent = ChangeEvent::new(
        ChangeType::Updated,
        convention(),
        Some(Utc::now() - ChronoDuration::hours(1)),
        None,
        Utc::now(),
    );
    process.entity_changed(recent).unwrap();
    let summary = run_cycle(&process, &mut cycles).await;
    assert!(summary.configuration(CONFIGURATION).unwrap().executed.is_empty());

    let historic = ChangeEvent::new(
        ChangeType::Updated,
        convention(),
        Some(Utc::now() - ChronoDuration::hours(3)),
        None,
        Utc::now(),
    );
    process.entity_changed(historic).unwrap();
    let summary = run_cycle(&process, &mut cycles).await;
    assert!(summary.configuration(CONFIGURATION).unwrap().was_executed("V"));

    process.stop().await.unwrap();
}

#[tokio::test]
async fn inverted_windows_are_rejected() {
    let now = Utc::now();
    let inverted = ChangeEvent::new(
        ChangeType::Updated,
        convention(),
        Some(now),
        Some(now - ChronoDuration::minutes(5)),
        now,
    );

    let manager = BasicChangeManager::new();
    assert!(manager.entity_changed(inverted.clone()).is_err());

    let process = ViewProcess::start(view(&["V"]), manual(), &convention_context()).unwrap();
    let mut cycles = process.subscribe_cycles();
    process.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    run_cycle(&process, &mut cycles).await;

    process.entity_changed(inverted).unwrap();
    let summary = run_cycle(&process, &mut cycles).await;
    assert!(summary.configuration(CONFIGURATION).unwrap().executed.is_empty());

    process.stop().await.unwrap();
}

#[tokio::test]
async fn changes_during_execution_wait_for_the_next_cycle() {
    let gate = Arc::new(Semaphore::new(0));
    let gated = Gated::new("G", gate.clone(), vec![convention()]);
    let process = ViewProcess::start(
        view(&["G"]),
        ExecutionOptions::infinite(),
        &context(vec![gated], &[]),
    )
    .unwrap();
    let mut cycles = process.subscribe_cycles();
    let mut state = process.watch_state();

    process.trigger_cycle().unwrap();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == CycleState::Executing),
    )
    .await
    .unwrap()
    .unwrap();

    process
        .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, convention()))
        .unwrap();
    tokio::task::yield_now().await;
    assert_eq!(process.state(), CycleState::Executing);

    gate.add_permits(10);
    let first = next_cycle(&mut cycles).await;
    assert_eq!(first.cycle, 1);
    assert_eq!(first.configuration(CONFIGURATION).unwrap().executed.len(), 1);

    let second = next_cycle(&mut cycles).await;
    assert_eq!(second.cycle, 2);
    assert!(second.configuration(CONFIGURATION).unwrap().was_executed("G"));

    process.stop().await.unwrap();
}

#[tokio::test]
async fn full_recompute_after_successive_delta_cycles() {
    let options = manual().with_max_successive_delta_cycles(1);
    let process = ViewProcess::start(view(&["V"]), options, &convention_context()).unwrap();
    let mut cycles = process.subscribe_cycles();
    process.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();

    let first = run_cycle(&process, &mut cycles).await;
    assert!(first.full_recompute);

    let delta = run_cycle(&process, &mut cycles).await;
    assert!(!delta.full_recompute);
    assert_eq!(delta.executed_count(), 0);

    let full = run_cycle(&process, &mut cycles).await;
    assert!(full.full_recompute);
    assert_eq!(full.executed_count(), 3);
    assert_eq!(value(&process, "V"), Some(3.0));

    process.stop().await.unwrap();
}

/// `V = X + Y` against the USD convention, plus a gated `G` on the same convention.
fn gated_convention_context(gate: Arc<Semaphore>) -> EngineContext {
    let v: Arc<dyn CalculationFunction> = Arc::new(
        FormulaFunction::new("v", "V", Operation::Sum, ["X", "Y"]).with_entities([convention()]),
    );
    let gated = Gated::new("G", gate, vec![convention()]);
    context(vec![v, gated], &["X", "Y"])
}

fn final_values(process: &ViewProcess) -> Vec<(String, ResultValue)> {
    let mut values: Vec<(String, ResultValue)> = process
        .results()
        .all_values(CONFIGURATION)
        .unwrap_or_default()
        .into_iter()
        .map(|r| (r.specification.value_name, r.value))
        .collect();
    values.sort_by(|a, b| a.0.cmp(&b.0));
    values
}

fn send_update(process: &ViewProcess) {
    process.tick(vec![tick("X", 4.0)]).unwrap();
    process
        .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, convention()))
        .unwrap();
    process.trigger_cycle().unwrap();
}

#[tokio::test]
async fn changes_during_execution_converge_like_idle_changes() {
    let gate = Arc::new(Semaphore::new(0));
    let busy = ViewProcess::start(
        view(&["V", "G"]),
        manual(),
        &gated_convention_context(gate.clone()),
    )
    .unwrap();
    let mut cycles = busy.subscribe_cycles();
    let mut state = busy.watch_state();
    busy.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    busy.trigger_cycle().unwrap();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == CycleState::Executing),
    )
    .await
    .unwrap()
    .unwrap();
    send_update(&busy);
    gate.add_permits(10);
    next_cycle(&mut cycles).await;
    next_cycle(&mut cycles).await;

    let idle = ViewProcess::start(
        view(&["V", "G"]),
        manual(),
        &gated_convention_context(Arc::new(Semaphore::new(10))),
    )
    .unwrap();
    let mut cycles = idle.subscribe_cycles();
    idle.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    run_cycle(&idle, &mut cycles).await;
    send_update(&idle);
    next_cycle(&mut cycles).await;

    assert_eq!(value(&busy, "V"), Some(6.0));
    assert_eq!(final_values(&busy), final_values(&idle));

    busy.stop().await.unwrap();
    idle.stop().await.unwrap();
}

#[tokio::test]
async fn source_change_and_tick_recompute_only_that_branch() {
    let process = ViewProcess::start(
        view(&["V"]),
        manual(),
        &context(vec![formula("v", "V", Operation::Sum, &["X", "Y"])], &["X", "Y"]),
    )
    .unwrap();
    let manager = BasicChangeManager::new();
    manager.add_change_listener(process.change_listener());
    let mut cycles = process.subscribe_cycles();

    process.tick(vec![tick("X", 1.0), tick("Y", 2.0)]).unwrap();
    run_cycle(&process, &mut cycles).await;
    assert_eq!(value(&process, "V"), Some(3.0));

    manager
        .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, ticker("Y")))
        .unwrap();
    process.tick(vec![tick("Y", 5.0)]).unwrap();
    let summary = run_cycle(&process, &mut cycles).await;

    let configuration = summary.configuration(CONFIGURATION).unwrap();
    assert!(configuration.was_executed("Y"));
    assert!(configuration.was_executed("V"));
    assert!(!configuration.was_executed("X"));
    assert_eq!(value(&process, "V"), Some(6.0));
    assert_eq!(value(&process, "X"), Some(1.0));

    process.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_processes_leave_the_change_manager() {
    let manager = BasicChangeManager::new();
    let stopped = ViewProcess::start(view(&["V"]), manual(), &convention_context()).unwrap();
    let live = ViewProcess::start(view(&["V"]), manual(), &convention_context()).unwrap();
    manager.add_change_listener(stopped.change_listener());
    manager.add_change_listener(live.change_listener());
    assert_eq!(manager.listener_count(), 2);

    stopped.stop().await.unwrap();
    manager
        .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, convention()))
        .unwrap();
    assert_eq!(manager.listener_count(), 1);

    live.stop().await.unwrap();
}
