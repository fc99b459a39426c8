// crates/piperuntime/tests/executor_test.rs

mod common;

use common::*;
use pipecore::{
    predicate, AgentError, EventBus, ExecutionEvent, ExecutionState, PipelineError, Value,
};
use piperuntime::{
    AgentRegistry, DagExecutor, Driver, ExecutionHandle, ExecutionResult, ExecutorConfig,
    FailurePolicy, SequentialDriver,
};
use std::collections::HashMap;
use std::time::Duration;

async fn run(
    registry: &AgentRegistry,
    state: ExecutionState,
) -> Result<ExecutionResult, PipelineError> {
    run_with(registry, state, ExecutorConfig::default()).await
}

async fn run_with(
    registry: &AgentRegistry,
    state: ExecutionState,
    config: ExecutorConfig,
) -> Result<ExecutionResult, PipelineError> {
    let bus = EventBus::new(100);
    DagExecutor::new(config)
        .execute(registry, state, &bus, &ExecutionHandle::new())
        .await
}

/// The concurrent executor and the sequential fallback, sharing `config`
fn drivers(config: ExecutorConfig) -> Vec<Box<dyn Driver>> {
    vec![
        Box::new(DagExecutor::new(config.clone())),
        Box::new(SequentialDriver::new(config)),
    ]
}

fn duration_of(result: &ExecutionResult, id: &str) -> Duration {
    result
        .timings
        .iter()
        .find(|t| t.agent_id == id)
        .map(|t| t.duration)
        .unwrap()
}

/// Every gating dependency of an agent completes before it in the order
fn assert_topological(registry: &AgentRegistry, result: &ExecutionResult) {
    let position: HashMap<&str, usize> = result
        .execution_order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    for id in &result.execution_order {
        let spec = registry.get(id).unwrap();
        for dep in &spec.dependencies {
            if dep.is_conditional() {
                continue;
            }
            assert!(
                position[dep.target.as_str()] < position[id.as_str()],
                "{} ran before its dependency {}",
                id,
                dep.target
            );
        }
    }
}

#[tokio::test]
async fn test_independent_agents_share_a_frontier() {
    init_tracing();
    let registry = AgentRegistry::new()
        .with(stub("a", 60, "a_out", 1.0))
        .unwrap()
        .with(stub("b", 40, "b_out", 2.0))
        .unwrap()
        .with(stub("c", 20, "c_out", 3.0).depends_on("a").depends_on("b"))
        .unwrap();

    let result = run(&registry, ExecutionState::new()).await.unwrap();

    assert_eq!(result.frontiers, vec![vec!["a", "b"], vec!["c"]]);
    assert_eq!(result.execution_order, vec!["a", "b", "c"]);

    let (ta, tb, tc) = (
        duration_of(&result, "a"),
        duration_of(&result, "b"),
        duration_of(&result, "c"),
    );
    let expected = (ta + tb + tc).as_secs_f64() / (ta.max(tb) + tc).as_secs_f64();
    assert!((result.parallelization_ratio() - expected).abs() < 1e-9);
    assert!(result.parallelization_ratio() > 1.2);

    // Both first-round agents ran against the same snapshot, so the
    // wall clock is well under the sum of their sleeps.
    assert!(result.total_elapsed < Duration::from_millis(60 + 40 + 20));
    assert_eq!(result.final_state.get("c_out"), Some(&Value::Number(3.0)));
}

#[tokio::test]
async fn test_chain_is_fully_sequential() {
    let registry = AgentRegistry::new()
        .with(stub("one", 5, "one", 1.0))
        .unwrap()
        .with(stub("two", 5, "two", 2.0).depends_on("one"))
        .unwrap()
        .with(stub("three", 5, "three", 3.0).depends_on("two"))
        .unwrap();

    let result = run(&registry, ExecutionState::new()).await.unwrap();

    assert!(result.frontiers.iter().all(|f| f.len() == 1));
    assert_eq!(result.parallelization_ratio(), 1.0);
}

#[tokio::test]
async fn test_order_is_topological_and_frontiers_independent() {
    let regulated = predicate(|s| s.get("kind").and_then(Value::as_str) == Some("regulated"));
    let registry = AgentRegistry::new()
        .with(stub("report", 1, "report", "done").depends_on("merge"))
        .unwrap()
        .with(
            stub("merge", 3, "merge", true)
                .depends_on("left")
                .depends_on("right")
                .depends_on_if("audit", regulated.clone()),
        )
        .unwrap()
        .with(stub("audit", 2, "audit", "ok").depends_on("left").applicable_when(regulated))
        .unwrap()
        .with(stub("left", 4, "left", 1.0).depends_on("root"))
        .unwrap()
        .with(stub("right", 2, "right", 2.0).depends_on("root").with_priority(-1))
        .unwrap()
        .with(stub("root", 1, "root", 0.0))
        .unwrap();

    for kind in ["plain", "regulated"] {
        let state = ExecutionState::new().with_field("kind", kind);
        let result = run(&registry, state).await.unwrap();

        assert_topological(&registry, &result);
        for frontier in &result.frontiers {
            for a in frontier {
                for b in frontier {
                    let spec = registry.get(a).unwrap();
                    assert!(
                        !spec.dependencies.iter().any(|d| &d.target == b && !d.is_conditional()),
                        "{} and {} share a frontier",
                        a,
                        b
                    );
                }
            }
        }

        // Merge order inside a frontier follows priority.
        assert_eq!(result.frontiers[1], vec!["right", "left"]);
        if kind == "regulated" {
            assert_eq!(result.execution_order.len(), 6);
            let audit = result.execution_order.iter().position(|id| id == "audit");
            let merge = result.execution_order.iter().position(|id| id == "merge");
            assert!(audit < merge);
        } else {
            assert_eq!(result.skipped, vec!["audit"]);
            assert_eq!(result.execution_order.len(), 5);
        }
    }
}

#[tokio::test]
async fn test_waived_dependency_is_ready_immediately() {
    // Registered before its (waived) dependency, and the dependency itself
    // cannot start until round two.
    let registry = AgentRegistry::new()
        .with(stub("eager", 1, "eager", true).depends_on_if("late", predicate(|_| false)))
        .unwrap()
        .with(stub("late", 1, "late", true).depends_on("seed"))
        .unwrap()
        .with(stub("seed", 1, "seed", true))
        .unwrap();

    let result = run(&registry, ExecutionState::new()).await.unwrap();

    assert_eq!(result.frontiers[0], vec!["eager", "seed"]);
    assert_eq!(result.frontiers[1], vec!["late"]);
}

#[tokio::test]
async fn test_refinement_runs_at_most_max_times() {
    init_tracing();
    let never_good = predicate(|_| false);
    let registry = AgentRegistry::new()
        .with(drafter())
        .unwrap()
        .with(refiner(never_good.clone()))
        .unwrap()
        .with(
            stub("publish", 1, "published", true)
                .depends_on("draft")
                .depends_on_if("refine", refinement_pending(never_good)),
        )
        .unwrap();

    let result = run(&registry, refinement_state(2)).await.unwrap();

    assert_eq!(result.executions_of("refine"), 2);
    assert_eq!(result.executions_of("draft"), 3);
    assert_eq!(result.refinements, 2);
    assert_eq!(
        result.execution_order,
        vec!["draft", "refine", "draft", "refine", "draft", "publish"]
    );
    assert_eq!(result.final_state.refinement_count(), 2);
    assert_eq!(result.final_state.get("draft").and_then(Value::as_str), Some("v2"));
    assert_eq!(
        result.final_state.get("critique").and_then(Value::as_str),
        Some("improve v1")
    );
    assert!(result.skipped.is_empty());
}

#[tokio::test]
async fn test_refinement_stops_once_quality_passes() {
    let good_after_one = predicate(|s| s.get("draft").and_then(Value::as_str) == Some("v1"));
    let registry = AgentRegistry::new()
        .with(drafter())
        .unwrap()
        .with(refiner(good_after_one.clone()))
        .unwrap()
        .with(
            stub("publish", 1, "published", true)
                .depends_on("draft")
                .depends_on_if("refine", refinement_pending(good_after_one)),
        )
        .unwrap();

    let result = run(&registry, refinement_state(2)).await.unwrap();
    assert_eq!(result.executions_of("refine"), 1);
    assert_eq!(result.final_state.refinement_count(), 1);

    let always_good = predicate(|_| true);
    let registry = AgentRegistry::new()
        .with(drafter())
        .unwrap()
        .with(refiner(always_good.clone()))
        .unwrap()
        .with(
            stub("publish", 1, "published", true)
                .depends_on("draft")
                .depends_on_if("refine", refinement_pending(always_good)),
        )
        .unwrap();

    let result = run(&registry, refinement_state(2)).await.unwrap();
    assert_eq!(result.executions_of("refine"), 0);
    assert_eq!(result.frontiers, vec![vec!["draft"], vec!["publish"]]);
    assert_eq!(result.skipped, vec!["refine"]);
}

#[tokio::test]
async fn test_unsatisfiable_dependencies_are_named() {
    let registry = AgentRegistry::new()
        .with(stub("never", 1, "never", true).applicable_when(predicate(|_| false)))
        .unwrap()
        .with(stub("needs_never", 1, "x", true).depends_on("never"))
        .unwrap()
        .with(stub("downstream", 1, "y", true).depends_on("needs_never"))
        .unwrap()
        .with(stub("fine", 1, "z", true))
        .unwrap();

    let err = run(&registry, ExecutionState::new()).await.unwrap_err();
    match err {
        PipelineError::UnsatisfiableDependencies(stuck) => {
            assert_eq!(stuck, vec!["downstream", "needs_never"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_agent_error_aborts_run() {
    let registry = AgentRegistry::new()
        .with(stub("ok", 1, "ok", true))
        .unwrap()
        .with(failing("broken", "broken", AgentError::Service("upstream 503".to_string())))
        .unwrap()
        .with(stub("after", 1, "after", true).depends_on("broken"))
        .unwrap();

    let err = run(&registry, ExecutionState::new()).await.unwrap_err();
    match err {
        PipelineError::Agent { agent, source } => {
            assert_eq!(agent, "broken");
            assert_eq!(source, AgentError::Service("upstream 503".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_writing_unowned_field_is_a_failure() {
    let mut trespasser = stub("trespasser", 1, "theirs", 1.0);
    trespasser.owns = vec!["mine".to_string()];
    let registry = AgentRegistry::new().with(trespasser).unwrap();

    let err = run(&registry, ExecutionState::new()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Agent { source: AgentError::OwnershipViolation { ref field }, .. } if field == "theirs"
    ));
}

#[tokio::test]
async fn test_timeout_aborts_by_default() {
    let registry = AgentRegistry::new()
        .with(stub("slow", 500, "slow", true).with_timeout(Duration::from_millis(20)))
        .unwrap();

    for driver in drivers(ExecutorConfig::default()) {
        let err = driver
            .run(&registry, ExecutionState::new(), &EventBus::new(100), &ExecutionHandle::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, PipelineError::Agent { source: AgentError::Timeout { millis: 20 }, .. }),
            "{} driver: {err}",
            driver.name()
        );
    }
}

#[tokio::test]
async fn test_degrade_policy_blocks_only_dependents() {
    let registry = AgentRegistry::new()
        .with(stub("slow", 500, "slow", true))
        .unwrap()
        .with(stub("fast", 1, "fast", true))
        .unwrap()
        .with(stub("needs_slow", 1, "a", true).depends_on("slow"))
        .unwrap()
        .with(stub("transitively", 1, "b", true).depends_on("needs_slow"))
        .unwrap()
        .with(stub("needs_fast", 1, "c", true).depends_on("fast"))
        .unwrap();

    let config = ExecutorConfig {
        agent_timeout: Some(Duration::from_millis(30)),
        on_failure: FailurePolicy::Degrade,
        ..ExecutorConfig::default()
    };
    for driver in drivers(config) {
        let result = driver
            .run(&registry, ExecutionState::new(), &EventBus::new(100), &ExecutionHandle::new())
            .await
            .unwrap();

        assert_eq!(result.degraded, vec!["slow"], "{} driver", driver.name());
        assert_eq!(result.blocked, vec!["needs_slow", "transitively"]);
        assert_eq!(result.execution_order, vec!["fast", "needs_fast"]);
        assert!(result.skipped.is_empty());
        assert!(!result.final_state.contains("slow"));
    }
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let registry = AgentRegistry::new()
        .with(stub("long", 5_000, "long", true))
        .unwrap()
        .with(stub("next", 1, "next", true).depends_on("long"))
        .unwrap();

    for driver in drivers(ExecutorConfig::default()) {
        let bus = EventBus::new(100);
        let handle = ExecutionHandle::new();
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = driver
            .run(&registry, ExecutionState::new(), &bus, &handle)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled), "{} driver: {err}", driver.name());
    }
}

#[tokio::test]
async fn test_round_limit_stops_runaway_runs() {
    let registry = AgentRegistry::new()
        .with(stub("first", 1, "first", true))
        .unwrap()
        .with(stub("second", 1, "second", true).depends_on("first"))
        .unwrap()
        .with(stub("third", 1, "third", true).depends_on("second"))
        .unwrap();

    let config = ExecutorConfig {
        max_rounds: 2,
        ..ExecutorConfig::default()
    };
    for driver in drivers(config) {
        let bus = EventBus::new(100);
        let mut events = bus.subscribe();
        let err = driver
            .run(&registry, ExecutionState::new(), &bus, &ExecutionHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RoundLimit(2)), "{} driver: {err}", driver.name());

        let mut completed = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                ExecutionEvent::AgentCompleted { agent_id, .. } => completed.push(agent_id),
                ExecutionEvent::RunCompleted { success, .. } => assert!(!success),
                _ => {}
            }
        }
        assert_eq!(completed, vec!["first", "second"]);
    }

    let roomy = ExecutorConfig {
        max_rounds: 3,
        ..ExecutorConfig::default()
    };
    for driver in drivers(roomy) {
        let result = driver
            .run(&registry, ExecutionState::new(), &EventBus::new(100), &ExecutionHandle::new())
            .await
            .unwrap();
        assert_eq!(result.frontiers.len(), 3);
    }
}

#[tokio::test]
async fn test_events_describe_rounds() {
    let registry = AgentRegistry::new()
        .with(stub("a", 1, "a", 1.0))
        .unwrap()
        .with(stub("b", 1, "b", 1.0).depends_on("a"))
        .unwrap();

    let bus = EventBus::new(100);
    let mut events = bus.subscribe();
    DagExecutor::default()
        .execute(&registry, ExecutionState::new(), &bus, &ExecutionHandle::new())
        .await
        .unwrap();

    let mut rounds = Vec::new();
    let mut completed = 0;
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::RoundStarted { agents, .. } => rounds.push(agents),
            ExecutionEvent::AgentCompleted { .. } => completed += 1,
            ExecutionEvent::RunCompleted { success, .. } => finished = Some(success),
            _ => {}
        }
    }

    assert_eq!(rounds, vec![vec!["a"], vec!["b"]]);
    assert_eq!(completed, 2);
    assert_eq!(finished, Some(true));
}

#[tokio::test]
async fn test_invalid_registry_fails_before_any_agent_runs() {
    let registry = AgentRegistry::new()
        .with(stub("a", 1, "a", 1.0).depends_on("ghost"))
        .unwrap();

    let err = run(&registry, ExecutionState::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Registry(_)));
}
