use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tt_bridge::event_bus::EventBus;
use tt_bridge::protocol::{BridgeEvent, EventKind};
use tt_bridge::tool_bridge::{BridgeError, ToolExecutionBridge};
use tt_core::config::BridgeConfig;
use tt_core::types::{TaskId, ToolCall};
use tt_harness::registry::{ExecutionContext, FnCapability, ToolError, ToolRegistry};

fn registry_with(names: &[&str]) -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    for name in names {
        registry.register(FnCapability::new(*name, |args, _ctx| async move {
            Ok(json!({ "local": true, "args": args }))
        }));
    }
    Arc::new(registry)
}

fn ctx() -> ExecutionContext {
    ExecutionContext::new(TaskId::from("task_1_abcdefghi"), "/repo")
}

fn tool_ids(events: &[BridgeEvent]) -> (Vec<String>, Vec<String>) {
    let mut calls = Vec::new();
    let mut results = Vec::new();
    for event in events {
        match &event.kind {
            EventKind::ToolCall(call) => calls.push(call.id.clone()),
            EventKind::ToolResult(result) => results.push(result.tool_id.clone()),
            _ => {}
        }
    }
    (calls, results)
}

#[tokio::test]
async fn test_local_capability_runs_without_executor() {
    let bus = EventBus::new();
    let bridge = ToolExecutionBridge::new(registry_with(&["read_file"]), bus.clone());
    let sub = bus.subscribe();

    let call = ToolCall::new("read_file", json!({"path": "src/lib.rs"}));
    let result = bridge.execute(&call, &ctx()).await.unwrap();

    assert!(!result.is_error());
    assert_eq!(result.value().unwrap()["local"], true);
    assert_eq!(result.tool_id, call.id);

    let events = sub.drain();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type(), "tool.call");
    assert_eq!(events[1].event_type(), "tool.result");
    assert!(events.iter().all(|e| e.belongs_to(&TaskId::from("task_1_abcdefghi"))));
}

#[tokio::test]
async fn test_registered_executor_takes_precedence() {
    let bus = EventBus::new();
    let bridge = ToolExecutionBridge::new(registry_with(&["grep"]), bus);
    bridge.register_fn(|name, _args, _ctx| async move { Ok(json!({ "remote": name })) });
    assert!(bridge.has_executor());

    let result = bridge
        .execute(&ToolCall::new("grep", json!({})), &ctx())
        .await
        .unwrap();
    assert_eq!(result.value().unwrap()["remote"], "grep");
}

#[tokio::test]
async fn test_re_registration_last_writer_wins() {
    let bridge = ToolExecutionBridge::new(registry_with(&["grep"]), EventBus::new());
    assert!(!bridge.register_fn(|_, _, _| async { Ok(json!("first")) }));
    assert!(bridge.register_fn(|_, _, _| async { Ok(json!("second")) }));

    let result = bridge
        .execute(&ToolCall::new("grep", json!({})), &ctx())
        .await
        .unwrap();
    assert_eq!(result.value().unwrap(), &json!("second"));

    bridge.clear_executor();
    let result = bridge
        .execute(&ToolCall::new("grep", json!({})), &ctx())
        .await
        .unwrap();
    assert_eq!(result.value().unwrap()["local"], true);
}

#[tokio::test]
async fn test_unknown_tool_fails_before_any_event() {
    let bus = EventBus::new();
    let bridge = ToolExecutionBridge::new(registry_with(&["grep"]), bus.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    bridge.register_fn(move |_, _, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(json!(null)) }
    });
    let sub = bus.subscribe();

    let err = bridge
        .execute(&ToolCall::new("rm_rf", json!({})), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ToolNotFound(ref name) if name == "rm_rf"));
    assert!(sub.drain().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_executor_error_becomes_error_result() {
    let bus = EventBus::new();
    let bridge = ToolExecutionBridge::new(registry_with(&["write_file"]), bus.clone());
    bridge.register_fn(|_, _, _| async { Err(ToolError::Failed("disk full".into())) });
    let sub = bus.subscribe();

    let result = bridge
        .execute(&ToolCall::new("write_file", json!({})), &ctx())
        .await
        .unwrap();
    assert_eq!(result.error(), Some("disk full"));

    let (calls, results) = tool_ids(&sub.drain());
    assert_eq!(calls, results);
}

#[tokio::test]
async fn test_slow_tool_times_out_with_error_result() {
    let bus = EventBus::new();
    let bridge = ToolExecutionBridge::new(registry_with(&["build"]), bus.clone())
        .with_timeout(Duration::from_millis(50));
    bridge.register_fn(|_, _, _| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!("late"))
    });
    let sub = bus.subscribe();

    let result = bridge
        .execute(&ToolCall::new("build", json!({})), &ctx())
        .await
        .unwrap();
    assert!(result.error().unwrap().contains("timed out"));

    let (calls, results) = tool_ids(&sub.drain());
    assert_eq!(calls.len(), 1);
    assert_eq!(calls, results);
}

#[tokio::test]
async fn test_configured_timeout_is_applied() {
    let bus = EventBus::new();
    let config = BridgeConfig { tool_timeout_secs: 1 };
    let bridge = ToolExecutionBridge::from_config(registry_with(&["build"]), bus.clone(), &config);
    assert_eq!(bridge.timeout(), Duration::from_secs(1));
    bridge.register_fn(|_, _, _| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!("late"))
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        bridge.execute(&ToolCall::new("build", json!({})), &ctx()),
    )
    .await
    .expect("configured timeout should fire well before the test guard")
    .unwrap();
    assert_eq!(result.error(), Some("tool 'build' timed out after 1s"));
}

#[tokio::test]
async fn test_cancellation_interrupts_in_flight_call() {
    let bus = EventBus::new();
    let bridge = Arc::new(ToolExecutionBridge::new(registry_with(&["build"]), bus.clone()));
    bridge.register_fn(|_, _, _| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!("late"))
    });
    let sub = bus.subscribe();

    let token = CancellationToken::new();
    let ctx = ctx().with_cancellation(token.clone());
    let handle = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.execute(&ToolCall::new("build", json!({})), &ctx).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("bridge should return promptly after cancel")
        .unwrap()
        .unwrap();
    assert_eq!(result.error(), Some("tool execution cancelled"));

    let (calls, results) = tool_ids(&sub.drain());
    assert_eq!(calls, results);
}

#[tokio::test]
async fn test_every_call_is_paired_with_one_result() {
    let bus = EventBus::new();
    let bridge = Arc::new(ToolExecutionBridge::new(
        registry_with(&["a", "b", "c"]),
        bus.clone(),
    ));
    bridge.register_fn(|name, _, _| async move {
        if name == "b" {
            Err(ToolError::Failed("boom".into()))
        } else {
            Ok(json!(name))
        }
    });
    let sub = bus.subscribe();

    let mut handles = Vec::new();
    for i in 0..12 {
        let bridge = bridge.clone();
        let name = ["a", "b", "c"][i % 3];
        handles.push(tokio::spawn(async move {
            bridge.execute(&ToolCall::new(name, json!({ "i": i })), &ctx()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let events = sub.drain();
    let (mut calls, mut results) = tool_ids(&events);
    assert_eq!(calls.len(), 12);
    calls.sort();
    results.sort();
    assert_eq!(calls, results);

    // Each result comes after its call.
    for (idx, event) in events.iter().enumerate() {
        if let EventKind::ToolResult(result) = &event.kind {
            let call_pos = events
                .iter()
                .position(|e| matches!(&e.kind, EventKind::ToolCall(c) if c.id == result.tool_id))
                .unwrap();
            assert!(call_pos < idx);
        }
    }
}
