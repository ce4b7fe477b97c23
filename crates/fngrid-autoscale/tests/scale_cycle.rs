//! Integration tests for a full scale cycle.
//!
//! Metrics flow through a live metrics channel into a running
//! `AutoScaler`, and a `ScaleLoop` applies the proposals:
//! - zero → one → rate-matched scale up
//! - held scale-down while the delay window is open
//! - the queue guard keeping one replica until the backlog drains

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fngrid_autoscale::{
    AutoScaler, FunctionId, ScaleCallback, ScaleDecision, ScaleLoop, ScalingConfig,
};
use fngrid_transport::{QueueGauge, metrics_channel};
use tokio::sync::watch;

const CONFIG: &str = r#"
[scaler]
interval = "100ms"
scale_down_delay = "1s"

[topics.numbers]
partitions = 8

[topics.letters]
partitions = 2
"#;

/// Let the accumulation task drain whatever has been sent.
async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

fn decision(decisions: &[(FunctionId, ScaleDecision)], function: &FunctionId) -> ScaleDecision {
    decisions
        .iter()
        .find(|(f, _)| f == function)
        .map(|(_, d)| d.clone())
        .unwrap_or_else(|| panic!("no decision for {function}"))
}

// ── Scale up, hold, guard, release ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scale_up_then_down_through_live_streams() {
    let config = ScalingConfig::from_toml_str(CONFIG).unwrap();
    let (sender, streams) = metrics_channel();
    let queue = QueueGauge::default();

    let scaler = Arc::new(AutoScaler::new(streams, queue.clone()));
    config.apply(&scaler);
    let square = FunctionId::new("square");
    scaler.start_monitoring("numbers", &square).unwrap();
    scaler.run().unwrap();

    let mut scale_loop = ScaleLoop::new(scaler.clone());

    // Work arrives with nothing consuming it.
    sender.produced("numbers", 50).unwrap();
    queue.add(50);
    settle().await;
    let decisions = scale_loop.reconcile().await;
    assert_eq!(decision(&decisions, &square), ScaleDecision::ScaleTo(1));

    // One replica reads 10 of 50: five are needed.
    sender.produced("numbers", 50).unwrap();
    sender.consumed("numbers", "square", 10).unwrap();
    queue.add(40);
    settle().await;
    let decisions = scale_loop.reconcile().await;
    assert_eq!(decision(&decisions, &square), ScaleDecision::ScaleTo(5));

    // Production stops: the drop to zero is held back.
    sender.consumed("numbers", "square", 50).unwrap();
    queue.sub(50);
    settle().await;
    let decisions = scale_loop.reconcile().await;
    assert_eq!(decision(&decisions, &square), ScaleDecision::NoChange);
    assert_eq!(scale_loop.applied(&square), Some(5));

    // Window over, but 40 messages are still queued.
    tokio::time::advance(Duration::from_secs(1)).await;
    let decisions = scale_loop.reconcile().await;
    assert_eq!(decision(&decisions, &square), ScaleDecision::ScaleTo(1));

    queue.set(0);
    let decisions = scale_loop.reconcile().await;
    assert_eq!(decision(&decisions, &square), ScaleDecision::ScaleTo(0));
    assert_eq!(scaler.replicas(&square), Some(0));

    scaler.close().await.unwrap();
}

// ── Functions consuming several topics ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn multi_topic_function_takes_largest_capped_estimate() {
    let config = ScalingConfig::from_toml_str(CONFIG).unwrap();
    let (sender, streams) = metrics_channel();

    let scaler = Arc::new(AutoScaler::new(streams, QueueGauge::default()));
    config.apply(&scaler);
    let join = FunctionId::new("join");
    scaler.start_monitoring("numbers", &join).unwrap();
    scaler.start_monitoring("letters", &join).unwrap();
    scaler.inform_function_replicas(&join, 2);
    scaler.run().unwrap();

    // numbers: 2 * 30 / 10 = 6, under 8 partitions.
    // letters: 2 * 90 / 10 = 18, capped at 2 partitions.
    sender.produced("numbers", 30).unwrap();
    sender.consumed("numbers", "join", 10).unwrap();
    sender.produced("letters", 90).unwrap();
    sender.consumed("letters", "join", 10).unwrap();
    settle().await;

    assert_eq!(scaler.propose()[&join], 6);

    // Dropping one topic keeps the function's proposal alive.
    scaler.stop_monitoring("numbers", &join).unwrap();
    assert!(scaler.propose().contains_key(&join));
    scaler.stop_monitoring("letters", &join).unwrap();
    assert!(scaler.propose().is_empty());

    scaler.close().await.unwrap();
}

// ── Driven by the scale loop's own timer ────────────────────────────

#[tokio::test(start_paused = true)]
async fn scale_loop_run_patches_until_shutdown() {
    let config = ScalingConfig::from_toml_str(CONFIG).unwrap();
    let (sender, streams) = metrics_channel();

    let scaler = Arc::new(AutoScaler::new(streams, QueueGauge::default()));
    config.apply(&scaler);
    let square = FunctionId::new("square");
    scaler.start_monitoring("numbers", &square).unwrap();

    let patches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = patches.clone();
    let scale_fn: ScaleCallback = Box::new(move |_, replicas| {
        recorded.lock().unwrap().push(replicas);
        Box::pin(async { Ok::<_, anyhow::Error>(()) })
    });
    let scale_loop = ScaleLoop::new(scaler.clone()).with_scale_fn(scale_fn);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = config.interval();
    let handle = tokio::spawn(async move {
        let mut scale_loop = scale_loop;
        scale_loop.run(interval, shutdown_rx).await
    });

    sender.produced("numbers", 7).unwrap();
    tokio::time::sleep(interval * 2).await;

    // No more work: after the 1s delay the function goes back to zero.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(*patches.lock().unwrap(), vec![1, 0]);
}
