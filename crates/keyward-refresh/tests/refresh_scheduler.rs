//! Integration tests for the refresh scheduler.
//!
//! Uses paused Tokio time so ten-minute intervals resolve instantly when
//! the runtime is otherwise idle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyward_protocol::Generation;
use keyward_refresh::{RefreshConfig, RefreshScheduler, RefreshTick, TickFlow};

// =========================================================================
// Helpers
// =========================================================================

const INTERVAL: Duration = Duration::from_secs(600);

fn scheduler() -> RefreshScheduler {
    RefreshScheduler::new(RefreshConfig::with_interval(INTERVAL))
}

/// Callback that records every tick it sees.
fn recorder(
    log: &Arc<Mutex<Vec<RefreshTick>>>,
) -> impl FnMut(RefreshTick) -> std::future::Ready<TickFlow> + Send + 'static {
    let log = Arc::clone(log);
    move |tick| {
        log.lock().unwrap().push(tick);
        std::future::ready(TickFlow::Continue)
    }
}

// =========================================================================
// Ticking
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_ticks_at_fixed_interval() {
    let s = scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));
    s.start(Generation(1), recorder(&log));

    tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(1)).await;

    let ticks = log.lock().unwrap().clone();
    assert_eq!(ticks.len(), 3);
    assert!(ticks.iter().all(|t| t.generation == Generation(1)));
    assert_eq!(ticks.last().unwrap().tick, 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_tick_before_first_interval() {
    let s = scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));
    s.start(Generation(1), recorder(&log));

    tokio::time::sleep(INTERVAL - Duration::from_secs(1)).await;

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_flow_ends_task() {
    let s = scheduler();
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);
    let handle = s.start(Generation(1), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(TickFlow::Stop)
    });

    tokio::time::sleep(INTERVAL * 4).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!handle.is_active());
    assert_eq!(s.active_generation(), None);
}

// =========================================================================
// Cancellation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_prevents_further_ticks() {
    let s = scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handle = s.start(Generation(1), recorder(&log));

    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    handle.cancel();
    tokio::time::sleep(INTERVAL * 5).await;

    assert_eq!(log.lock().unwrap().len(), 1);
    assert!(!handle.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent() {
    let s = scheduler();
    let handle = s.start(Generation(1), |_| std::future::ready(TickFlow::Continue));

    handle.cancel();
    handle.cancel();
    s.cancel();
    s.cancel();

    assert_eq!(s.active_generation(), None);
}

#[tokio::test(start_paused = true)]
async fn test_restart_cancels_previous_generation() {
    let s = scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = s.start(Generation(1), recorder(&log));
    let second = s.start(Generation(2), recorder(&log));

    tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(1)).await;

    let ticks = log.lock().unwrap().clone();
    assert!(!first.is_active());
    assert!(second.is_active());
    assert_eq!(s.active_generation(), Some(Generation(2)));
    // Exactly one timer per tick, all for the new session.
    assert_eq!(ticks.len(), 2);
    assert!(ticks.iter().all(|t| t.generation == Generation(2)));
}

#[tokio::test(start_paused = true)]
async fn test_drop_scheduler_cancels_task() {
    let s = scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handle = s.start(Generation(1), recorder(&log));

    drop(s);
    tokio::time::sleep(INTERVAL * 2).await;

    assert!(log.lock().unwrap().is_empty());
    assert!(!handle.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_generation_leaves_newer_task_running() {
    let s = scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));
    s.start(Generation(1), recorder(&log));
    let second = s.start(Generation(2), recorder(&log));

    assert!(!s.cancel_generation(Generation(1)));
    assert!(second.is_active());

    assert!(s.cancel_generation(Generation(2)));
    assert!(!second.is_active());
}
