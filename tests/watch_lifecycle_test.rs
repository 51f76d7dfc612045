//! Lifecycle properties: settle-delay coalescing, reference-counted
//! teardown, idempotent cancellation, and timeout precedence.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use dynquery::testing::{FakeTree, ManualTimers, TagPattern};
use dynquery::{NodeId, Pattern, QueryWatcher, TreeHost, WatchOptions};

fn setup() -> (Arc<FakeTree>, Arc<ManualTimers>, QueryWatcher) {
    let tree = FakeTree::new();
    let timers = Arc::new(ManualTimers::new());
    let watcher = QueryWatcher::new(tree.clone(), timers.clone());
    (tree, timers, watcher)
}

fn tag(tree: &Arc<FakeTree>, name: &str) -> Arc<dyn Pattern> {
    Arc::new(TagPattern::new(tree.clone(), name))
}

fn collector() -> (Arc<Mutex<Vec<NodeId>>>, impl Fn(NodeId) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    (seen, move |node| log.lock().push(node))
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[test]
fn test_satisfied_once_session_installs_no_listener() {
    let (tree, _timers, watcher) = setup();
    tree.append_new(tree.root(), "item");

    let (seen, handler) = collector();
    let handle = watcher
        .watch(vec![tag(&tree, "item")], handler, WatchOptions::new())
        .unwrap();

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(tree.subscription_count(), 0);
    // Nothing was active, so the very first cancel already reports false.
    assert!(!handle.cancel());
    assert!(!handle.cancel());
}

#[test]
fn test_settle_delay_coalesces_burst() {
    let (tree, timers, watcher) = setup();
    let root = tree.root();
    let delay = ms(100);

    let (seen, handler) = collector();
    let handle = watcher
        .watch(
            vec![tag(&tree, "item")],
            handler,
            WatchOptions::new().settle_delay(delay),
        )
        .unwrap();
    assert_eq!(tree.subscription_count(), 1);

    // Five insertions at 0, D/2, D, 3D/2, 2D: every match pushes the
    // quiescence window out again.
    tree.append_new(root, "item");
    for _ in 0..4 {
        timers.advance(ms(50));
        tree.append_new(root, "item");
    }

    // Last insertion happened at 2D; the processor must survive until its
    // full delay has elapsed at 3D.
    timers.advance(ms(99));
    assert_eq!(tree.subscription_count(), 1);

    timers.advance(ms(1));
    assert_eq!(tree.subscription_count(), 0);
    assert_eq!(tree.teardown_count(), 1);
    assert_eq!(seen.lock().len(), 5);

    // Natural completion: nothing left for cancel to do.
    assert!(!handle.cancel());
}

#[test]
fn test_first_match_mode_stops_after_one_delivery() {
    let (tree, _timers, watcher) = setup();
    let root = tree.root();

    let (seen, handler) = collector();
    let handle = watcher
        .watch(
            vec![tag(&tree, "item")],
            handler,
            WatchOptions::new().match_all(false),
        )
        .unwrap();
    assert_eq!(tree.subscription_count(), 1);

    let first = tree.append_new(root, "item");
    // No settle window in first-match mode: teardown is immediate.
    assert_eq!(tree.subscription_count(), 0);

    tree.append_new(root, "item");
    assert_eq!(seen.lock().as_slice(), &[first]);
    assert!(!handle.cancel());
}

#[test]
fn test_shared_subscription_released_by_last_party() {
    let (tree, _timers, watcher) = setup();

    let first = watcher
        .watch(vec![tag(&tree, "alpha")], |_| {}, WatchOptions::new().once(false))
        .unwrap();
    let second = watcher
        .watch(vec![tag(&tree, "beta")], |_| {}, WatchOptions::new().once(false))
        .unwrap();

    // Two independent sessions, one root: one native subscription.
    assert_eq!(tree.subscription_count(), 1);

    assert!(first.cancel());
    assert_eq!(tree.subscription_count(), 1);

    assert!(second.cancel());
    assert_eq!(tree.subscription_count(), 0);
    assert_eq!(tree.teardown_count(), 1);
}

#[test]
fn test_cancel_is_idempotent() {
    let (tree, _timers, watcher) = setup();

    let handle = watcher
        .watch(vec![tag(&tree, "missing")], |_| {}, WatchOptions::new().once(false))
        .unwrap();

    assert!(handle.is_active());
    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert!(!handle.is_active());
    assert_eq!(tree.subscription_count(), 0);
    assert_eq!(tree.teardown_count(), 1);
}

#[test]
fn test_timeout_fires_once_and_silences_later_matches() {
    let (tree, timers, watcher) = setup();
    let root = tree.root();

    let timeouts = Arc::new(AtomicUsize::new(0));
    let (seen, handler) = collector();
    let handle = watcher
        .watch(
            vec![tag(&tree, "item")],
            handler,
            WatchOptions::new().timeout(ms(500)).on_timeout({
                let timeouts = Arc::clone(&timeouts);
                move || {
                    timeouts.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .unwrap();

    timers.advance(ms(499));
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    assert_eq!(tree.subscription_count(), 1);

    timers.advance(ms(1));
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(tree.subscription_count(), 0);

    // A match arriving after the timeout goes nowhere.
    tree.append_new(root, "item");
    assert!(seen.lock().is_empty());

    assert!(!handle.cancel());
    timers.advance(ms(1_000));
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_completion_disarms_timeout() {
    let (tree, timers, watcher) = setup();
    let root = tree.root();

    let timeouts = Arc::new(AtomicUsize::new(0));
    let (seen, handler) = collector();
    watcher
        .watch(
            vec![tag(&tree, "item")],
            handler,
            WatchOptions::new()
                .settle_delay(ms(100))
                .timeout(ms(500))
                .on_timeout({
                    let timeouts = Arc::clone(&timeouts);
                    move || {
                        timeouts.fetch_add(1, Ordering::SeqCst);
                    }
                }),
        )
        .unwrap();

    tree.append_new(root, "item");
    timers.advance(ms(100));

    // The session settled; its timeout must never fire.
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(tree.subscription_count(), 0);
    assert_eq!(timers.pending_count(), 0);

    timers.advance(ms(1_000));
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_discards_pending_settle_and_timeout() {
    let (tree, timers, watcher) = setup();
    let root = tree.root();

    let (seen, handler) = collector();
    let handle = watcher
        .watch(
            vec![tag(&tree, "item")],
            handler,
            WatchOptions::new().settle_delay(ms(100)).timeout(ms(500)),
        )
        .unwrap();

    tree.append_new(root, "item");
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(timers.pending_count(), 2);

    assert!(handle.cancel());
    assert_eq!(timers.pending_count(), 0);
    assert_eq!(tree.subscription_count(), 0);
}

#[test]
fn test_independent_roots_get_independent_subscriptions() {
    let (tree, _timers, watcher) = setup();
    let root = tree.root();
    let left = tree.append_new(root, "pane");
    let right = tree.append_new(root, "pane");

    let (seen, handler) = collector();
    let left_handle = watcher
        .watch(
            vec![tag(&tree, "item")],
            handler,
            WatchOptions::new().root(left).once(false),
        )
        .unwrap();
    let right_handle = watcher
        .watch(vec![tag(&tree, "item")], |_| {}, WatchOptions::new().root(right).once(false))
        .unwrap();

    assert_eq!(tree.subscription_count(), 2);

    // A match outside the left session's root is invisible to it.
    let in_right = tree.append_new(right, "item");
    let in_left = tree.append_new(left, "item");
    assert_eq!(seen.lock().as_slice(), &[in_left]);
    let _ = in_right;

    assert!(left_handle.cancel());
    assert_eq!(tree.subscription_count(), 1);
    assert!(right_handle.cancel());
    assert_eq!(tree.subscription_count(), 0);
}
