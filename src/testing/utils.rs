use crate::types::{Node, NodeId};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
///
/// Returns whether the condition held.
pub async fn wait_for<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    let interval = Duration::from_millis(10);

    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(interval).await;
    }
}

/// Poll `action` until `predicate` accepts its result or `timeout` elapses.
pub async fn wait_for_result<F, T, P>(mut action: F, predicate: P, timeout: Duration) -> Option<T>
where
    F: FnMut() -> T,
    P: Fn(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    let interval = Duration::from_millis(10);

    while Instant::now() < deadline {
        let result = action();
        if predicate(&result) {
            return Some(result);
        }
        sleep(interval).await;
    }
    None
}

/// A member description with a loopback address derived from its ID.
pub fn test_node(node_id: NodeId) -> Node {
    let addr = ([127, 0, 0, 1], 7600 + node_id as u16).into();
    Node::new(node_id, format!("node-{}", node_id), addr)
}

/// First identifier `prefix-N` whose primary owner over `ring` is `owner`.
pub(crate) fn id_owned_by(prefix: &str, ring: &[NodeId], owner: NodeId) -> String {
    id_owned_across(prefix, &[ring], owner)
}

/// First identifier `prefix-N` that `owner` owns over every one of `rings`.
pub(crate) fn id_owned_across(prefix: &str, rings: &[&[NodeId]], owner: NodeId) -> String {
    let trackers: Vec<_> = rings
        .iter()
        .map(|ring| {
            let tracker = crate::partitioning::OwnershipTracker::new(owner, 1);
            tracker.set_nodes(ring);
            tracker
        })
        .collect();
    (0..)
        .map(|n| format!("{}-{}", prefix, n))
        .find(|id| trackers.iter().all(|tracker| tracker.is_primary(id)))
        .unwrap_or_default()
}
