//! Rate-limited batched subscription management.
//!
//! The monitored symbol universe is partitioned into fixed-size batches and
//! driven through the open connection serially, one drain at a time, with an
//! enforced inter-batch delay. Failed sends requeue the batch; exhausting the
//! retry budget escalates to a full reconnect instead of dropping symbols.

use crate::{config::EngineConfig, connection::SessionControl, engine::Shared, protocol::{ChannelKey, ClientMessage}};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// The set of channels acknowledged as sent to the upstream. Always a subset
/// of the intended symbol universe.
#[derive(Debug, Default)]
pub struct ActiveSubscriptions {
    inner: RwLock<HashSet<ChannelKey>>,
}

impl ActiveSubscriptions {
    pub fn insert(&self, key: ChannelKey) {
        self.inner.write().insert(key);
    }

    pub fn remove(&self, key: &ChannelKey) {
        self.inner.write().remove(key);
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.inner.read().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Partitions the symbol universe into batches and drives them through the
/// connection's outbound queue.
#[derive(Debug)]
pub struct SubscriptionScheduler {
    queue: Mutex<VecDeque<Vec<ChannelKey>>>,
    draining: AtomicBool,
    batch_delay: Duration,
    retry_delay: Duration,
    max_retries: u32,
}

/// Clears the draining flag when a drain ends, including by task abort.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SubscriptionScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            batch_delay: config.batch_delay,
            retry_delay: config.subscription_retry_delay,
            max_retries: config.max_subscription_retries,
        }
    }

    /// Partition `symbols` into batches of `batch_size` channel keys,
    /// replacing any previously queued batches.
    pub fn prepare_batches(&self, symbols: &[String], quote: &str, batch_size: usize) {
        let batch_size = batch_size.max(1);
        let mut queue = self.queue.lock();
        queue.clear();
        for chunk in symbols.chunks(batch_size) {
            queue.push_back(
                chunk
                    .iter()
                    .map(|symbol| ChannelKey::new(symbol, quote))
                    .collect(),
            );
        }
        debug!(batches = queue.len(), batch_size, "subscription batches prepared");
    }

    pub fn pending_batches(&self) -> usize {
        self.queue.lock().len()
    }

    fn begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DrainGuard(&self.draining))
    }

    /// Drain the batch queue serially through `outbound`. Re-entrant calls
    /// while a drain is running are no-ops. A batch whose send fails is
    /// requeued and the drain retried with a linearly increasing delay;
    /// exhausting the budget escalates a [`SessionControl::ForceReconnect`].
    ///
    /// A batch counts as active once accepted by the outbound queue, not once
    /// written to the socket. If the writer dies with frames still queued,
    /// those symbols stay marked until session cleanup clears the set, which
    /// the forced reconnect triggers.
    pub(crate) async fn drain(
        &self,
        shared: &Arc<Shared>,
        outbound: mpsc::Sender<Message>,
        ctrl: mpsc::Sender<SessionControl>,
    ) {
        let Some(_guard) = self.begin_drain() else {
            debug!("subscription drain already running, skipping");
            return;
        };

        let mut retries: u32 = 0;
        loop {
            let batch = { self.queue.lock().pop_front() };
            let Some(batch) = batch else {
                info!(active = shared.subs.len(), "subscription queue drained");
                return;
            };

            let frame = ClientMessage::SubAdd {
                subs: batch.clone(),
            };
            match outbound.send(Message::text(frame.to_text())).await {
                Ok(()) => {
                    for key in &batch {
                        shared.subs.insert(key.clone());
                    }
                    info!(count = batch.len(), "subscribed batch");
                    tokio::time::sleep(self.batch_delay).await;
                }
                Err(_) => {
                    // Never silently drop a batch: requeue it, then retry the
                    // whole drain or escalate.
                    self.queue.lock().push_front(batch);
                    retries += 1;
                    if retries > self.max_retries {
                        warn!(retries, "subscription retries exhausted, escalating");
                        let _ = ctrl.send(SessionControl::ForceReconnect).await;
                        return;
                    }
                    warn!(retries, "subscription batch send failed, retrying");
                    tokio::time::sleep(self.retry_delay * retries).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Shared;

    fn scheduler() -> SubscriptionScheduler {
        SubscriptionScheduler::new(&EngineConfig::default())
    }

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SYM{i}")).collect()
    }

    #[test]
    fn test_prepare_batches_partitioning() {
        let scheduler = scheduler();
        scheduler.prepare_batches(&symbols(63), "USD", 15);
        assert_eq!(scheduler.pending_batches(), 5);

        let queue = scheduler.queue.lock();
        let sizes: Vec<usize> = queue.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![15, 15, 15, 15, 3]);
        assert_eq!(queue[0][0].as_ref(), "5~CCCAGG~SYM0~USD");
    }

    #[test]
    fn test_drain_guard_is_exclusive() {
        let scheduler = scheduler();
        let first = scheduler.begin_drain();
        assert!(first.is_some());
        assert!(scheduler.begin_drain().is_none());

        drop(first);
        assert!(scheduler.begin_drain().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_sends_batches_in_order_and_marks_active() {
        let scheduler = scheduler();
        scheduler.prepare_batches(&symbols(30), "USD", 10);

        let shared = Arc::new(Shared::new(&EngineConfig::default()));
        let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
        let (ctrl_tx, mut ctrl_rx) = mpsc::channel(4);

        scheduler.drain(&shared, outbound_tx, ctrl_tx).await;

        assert_eq!(scheduler.pending_batches(), 0);
        assert_eq!(shared.subs.len(), 30);
        assert!(shared.subs.contains(&ChannelKey::new("SYM0", "USD")));
        assert!(ctrl_rx.try_recv().is_err());

        // Batches arrive strictly in queue order.
        let mut seen = Vec::new();
        while let Ok(message) = outbound_rx.try_recv() {
            seen.push(message.to_text().unwrap().to_string());
        }
        assert_eq!(seen.len(), 3);
        assert!(seen[0].contains("SYM0"));
        assert!(seen[2].contains("SYM29"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_escalates_after_retry_budget() {
        let scheduler = scheduler();
        scheduler.prepare_batches(&symbols(5), "USD", 5);

        let shared = Arc::new(Shared::new(&EngineConfig::default()));
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        drop(outbound_rx); // every send fails
        let (ctrl_tx, mut ctrl_rx) = mpsc::channel(4);

        scheduler.drain(&shared, outbound_tx, ctrl_tx).await;

        // The batch was requeued, never dropped, and nothing marked active.
        assert_eq!(scheduler.pending_batches(), 1);
        assert!(shared.subs.is_empty());
        assert_eq!(ctrl_rx.recv().await, Some(SessionControl::ForceReconnect));
    }
}
