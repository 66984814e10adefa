//! RecordQueue: FIFO delivery queue that doubles as an append-only registry
//!
//! Every item accepted by `put` is delivered to consumers *and* recorded in
//! the registry, in the same order. The end-of-stream marker is delivered
//! but never recorded; accepting it flips the `done` flag for good.
//!
//! Registry append and delivery happen under one lock, so the registry order
//! is exactly the order in which consumers can observe items.

use crate::error::{PipelineError, Result};
use crate::item::{Entry, Item};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::{watch, Notify};
use tracing::debug;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Entry>,
    registry: Vec<Item>,
    done: bool,
    /// Entries put but not yet acknowledged with `task_done`
    unfinished: usize,
}

pub struct RecordQueue {
    name: String,
    state: Mutex<QueueState>,
    available: Notify,
    drained: Notify,
    done_tx: watch::Sender<bool>,
}

impl RecordQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            drained: Notify::new(),
            done_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accept an entry.
    ///
    /// Items are appended to the registry and delivered. The end-of-stream
    /// marker sets `done` (idempotent) and is delivered.
    ///
    /// # Errors
    /// `ContractViolation` if an item arrives after the queue is done.
    pub fn put(&self, entry: impl Into<Entry>) -> Result<()> {
        let entry = entry.into();
        let mut state = self.state.lock();

        let newly_done = match &entry {
            Entry::EndOfStream => !std::mem::replace(&mut state.done, true),
            Entry::Item(item) => {
                if state.done {
                    return Err(PipelineError::ContractViolation(format!(
                        "item put on queue '{}' after end of stream: {}",
                        self.name, item
                    )));
                }
                state.registry.push(item.clone());
                false
            }
        };
        state.pending.push_back(entry);
        state.unfinished += 1;
        drop(state);

        self.available.notify_one();
        if newly_done {
            debug!(queue = %self.name, "end of stream accepted");
            self.done_tx.send_replace(true);
        }
        Ok(())
    }

    pub fn push(&self, item: Item) -> Result<()> {
        self.put(Entry::Item(item))
    }

    /// Put the end-of-stream marker
    pub fn close(&self) -> Result<()> {
        self.put(Entry::EndOfStream)
    }

    /// Remove and return the head entry, waiting while the queue is empty
    pub async fn get(&self) -> Entry {
        loop {
            // Register as a waiter before looking, so a put in between wakes
            // this consumer even when others are waiting too.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = self.state.lock().pending.pop_front();
            if let Some(entry) = next {
                return entry;
            }
            notified.await;
        }
    }

    /// Acknowledge one entry obtained from `get`.
    ///
    /// # Errors
    /// `ContractViolation` when called more often than entries were put.
    pub fn task_done(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.unfinished == 0 {
            return Err(PipelineError::ContractViolation(format!(
                "task_done called too many times on queue '{}'",
                self.name
            )));
        }
        state.unfinished -= 1;
        let drained = state.unfinished == 0;
        drop(state);

        if drained {
            self.drained.notify_waiters();
        }
        Ok(())
    }

    /// Wait until every entry put so far has been acknowledged
    pub async fn join(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let idle = self.state.lock().unfinished == 0;
            if idle {
                return;
            }
            drained.await;
        }
    }

    /// Advisory only: may be stale as soon as it returns
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn unfinished_tasks(&self) -> usize {
        self.state.lock().unfinished
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// Copy of the registry at this instant
    pub fn registry(&self) -> Vec<Item> {
        self.state.lock().registry.clone()
    }

    pub fn registry_len(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Receiver that reads `true` once end of stream has been accepted
    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }
}

impl std::fmt::Debug for RecordQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RecordQueue")
            .field("name", &self.name)
            .field("pending", &state.pending.len())
            .field("registry", &state.registry.len())
            .field("done", &state.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn item(id: i64) -> Item {
        Item::new().with("id", id)
    }

    #[test]
    fn test_registry_excludes_end_of_stream() {
        let queue = RecordQueue::new("metadata");
        queue.push(item(1)).unwrap();
        queue.push(item(2)).unwrap();
        assert!(!queue.is_done());

        queue.close().unwrap();

        assert!(queue.is_done());
        assert_eq!(queue.registry(), vec![item(1), item(2)]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_item_after_end_of_stream_is_rejected() {
        let queue = RecordQueue::new("content");
        queue.close().unwrap();

        let err = queue.push(item(9)).unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(queue.registry_len(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue = RecordQueue::new("labels");
        queue.close().unwrap();
        queue.close().unwrap();
        assert!(queue.is_done());
        assert_eq!(queue.registry_len(), 0);
    }

    #[tokio::test]
    async fn test_get_returns_in_put_order() {
        let queue = RecordQueue::new("q");
        for i in 0..5 {
            queue.push(item(i)).unwrap();
        }
        queue.close().unwrap();

        for i in 0..5 {
            assert_eq!(queue.get().await, Entry::Item(item(i)));
        }
        assert_eq!(queue.get().await, Entry::EndOfStream);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_put() {
        let queue = Arc::new(RecordQueue::new("q"));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.push(Item::new().with("late", json!(true))).unwrap();
        let entry = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.into_item().unwrap()["late"], json!(true));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_share_all_entries() {
        let queue = Arc::new(RecordQueue::new("q"));
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    match queue.get().await {
                        Entry::Item(item) => seen.push(item["id"].as_i64().unwrap()),
                        Entry::EndOfStream => break,
                    }
                }
                seen
            }));
        }

        for i in 0..100 {
            queue.push(item(i)).unwrap();
        }
        for _ in 0..4 {
            queue.put(Entry::EndOfStream).unwrap();
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_task_done_accounting() {
        let queue = RecordQueue::new("q");
        queue.push(item(1)).unwrap();
        assert_eq!(queue.unfinished_tasks(), 1);

        let _ = queue.get().await;
        queue.task_done().unwrap();
        assert_eq!(queue.unfinished_tasks(), 0);

        assert!(queue.task_done().unwrap_err().is_contract_violation());
    }

    #[tokio::test]
    async fn test_join_waits_for_acknowledgements() {
        let queue = Arc::new(RecordQueue::new("q"));
        queue.push(item(1)).unwrap();
        queue.push(item(2)).unwrap();

        let joiner = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.join().await })
        };

        for _ in 0..2 {
            let _ = queue.get().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!joiner.is_finished());
            queue.task_done().unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), joiner)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_done_flips_once() {
        let queue = RecordQueue::new("q");
        let mut done = queue.subscribe_done();
        assert!(!*done.borrow());

        queue.push(item(1)).unwrap();
        queue.close().unwrap();

        done.changed().await.unwrap();
        assert!(*done.borrow());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_keep_registry_and_delivery_in_step() {
        const PRODUCERS: i64 = 6;
        const PER_PRODUCER: i64 = 200;

        let queue = Arc::new(RecordQueue::new("content"));
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for seq in 0..PER_PRODUCER {
                        queue.push(Item::new().with("producer", p).with("seq", seq)).unwrap();
                        if seq % 16 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        queue.close().unwrap();

        let registry = queue.registry();
        assert_eq!(registry.len(), (PRODUCERS * PER_PRODUCER) as usize);

        for p in 0..PRODUCERS {
            let seqs: Vec<i64> = registry
                .iter()
                .filter(|i| i["producer"] == json!(p))
                .map(|i| i["seq"].as_i64().unwrap())
                .collect();
            assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>());
        }

        let mut delivered = Vec::new();
        loop {
            match queue.get().await {
                Entry::Item(item) => delivered.push(item),
                Entry::EndOfStream => break,
            }
            queue.task_done().unwrap();
        }
        assert_eq!(delivered, registry);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_waiting_consumer_is_woken() {
        const CONSUMERS: usize = 4;

        for _ in 0..50 {
            let queue = Arc::new(RecordQueue::new("labels"));
            let consumers: Vec<_> = (0..CONSUMERS)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move { queue.get().await })
                })
                .collect();

            // one marker per consumer, put from concurrent producers
            let producers: Vec<_> = (0..CONSUMERS)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move { queue.close().unwrap() })
                })
                .collect();
            for producer in producers {
                producer.await.unwrap();
            }

            for consumer in consumers {
                let entry = tokio::time::timeout(Duration::from_secs(2), consumer)
                    .await
                    .unwrap()
                    .unwrap();
                assert!(entry.is_end_of_stream());
            }
            assert!(queue.is_empty());
        }
    }
}
