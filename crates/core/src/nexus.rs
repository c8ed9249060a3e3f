//! Messaging nexus: a bounded priority multiplexer over inbound requests.
//!
//! Dispatch order is strictly `(priority, enqueue_order)` — FIFO within a
//! priority class, lower number first.  Execution across classes may
//! interleave up to the concurrency bound; the nexus never serializes
//! globally.  On overflow the lowest-priority queued item is shed first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::events::{emit, CoreEvent, OnEvent};

pub const PRIORITY_URGENT: u8 = 10;
pub const PRIORITY_STANDARD: u8 = 20;
pub const PRIORITY_PROACTIVE: u8 = 30;

const DEFAULT_CAPACITY: usize = 64;

pub type ReplyCallback = Box<dyn FnOnce(String) + Send + 'static>;

struct QueuedRequest {
    priority: u8,
    seq: u64,
    source: String,
    user_id: String,
    text: String,
    callback: ReplyCallback,
}

impl QueuedRequest {
    fn key(&self) -> (u8, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap; reverse the key so the most urgent item pops
// first.
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedRequest>,
    next_seq: u64,
}

pub struct MessagingNexus {
    queue: Mutex<QueueState>,
    notify: Notify,
    active: AtomicBool,
    capacity: usize,
    concurrency: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessagingNexus {
    pub fn new(concurrency: usize) -> Self {
        Self {
            queue: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            active: AtomicBool::new(false),
            capacity: DEFAULT_CAPACITY,
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: Mutex::new(vec![]),
        }
    }

    /// Enqueue a request.  Returns false when the item was shed (queue full
    /// of higher-priority work).
    pub fn ingest(
        &self,
        source: &str,
        user_id: &str,
        text: &str,
        callback: ReplyCallback,
        priority: u8,
    ) -> bool {
        let mut queue = self.queue.lock().unwrap();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        let request = QueuedRequest {
            priority,
            seq,
            source: source.to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            callback,
        };
        info!(source, user_id, priority, "nexus ingest");

        if queue.heap.len() >= self.capacity {
            // Shed the lowest-priority item, counting the incoming one.
            let mut items: Vec<QueuedRequest> = queue.heap.drain().collect();
            items.push(request);
            // Highest (priority, seq) = least urgent, shed it.
            let worst_idx = items
                .iter()
                .enumerate()
                .max_by_key(|(_, r)| r.key())
                .map(|(i, _)| i)
                .unwrap();
            let shed = items.swap_remove(worst_idx);
            warn!(priority = shed.priority, source = %shed.source, "nexus overflow, item shed");
            let shed_was_incoming = shed.seq == seq;
            (shed.callback)("Request dropped: queue is saturated with higher-priority work.".to_string());
            queue.heap.extend(items);
            drop(queue);
            self.notify.notify_one();
            return !shed_was_incoming;
        }

        queue.heap.push(request);
        drop(queue);
        self.notify.notify_one();
        true
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().unwrap().heap.len()
    }

    /// Run until stopped: repeatedly dequeue the most urgent item and spawn
    /// a bounded-concurrency task that drives the controller and invokes
    /// the reply callback.
    pub async fn run(self: Arc<Self>, controller: Arc<Controller>, on_event: Option<OnEvent>) {
        self.active.store(true, AtomicOrdering::SeqCst);
        info!("nexus: priority processor online");

        while self.active.load(AtomicOrdering::SeqCst) {
            let item = self.queue.lock().unwrap().heap.pop();
            let Some(request) = item else {
                self.notify.notified().await;
                continue;
            };

            let permit = match self.concurrency.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let controller = controller.clone();
            let on_event = on_event.clone();
            let task_id = format!("{}/P{}", request.source, request.priority);
            let handle = tokio::spawn(async move {
                emit(&on_event, CoreEvent::NexusTask { added: true, id: task_id.clone() });
                let QueuedRequest { text, callback, user_id, .. } = request;
                let reply = controller.process_request(&text, on_event.clone(), &[]).await;
                tracing::debug!(user_id = %user_id, "nexus task complete");
                callback(reply);
                emit(&on_event, CoreEvent::NexusTask { added: false, id: task_id });
                drop(permit);
            });
            let mut tasks = self.tasks.lock().unwrap();
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
        info!("nexus: processor stopped");
    }

    /// Cancel in-flight tasks and drain the queue without executing it.
    pub fn stop(&self) {
        self.active.store(false, AtomicOrdering::SeqCst);
        self.queue.lock().unwrap().heap.clear();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.notify.notify_waiters();
        info!("nexus: stopped, queue drained");
    }
}
