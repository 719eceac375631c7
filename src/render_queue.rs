// Paces buffered text into the document, one adaptive chunk per frame

use crate::document::DocumentSink;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

/// Characters to withdraw in one frame for a backlog of `len` characters.
///
/// Bigger backlogs drain in bigger chunks so the display keeps up with a
/// fast producer; small backlogs trickle out two characters at a time.
pub fn chunk_size(len: usize) -> usize {
    match len {
        0 => 0,
        1..=10 => 2,
        11..=50 => 4,
        51..=100 => 10,
        101..=200 => 25,
        _ => 50,
    }
}

/// Outcome of one drain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// `chars` characters were inserted, `remaining` are still buffered.
    Inserted { chars: usize, remaining: usize },
    /// Nothing was buffered; the queue is idle.
    Idle,
    /// The step was scheduled by a loop that a reset has retired since.
    Stale,
}

struct QueueState {
    pending: VecDeque<char>,
    active: bool,
    /// Bumped by every reset and every loop start; a loop only drains while
    /// the epoch it was started with is current.
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<QueueState>,
    sink: Arc<dyn DocumentSink>,
    frame_interval: Duration,
    draining: watch::Sender<bool>,
}

/// FIFO buffer of not-yet-displayed text plus its frame-paced drain loop.
///
/// Cloning gives another handle to the same queue.
#[derive(Clone)]
pub struct RenderQueue {
    inner: Arc<Inner>,
}

impl RenderQueue {
    pub fn new(sink: Arc<dyn DocumentSink>, frame_interval: Duration) -> Self {
        let (draining, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: false,
                    epoch: 0,
                    task: None,
                }),
                sink,
                frame_interval: frame_interval.max(Duration::from_millis(1)),
                draining,
            }),
        }
    }

    /// Append a fragment and start the drain loop unless one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn enqueue(&self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        state.pending.extend(fragment.chars());
        if state.active {
            return;
        }

        state.active = true;
        state.epoch = state.epoch.wrapping_add(1);
        if let Some(stale) = state.task.take() {
            stale.abort();
        }
        self.inner.draining.send_replace(true);
        let epoch = state.epoch;
        trace!(epoch, pending = state.pending.len(), "starting drain loop");
        state.task = Some(tokio::spawn(Self::run_drain_loop(
            self.inner.clone(),
            epoch,
        )));
    }

    /// Insert the next chunk into the document.
    ///
    /// The drain loop calls this once per frame; calling it by hand advances
    /// the queue by one frame's worth of text.
    pub async fn drain_step(&self) -> DrainStep {
        Self::step(&self.inner, None).await
    }

    /// Drop all buffered text and stop the drain loop.
    ///
    /// A drain step that was already scheduled observes the reset and inserts
    /// nothing.
    pub async fn reset(&self) {
        let mut state = self.inner.state.lock().await;
        let dropped = state.pending.len();
        state.pending.clear();
        state.active = false;
        state.epoch = state.epoch.wrapping_add(1);
        if let Some(task) = state.task.take() {
            task.abort();
        }
        self.inner.draining.send_replace(false);
        trace!(epoch = state.epoch, dropped, "render queue reset");
    }

    /// Number of characters still waiting to be displayed.
    pub async fn pending_len(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub fn is_draining(&self) -> bool {
        *self.inner.draining.borrow()
    }

    /// Resolve once no drain loop is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.draining.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|draining| !*draining).await;
    }

    async fn run_drain_loop(inner: Arc<Inner>, epoch: u64) {
        let mut ticker = interval(inner.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match Self::step(&inner, Some(epoch)).await {
                DrainStep::Inserted { remaining: 0, .. } | DrainStep::Idle | DrainStep::Stale => {
                    break
                }
                DrainStep::Inserted { .. } => {}
            }
        }
    }

    /// `reset` aborts the running loop, but a loop that already passed its
    /// tick may be waiting on the lock; the epoch check retires that step.
    async fn step(inner: &Inner, scheduled_for: Option<u64>) -> DrainStep {
        let mut state = inner.state.lock().await;
        if let Some(epoch) = scheduled_for {
            if !state.active || state.epoch != epoch {
                trace!(epoch, current = state.epoch, "discarding stale drain step");
                return DrainStep::Stale;
            }
        }

        let len = state.pending.len();
        if len == 0 {
            state.active = false;
            state.task = None;
            inner.draining.send_replace(false);
            return DrainStep::Idle;
        }

        let take = chunk_size(len).min(len);
        let chunk: String = state.pending.drain(..take).collect();
        inner.sink.insert_text_at_cursor(&chunk);
        inner.sink.scroll_cursor_into_view();

        let remaining = state.pending.len();
        trace!(chars = take, remaining, "drained chunk");
        if remaining == 0 {
            state.active = false;
            state.task = None;
            inner.draining.send_replace(false);
        }
        DrainStep::Inserted {
            chars: take,
            remaining,
        }
    }
}
