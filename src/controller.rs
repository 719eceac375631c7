// Generation lifecycle: starts producers, forwards fragments, handles cancel

use crate::document::DocumentSink;
use crate::producer::{FragmentProducer, FragmentStream};
use crate::render_queue::RenderQueue;
use crate::session::{GenerationRequest, GenerationSession, GenerationStatus};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whether an event changed the lifecycle.
///
/// Events that make no sense in the current state are ignored, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        self == Transition::Applied
    }
}

struct GenerationState {
    session: GenerationSession,
    history: Vec<GenerationSession>,
    cancellation_token: Option<CancellationToken>,
    /// Identifies the live consumption task; bumped on every START.
    generation_id: u64,
}

impl GenerationState {
    fn is_live(&self, generation_id: u64) -> bool {
        self.generation_id == generation_id
            && self.session.status == GenerationStatus::Generating
    }
}

struct Inner {
    state: Mutex<GenerationState>,
    queue: RenderQueue,
    sink: Arc<dyn DocumentSink>,
    producer: Arc<dyn FragmentProducer>,
    updates: watch::Sender<GenerationSession>,
}

impl Inner {
    /// Replace the current session and publish it.
    fn install(&self, state: &mut GenerationState, session: GenerationSession) {
        state.history.push(session.clone());
        state.session = session.clone();
        self.updates.send_replace(session);
    }
}

/// Drives one editing session's AI continuations.
///
/// At most one generation runs at a time. Cloning gives another handle to
/// the same controller.
#[derive(Clone)]
pub struct GenerationController {
    inner: Arc<Inner>,
}

impl GenerationController {
    pub fn new(
        sink: Arc<dyn DocumentSink>,
        producer: Arc<dyn FragmentProducer>,
        frame_interval: Duration,
    ) -> Self {
        let idle = GenerationSession::idle();
        let (updates, _) = watch::channel(idle.clone());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(GenerationState {
                    session: idle.clone(),
                    history: vec![idle],
                    cancellation_token: None,
                    generation_id: 0,
                }),
                queue: RenderQueue::new(sink.clone(), frame_interval),
                sink,
                producer,
                updates,
            }),
        }
    }

    /// START: begin generating a continuation of `request.base_text`.
    ///
    /// Ignored while a generation is already running.
    pub async fn start(&self, request: GenerationRequest) -> Transition {
        let mut state = self.inner.state.lock().await;
        if !state.session.status.can_start() {
            debug!("START ignored, a generation is already running");
            return Transition::Ignored;
        }

        // Whatever the previous session left buffered belongs to it.
        self.inner.queue.reset().await;

        let token = CancellationToken::new();
        state.cancellation_token = Some(token.clone());
        state.generation_id += 1;
        let generation_id = state.generation_id;
        self.inner
            .install(&mut state, GenerationSession::generating(request.clone()));
        self.inner.sink.move_cursor_to_end();

        info!(
            generation_id,
            base_chars = request.base_text.chars().count(),
            has_instruction = request.instruction.is_some(),
            "generation started"
        );
        let stream = self.inner.producer.stream_continuation(&request);
        tokio::spawn(Self::consume(
            self.inner.clone(),
            generation_id,
            token,
            stream,
        ));
        Transition::Applied
    }

    /// START using the document's current text as the base.
    pub async fn start_from_document(&self, instruction: Option<String>) -> Transition {
        let mut request = GenerationRequest::new(self.inner.sink.text());
        if let Some(instruction) = instruction {
            request = request.with_instruction(instruction);
        }
        self.start(request).await
    }

    /// CANCEL: stop consuming the producer and drop undisplayed text.
    ///
    /// Text already inserted stays in the document.
    pub async fn cancel(&self) -> Transition {
        let mut state = self.inner.state.lock().await;
        if state.session.status != GenerationStatus::Generating {
            debug!(status = %state.session.status, "CANCEL ignored");
            return Transition::Ignored;
        }

        if let Some(token) = state.cancellation_token.take() {
            token.cancel();
        }
        let cancelled = state.session.cancelled();
        self.inner.install(&mut state, cancelled);
        self.inner.queue.reset().await;
        info!(generation_id = state.generation_id, "generation cancelled");
        Transition::Applied
    }

    /// Return a finished session to idle.
    pub async fn reset(&self) -> Transition {
        let mut state = self.inner.state.lock().await;
        if !state.session.status.is_terminal() {
            debug!(status = %state.session.status, "RESET ignored");
            return Transition::Ignored;
        }
        self.inner.install(&mut state, GenerationSession::idle());
        Transition::Applied
    }

    /// Clear the document along with any text still waiting to be displayed.
    ///
    /// Ignored while generating.
    pub async fn clear_document(&self) -> Transition {
        let state = self.inner.state.lock().await;
        if state.session.status == GenerationStatus::Generating {
            debug!("clear ignored while generating");
            return Transition::Ignored;
        }
        self.inner.queue.reset().await;
        self.inner.sink.clear();
        Transition::Applied
    }

    pub fn status(&self) -> GenerationStatus {
        self.inner.updates.borrow().status
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.updates.borrow().error_message.clone()
    }

    pub fn session(&self) -> GenerationSession {
        self.inner.updates.borrow().clone()
    }

    /// Every session installed so far, oldest first.
    pub async fn history(&self) -> Vec<GenerationSession> {
        self.inner.state.lock().await.history.clone()
    }

    /// Receives every session the controller installs.
    pub fn subscribe(&self) -> watch::Receiver<GenerationSession> {
        self.inner.updates.subscribe()
    }

    pub fn can_undo(&self) -> bool {
        self.inner.sink.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.sink.can_redo()
    }

    pub fn render_queue(&self) -> &RenderQueue {
        &self.inner.queue
    }

    async fn consume(
        inner: Arc<Inner>,
        generation_id: u64,
        token: CancellationToken,
        mut stream: FragmentStream,
    ) {
        let mut fragments = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(generation_id, "producer abandoned after cancel");
                    return;
                }
                next = stream.next() => next,
            };

            // Everything below runs under the controller lock, so a CANCEL
            // either lands before this check or after the enqueue.
            let mut state = inner.state.lock().await;
            if !state.is_live(generation_id) {
                debug!(generation_id, "discarding fragment delivered after cancel");
                return;
            }

            match next {
                Some(Ok(fragment)) => {
                    fragments += 1;
                    inner.queue.enqueue(&fragment).await;
                }
                Some(Err(err)) => {
                    warn!(generation_id, error = %err, "generation failed");
                    state.cancellation_token = None;
                    let failed = state.session.failed(err.to_string());
                    inner.install(&mut state, failed);
                    return;
                }
                None => {
                    info!(generation_id, fragments, "generation complete");
                    state.cancellation_token = None;
                    let succeeded = state.session.succeeded();
                    inner.install(&mut state, succeeded);
                    return;
                }
            }
        }
    }
}
