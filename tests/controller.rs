use futures_util::stream;
use futures_util::StreamExt;
use ollamawrite::{
    DocumentSink, FragmentProducer, FragmentStream, GenerationController, GenerationRequest,
    GenerationSession, GenerationStatus, MemoryDocument, ProducerError, ScriptedProducer,
    Transition,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const FRAME: Duration = Duration::from_millis(16);

type Item = Result<String, ProducerError>;

/// Producer fed by the test through a channel; dropping the sender completes it.
struct ChannelProducer {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Item>>>,
    calls: AtomicUsize,
}

impl ChannelProducer {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<Item>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = Arc::new(Self {
            rx: Mutex::new(Some(rx)),
            calls: AtomicUsize::new(0),
        });
        (producer, tx)
    }
}

impl FragmentProducer for ChannelProducer {
    fn stream_continuation(&self, _request: &GenerationRequest) -> FragmentStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.rx.lock().unwrap().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }
}

/// Yields `<0>`, then cancels the controller while producing `<1>`, so `<1>`
/// is already in flight when the cancel lands.
#[derive(Default)]
struct CancelMidYieldProducer {
    controller: Mutex<Option<GenerationController>>,
}

impl FragmentProducer for CancelMidYieldProducer {
    fn stream_continuation(&self, _request: &GenerationRequest) -> FragmentStream {
        let controller = self.controller.lock().unwrap().clone();
        stream::unfold(0usize, move |index| {
            let controller = controller.clone();
            async move {
                match index {
                    0 => Some((Ok("<0>".to_string()), 1)),
                    1 => {
                        if let Some(controller) = controller {
                            assert_eq!(controller.cancel().await, Transition::Applied);
                        }
                        Some((Ok("<1>".to_string()), 2))
                    }
                    2 => Some((Ok("<2>".to_string()), 3)),
                    _ => None,
                }
            }
        })
        .boxed()
    }
}

fn controller_with(
    doc: &Arc<MemoryDocument>,
    producer: Arc<dyn FragmentProducer>,
) -> GenerationController {
    GenerationController::new(doc.clone(), producer, FRAME)
}

async fn wait_terminal(controller: &GenerationController) -> GenerationSession {
    let mut updates = controller.subscribe();
    let session = updates
        .wait_for(|s| s.status.is_terminal())
        .await
        .expect("controller alive");
    session.clone()
}

async fn wait_for_text(doc: &MemoryDocument, expected: &str) {
    for _ in 0..200 {
        if doc.text() == expected {
            return;
        }
        tokio::time::sleep(FRAME).await;
    }
    panic!("document never read {expected:?}, got {:?}", doc.text());
}

async fn statuses(controller: &GenerationController) -> Vec<GenerationStatus> {
    controller
        .history()
        .await
        .into_iter()
        .map(|s| s.status)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn completes_and_renders_every_fragment() {
    let doc = Arc::new(MemoryDocument::new());
    let producer = Arc::new(ScriptedProducer::new(["Hello", " world"]));
    let controller = controller_with(&doc, producer);

    let outcome = controller.start(GenerationRequest::new("")).await;
    assert_eq!(outcome, Transition::Applied);
    assert_eq!(controller.status(), GenerationStatus::Generating);

    let session = wait_terminal(&controller).await;
    assert_eq!(session.status, GenerationStatus::Success);
    assert_eq!(session.error_message, None);

    controller.render_queue().wait_idle().await;
    assert_eq!(doc.text(), "Hello world");
    assert_eq!(
        statuses(&controller).await,
        vec![
            GenerationStatus::Idle,
            GenerationStatus::Generating,
            GenerationStatus::Success
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn continuation_is_appended_at_the_end_of_the_document() {
    let doc = Arc::new(MemoryDocument::with_text("Dear diary,"));
    doc.set_cursor(0);
    let producer = Arc::new(ScriptedProducer::new([" today I", " learned Rust."]));
    let controller = controller_with(&doc, producer);

    controller
        .start_from_document(Some("keep it upbeat".to_string()))
        .await;
    let session = wait_terminal(&controller).await;
    controller.render_queue().wait_idle().await;

    assert_eq!(doc.text(), "Dear diary, today I learned Rust.");
    let request = session.request.expect("request recorded");
    assert_eq!(request.base_text, "Dear diary,");
    assert_eq!(request.instruction.as_deref(), Some("keep it upbeat"));
}

#[tokio::test(start_paused = true)]
async fn producer_failure_carries_its_message() {
    let doc = Arc::new(MemoryDocument::new());
    let producer =
        Arc::new(ScriptedProducer::new(Vec::<String>::new()).failing_with("rate limited"));
    let controller = controller_with(&doc, producer);

    controller.start(GenerationRequest::new("x")).await;
    let session = wait_terminal(&controller).await;

    assert_eq!(session.status, GenerationStatus::Error);
    assert_eq!(controller.error_message().as_deref(), Some("rate limited"));
}

#[tokio::test(start_paused = true)]
async fn text_rendered_before_a_failure_is_kept() {
    let doc = Arc::new(MemoryDocument::new());
    let producer = Arc::new(ScriptedProducer::new(["kept text"]).failing_with(""));
    let controller = controller_with(&doc, producer);

    controller.start(GenerationRequest::new("x")).await;
    let session = wait_terminal(&controller).await;
    controller.render_queue().wait_idle().await;

    assert_eq!(session.status, GenerationStatus::Error);
    assert_eq!(session.error_message.as_deref(), Some("Generation failed"));
    assert_eq!(doc.text(), "kept text");
}

#[tokio::test(start_paused = true)]
async fn start_while_generating_is_ignored() {
    let doc = Arc::new(MemoryDocument::new());
    let producer = Arc::new(
        ScriptedProducer::new(["slow", " text"]).with_delay(Duration::from_secs(1)),
    );
    let controller = controller_with(&doc, producer.clone());

    assert_eq!(
        controller.start(GenerationRequest::new("a")).await,
        Transition::Applied
    );
    assert_eq!(
        controller.start(GenerationRequest::new("b")).await,
        Transition::Ignored
    );
    assert_eq!(controller.status(), GenerationStatus::Generating);
    assert_eq!(producer.calls(), 1);

    wait_terminal(&controller).await;
    controller.render_queue().wait_idle().await;
    assert_eq!(doc.text(), "slow text");
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_fragments_delivered_afterwards() {
    let doc = Arc::new(MemoryDocument::new());
    let (producer, tx) = ChannelProducer::new();
    let controller = controller_with(&doc, producer);

    controller.start(GenerationRequest::new("")).await;
    tx.send(Ok("partial".to_string())).unwrap();
    wait_for_text(&doc, "partial").await;

    assert_eq!(controller.cancel().await, Transition::Applied);
    assert_eq!(controller.status(), GenerationStatus::Cancelled);

    // The producer resolves its pending yield after the cancel.
    let _ = tx.send(Ok(" late".to_string()));
    drop(tx);
    tokio::time::sleep(FRAME * 30).await;

    assert_eq!(doc.text(), "partial");
    assert_eq!(controller.render_queue().pending_len().await, 0);
    assert!(!controller.render_queue().is_draining());
    assert_eq!(controller.status(), GenerationStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_text_not_yet_displayed() {
    let doc = Arc::new(MemoryDocument::new());
    let (producer, tx) = ChannelProducer::new();
    let controller = controller_with(&doc, producer);

    controller.start(GenerationRequest::new("")).await;
    tx.send(Ok("w".repeat(400))).unwrap();
    tokio::time::sleep(FRAME * 2).await;
    let shown = doc.text().len();
    assert!(shown > 0 && shown < 400, "shown {shown} chars");

    controller.cancel().await;
    tokio::time::sleep(FRAME * 30).await;

    assert_eq!(doc.text().len(), shown);
    assert_eq!(controller.render_queue().pending_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn stray_cancel_is_ignored() {
    let doc = Arc::new(MemoryDocument::new());
    let controller = controller_with(&doc, Arc::new(ScriptedProducer::new(["done"])));

    assert_eq!(controller.cancel().await, Transition::Ignored);
    assert_eq!(controller.status(), GenerationStatus::Idle);

    controller.start(GenerationRequest::new("")).await;
    wait_terminal(&controller).await;
    assert_eq!(controller.cancel().await, Transition::Ignored);
    assert_eq!(controller.status(), GenerationStatus::Success);
    assert_eq!(controller.history().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn restart_after_cancel_runs_a_fresh_session() {
    let doc = Arc::new(MemoryDocument::new());
    let producer =
        Arc::new(ScriptedProducer::new(["abc"]).with_delay(Duration::from_millis(100)));
    let controller = controller_with(&doc, producer.clone());

    controller.start(GenerationRequest::new("first")).await;
    controller.cancel().await;
    assert_eq!(
        controller.start(GenerationRequest::new("second")).await,
        Transition::Applied
    );

    let session = wait_terminal(&controller).await;
    controller.render_queue().wait_idle().await;

    assert_eq!(session.status, GenerationStatus::Success);
    assert_eq!(session.request.unwrap().base_text, "second");
    assert_eq!(doc.text(), "abc");
    assert_eq!(producer.calls(), 2);
    assert_eq!(
        statuses(&controller).await,
        vec![
            GenerationStatus::Idle,
            GenerationStatus::Generating,
            GenerationStatus::Cancelled,
            GenerationStatus::Generating,
            GenerationStatus::Success
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reset_returns_finished_sessions_to_idle() {
    let doc = Arc::new(MemoryDocument::new());
    let producer = Arc::new(ScriptedProducer::new(Vec::<String>::new()).failing_with("boom"));
    let controller = controller_with(&doc, producer);

    assert_eq!(controller.reset().await, Transition::Ignored);

    controller.start(GenerationRequest::new("")).await;
    wait_terminal(&controller).await;
    assert_eq!(controller.reset().await, Transition::Applied);

    let session = controller.session();
    assert_eq!(session, GenerationSession::idle());
    assert_eq!(controller.error_message(), None);
}

#[tokio::test(start_paused = true)]
async fn clear_document_is_refused_while_generating() {
    let doc = Arc::new(MemoryDocument::with_text("draft"));
    let producer =
        Arc::new(ScriptedProducer::new([" more"]).with_delay(Duration::from_millis(50)));
    let controller = controller_with(&doc, producer);

    controller.start_from_document(None).await;
    assert_eq!(controller.clear_document().await, Transition::Ignored);

    wait_terminal(&controller).await;
    controller.render_queue().wait_idle().await;
    assert_eq!(doc.text(), "draft more");
    assert!(controller.can_undo());

    assert_eq!(controller.clear_document().await, Transition::Applied);
    assert_eq!(doc.text(), "");
    assert!(doc.undo());
    assert_eq!(doc.text(), "draft more");
    assert!(controller.can_redo());
}

#[tokio::test(start_paused = true)]
async fn subscribers_observe_each_transition() {
    let doc = Arc::new(MemoryDocument::new());
    let (producer, tx) = ChannelProducer::new();
    let controller = controller_with(&doc, producer);
    let mut updates = controller.subscribe();

    controller.start(GenerationRequest::new("")).await;
    assert!(updates.has_changed().unwrap());
    assert_eq!(
        updates.borrow_and_update().status,
        GenerationStatus::Generating
    );

    tx.send(Err(ProducerError::Remote("model not found".to_string())))
        .unwrap();
    updates.changed().await.unwrap();
    let session = updates.borrow_and_update().clone();
    assert_eq!(session.status, GenerationStatus::Error);
    assert_eq!(session.error_message.as_deref(), Some("model not found"));
    assert!(session.finished_at >= session.started_at);
}

#[tokio::test(start_paused = true)]
async fn fragment_in_flight_during_cancel_is_discarded() {
    let doc = Arc::new(MemoryDocument::new());
    let producer = Arc::new(CancelMidYieldProducer::default());
    let controller = controller_with(&doc, producer.clone());
    *producer.controller.lock().unwrap() = Some(controller.clone());

    controller.start(GenerationRequest::new("")).await;
    let session = wait_terminal(&controller).await;
    tokio::time::sleep(FRAME * 30).await;

    assert_eq!(session.status, GenerationStatus::Cancelled);
    assert_eq!(controller.status(), GenerationStatus::Cancelled);
    let text = doc.text();
    assert!(!text.contains('1'), "in-flight fragment rendered: {text:?}");
    assert!(!text.contains('2'), "fragment after cancel rendered: {text:?}");
    assert_eq!(controller.render_queue().pending_len().await, 0);
    assert!(!controller.render_queue().is_draining());
    assert_eq!(
        statuses(&controller).await,
        vec![
            GenerationStatus::Idle,
            GenerationStatus::Generating,
            GenerationStatus::Cancelled
        ]
    );
}
