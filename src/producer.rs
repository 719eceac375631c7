// Sources of streamed continuation text

use crate::error::ProducerError;
use crate::session::GenerationRequest;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Ordered, lazy, finite sequence of text fragments.
///
/// An `Err` item is terminal. Dropping the stream abandons the generation.
pub type FragmentStream = BoxStream<'static, Result<String, ProducerError>>;

/// Produces a continuation of `request.base_text`, following
/// `request.instruction` when one is given.
pub trait FragmentProducer: Send + Sync {
    fn stream_continuation(&self, request: &GenerationRequest) -> FragmentStream;
}

/// Replays a fixed list of fragments, optionally ending with a failure.
#[derive(Debug, Default)]
pub struct ScriptedProducer {
    fragments: Vec<String>,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProducer {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Fail with `message` after the scripted fragments.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Wait `delay` before yielding each item.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many streams have been requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FragmentProducer for ScriptedProducer {
    fn stream_continuation(&self, _request: &GenerationRequest) -> FragmentStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        let items: Vec<Result<String, ProducerError>> = self
            .fragments
            .iter()
            .cloned()
            .map(Ok)
            .chain(self.failure.clone().map(|m| Err(ProducerError::failed(m))))
            .collect();

        stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed()
    }
}
