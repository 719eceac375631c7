//! Paced, cancellable AI text continuation for live documents.
//!
//! A [`GenerationController`] starts a [`FragmentProducer`], forwards each
//! streamed fragment into a [`RenderQueue`], and the queue drains that text
//! into a [`DocumentSink`] a few characters per frame. Cancelling stops the
//! producer and drops undisplayed text without touching what is already in
//! the document.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ollamawrite::{Config, DocumentSink, GenerationController, MemoryDocument, OllamaProducer};
//!
//! # async fn demo() {
//! let config = Config::default();
//! let doc = Arc::new(MemoryDocument::with_text("It was a dark and stormy night"));
//! let producer = Arc::new(OllamaProducer::new(&config));
//! let controller = GenerationController::new(doc.clone(), producer, config.frame_interval());
//!
//! controller.start_from_document(None).await;
//! let mut updates = controller.subscribe();
//! let _ = updates.wait_for(|s| s.status.is_terminal()).await;
//! controller.render_queue().wait_idle().await;
//! println!("{}", doc.text());
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod logging;
pub mod ollama_api;
pub mod producer;
pub mod render_queue;
pub mod session;

pub use config::Config;
pub use controller::{GenerationController, Transition};
pub use document::{DocumentSink, MemoryDocument};
pub use error::{ConfigError, ProducerError};
pub use ollama_api::OllamaProducer;
pub use producer::{FragmentProducer, FragmentStream, ScriptedProducer};
pub use render_queue::{chunk_size, DrainStep, RenderQueue};
pub use session::{GenerationRequest, GenerationSession, GenerationStatus};
