// Handles communication with a local Ollama server

use crate::config::Config;
use crate::error::ProducerError;
use crate::producer::{FragmentProducer, FragmentStream};
use crate::session::GenerationRequest;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// One line of the `/api/generate` NDJSON stream.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Streams continuations from Ollama's `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaProducer {
    client: Client,
    host_root: String,
    model: String,
    system_prompt: String,
}

impl OllamaProducer {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "falling back to a default HTTP client without connect timeout");
                Client::new()
            });
        Self {
            client,
            host_root: config.host_root().to_string(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Names of the models the server has pulled.
    pub async fn fetch_models(&self) -> Result<Vec<String>, ProducerError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host_root))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProducerError::Status(response.status()));
        }

        let data: serde_json::Value = response.json().await?;
        let models = data
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let system = match &request.instruction {
            Some(instruction) => format!(
                "{}\nWhile continuing, follow this instruction: {}",
                self.system_prompt, instruction
            ),
            None => self.system_prompt.clone(),
        };
        serde_json::json!({
            "model": self.model,
            "prompt": request.base_text,
            "system": system,
            "stream": true,
        })
    }
}

impl FragmentProducer for OllamaProducer {
    fn stream_continuation(&self, request: &GenerationRequest) -> FragmentStream {
        let pending = self
            .client
            .post(format!("{}/api/generate", self.host_root))
            .json(&self.request_body(request))
            .send();
        let model = self.model.clone();

        let body = async move {
            let response = pending.await?;
            if !response.status().is_success() {
                return Err(ProducerError::Status(response.status()));
            }
            debug!(model = %model, "generate stream opened");
            Ok::<_, ProducerError>(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                    .boxed(),
            )
        };

        stream::once(body)
            .map(|opened| match opened {
                Ok(body) => decode_generate_stream(body),
                Err(err) => stream::iter([Err(err)]).boxed(),
            })
            .flatten()
            .boxed()
    }
}

/// Splits a byte stream into lines, holding back a trailing partial line.
#[derive(Debug, Default)]
struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// What a single stream line contributes.
#[derive(Debug, PartialEq, Eq)]
struct ParsedLine {
    fragment: Option<String>,
    done: bool,
}

fn parse_line(line: &str) -> Result<ParsedLine, ProducerError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ParsedLine {
            fragment: None,
            done: false,
        });
    }
    let chunk: GenerateChunk = serde_json::from_str(line)?;
    if let Some(message) = chunk.error {
        return Err(ProducerError::Remote(message));
    }
    Ok(ParsedLine {
        fragment: (!chunk.response.is_empty()).then_some(chunk.response),
        done: chunk.done,
    })
}

struct DecodeState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: LineDecoder,
    lines: VecDeque<String>,
    body_ended: bool,
    done: bool,
}

fn decode_generate_stream(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> FragmentStream {
    let state = DecodeState {
        body,
        decoder: LineDecoder::default(),
        lines: VecDeque::new(),
        body_ended: false,
        done: false,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if state.done {
                return None;
            }
            while let Some(line) = state.lines.pop_front() {
                match parse_line(&line) {
                    Ok(parsed) => {
                        state.done = parsed.done;
                        if let Some(fragment) = parsed.fragment {
                            return Some((Ok(fragment), Some(state)));
                        }
                        if state.done {
                            return None;
                        }
                    }
                    Err(err) => return Some((Err(err), None)),
                }
            }
            if state.body_ended {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let lines = state.decoder.push(&bytes);
                    state.lines.extend(lines);
                }
                Some(Err(err)) => return Some((Err(err.into()), None)),
                None => {
                    state.body_ended = true;
                    if let Some(rest) = state.decoder.finish() {
                        state.lines.push_back(rest);
                    }
                }
            }
        }
    })
    .boxed()
}
