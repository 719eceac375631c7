// ollamawrite: continue a text file with a local model, typed out live

use anyhow::Context;
use clap::{ArgAction, Parser};
use ollamawrite::logging::init_logging;
use ollamawrite::{
    Config, DocumentSink, GenerationController, GenerationRequest, GenerationStatus,
    OllamaProducer,
};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Parser)]
#[command(name = "ollamawrite", version, about = "Continue a text with a local Ollama model")]
struct Cli {
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to generate with (overrides config).
    #[arg(long)]
    model: Option<String>,

    /// Ollama host root, e.g. http://localhost:11434 (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Extra instruction for the continuation.
    #[arg(short, long)]
    instruction: Option<String>,

    /// List the server's models and exit.
    #[arg(long)]
    list_models: bool,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Text to continue. Reads stdin when omitted.
    file: Option<PathBuf>,
}

/// Document backed by the terminal: inserted text is written to stdout.
#[derive(Default)]
struct TerminalDocument {
    text: Mutex<String>,
}

impl DocumentSink for TerminalDocument {
    fn insert_text_at_cursor(&self, text: &str) {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn scroll_cursor_into_view(&self) {}

    // Output only ever appends, so the cursor is always at the end.
    fn move_cursor_to_end(&self) {}

    fn can_undo(&self) -> bool {
        false
    }

    fn can_redo(&self) -> bool {
        false
    }

    fn clear(&self) {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn text(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    }
    .with_env_overrides();
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(host) = &cli.host {
        config.ollama_host = host.clone();
    }
    Ok(config)
}

fn read_base_text(file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    init_logging(cli.verbose)?;
    let config = load_config(&cli)?;
    let producer = Arc::new(OllamaProducer::new(&config));

    if cli.list_models {
        for model in producer.fetch_models().await? {
            println!("{model}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    tracing::info!(model = producer.model(), host = config.host_root(), "continuing text");
    let base_text = read_base_text(cli.file.as_ref())?;
    print!("{base_text}");
    std::io::stdout().flush()?;

    let document = Arc::new(TerminalDocument::default());
    let controller =
        GenerationController::new(document.clone(), producer, config.frame_interval());
    let mut request = GenerationRequest::new(base_text);
    if let Some(instruction) = cli.instruction {
        request = request.with_instruction(instruction);
    }

    let mut updates = controller.subscribe();
    controller.start(request).await;

    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.cancel().await;
            }
            changed = updates.changed() => {
                changed?;
            }
        }
        let status = updates.borrow_and_update().status;
        if status.is_terminal() {
            break status;
        }
    };

    controller.render_queue().wait_idle().await;
    println!();

    Ok(match status {
        GenerationStatus::Success => ExitCode::SUCCESS,
        GenerationStatus::Cancelled => ExitCode::from(130),
        _ => {
            let message = controller.error_message().unwrap_or_default();
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    })
}

// application entry point
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
