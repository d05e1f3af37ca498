//! Threadline CLI - interactive chat against one persisted session.
//!
//! ```text
//! main() -> ThreadlineConfig::load() -> open store/provider -> SessionOrchestrator
//!                                                                   |
//!                                                                   v
//!                                         repl::run() (one turn per input line)
//! ```
//!
//! Logs go to `~/.threadline/logs/threadline.log` so they never interleave
//! with the conversation on stdout.

mod repl;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use threadline_engine::{
    ChatError, SessionHistory, SessionId, SessionOrchestrator, SessionStore, StoreBackend,
    ThreadlineConfig, TokenCounter, config_dir, reset_session,
};

#[derive(Debug, Parser)]
#[command(name = "threadline", version, about)]
struct Args {
    /// Config file (defaults to ~/.threadline/config.toml).
    #[arg(long, env = "THREADLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Resume an existing session instead of starting a fresh one.
    #[arg(long)]
    session: Option<String>,

    /// Base prompt for the session; skips the interactive question.
    #[arg(long)]
    base_prompt: Option<String>,

    /// Session store backend: memory, sqlite or redis.
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Wait for the whole reply instead of streaming it.
    #[arg(long)]
    no_stream: bool,

    #[arg(long)]
    temperature: Option<f32>,

    /// Delete the session's base prompt, history and cursor, then exit.
    #[arg(long, requires = "session", conflicts_with = "history")]
    reset: bool,

    /// Print the session's stored history, then exit.
    #[arg(long, requires = "session")]
    history: bool,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file means no logs; stdout belongs to the conversation.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = config_dir() {
        candidates.push(dir.join("logs").join("threadline.log"));
    }
    candidates.push(PathBuf::from(".threadline").join("logs").join("threadline.log"));
    candidates
}

fn print_history(store: &dyn SessionStore, session: &SessionId) -> Result<()> {
    let history = SessionHistory::load(store, session)?;
    let base = store
        .get(&session.keys().base_prompt)
        .map_err(ChatError::from)?;

    if let Some(base) = base {
        println!("# base prompt\n{}", base.trim_end());
    }
    for (index, record) in history.records.iter().enumerate() {
        let marker = if index < history.cursor {
            "evicted"
        } else {
            "active"
        };
        println!("# {index} ({marker})\n{}", record.trim_end());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config =
        ThreadlineConfig::load(args.config.as_deref()).context("failed to load config")?;
    if let Some(backend) = args.store {
        config.store.backend = backend;
    }
    if let Some(temperature) = args.temperature {
        config.app.temperature = temperature;
    }

    let store = config
        .open_store()
        .with_context(|| format!("failed to open {} store", config.store.backend.as_str()))?;
    tracing::info!(backend = store.backend_name(), "Session store ready");

    let session = match args.session.as_deref() {
        Some(raw) => SessionId::new(raw).context("--session must not be empty")?,
        None => SessionId::random(),
    };

    if args.history {
        return print_history(store.as_ref(), &session);
    }
    if args.reset {
        reset_session(store.as_ref(), &session)?;
        println!("Session {session} reset.");
        return Ok(());
    }

    let session_config = config.session_config()?;
    let counter = Arc::new(TokenCounter::new(config.encoding()?));
    let provider = Arc::new(
        config
            .open_provider()
            .context("failed to configure completion provider")?,
    );
    tracing::info!(
        endpoint = provider.endpoint(),
        model = %session_config.model,
        session = %session,
        "Starting session"
    );

    let orchestrator = SessionOrchestrator::new(session_config, store, provider, counter);
    let options = repl::Options {
        session,
        base_prompt: args.base_prompt,
        temperature: config.temperature(),
        stream: !args.no_stream,
    };
    repl::run(&orchestrator, options).await
}
