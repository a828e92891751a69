use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chatstream_core::{
    config::Config,
    messages::Snapshot,
    model::MessageInput,
    session::{ChatSession, SubmitOutcome},
    transport::ReplayTransport,
};
use clap::{Parser, Subcommand};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Parser)]
#[command(author, version, about = "chatstream CLI: stream chat completions to the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the reply (Ctrl-C aborts)
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, help = "Model name; overrides the config file [default: gpt-4o-mini]")]
        model: Option<String>,
        #[arg(long, help = "JSON or TOML config file")]
        config: Option<PathBuf>,
        #[arg(long, help = "Optional system prompt")]
        system: Option<String>,
    },
    /// Feed a recorded event-stream capture through a session
    Replay {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, default_value_t = 64)]
        chunk_size: usize,
        #[arg(short, long, default_value = "replay")]
        message: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Print whatever the assistant tail gained since the last call.
fn print_new_text(list: &Snapshot, printed: &mut usize) {
    let Some(tail) = list.last() else {
        return;
    };
    if tail.role == "user" || tail.role == "system" {
        return;
    }
    if let Some(fresh) = tail.content.get(*printed..)
        && !fresh.is_empty()
    {
        print!("{fresh}");
        io::stdout().flush().ok();
        *printed = tail.content.len();
    }
}

/// `--model` wins over the config file; without a file the default model is used.
fn resolve_config(path: Option<PathBuf>, model: Option<String>) -> anyhow::Result<Config> {
    let cfg = match path {
        Some(path) => {
            let mut cfg = Config::from_path(path)?;
            if let Some(model) = model {
                cfg.model = model;
                cfg.validate()?;
            }
            cfg
        }
        None => Config::for_model(model.unwrap_or_else(|| DEFAULT_MODEL.into())),
    };
    Ok(cfg)
}

/// Stream one turn to stdout. The first completion of `interrupt` aborts the request.
async fn stream_turn<F: Future>(
    session: &ChatSession,
    input: Vec<MessageInput>,
    interrupt: F,
) -> anyhow::Result<SubmitOutcome> {
    let mut rx = session.subscribe();
    // Skip the list as it was before this turn.
    let _ = rx.try_recv();
    let submit = session.submit(Some(input));
    tokio::pin!(submit, interrupt);

    let mut printed = 0usize;
    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            res = &mut submit => break res,
            Some(list) = rx.recv() => print_new_text(&list, &mut printed),
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                if session.abort() {
                    eprintln!("\n[aborted]");
                }
            }
        }
    };
    while let Ok(list) = rx.try_recv() {
        print_new_text(&list, &mut printed);
    }
    print_new_text(&session.messages(), &mut printed);
    println!();

    if let Some(tail) = session.messages().last() {
        eprintln!("[{}]", tail.meta.response_time);
    }
    Ok(outcome?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            message,
            model,
            config,
            system,
        } => {
            let cfg = resolve_config(config, model)?;
            let session = match cfg.api_key() {
                Ok(_) => ChatSession::from_config(&cfg)?,
                Err(e) => {
                    tracing::warn!(error = %e, "no API key, replaying a canned answer");
                    let transport = ReplayTransport::canned(
                        "No API key is configured, so this answer was replayed locally.",
                    );
                    ChatSession::builder(Arc::new(transport), cfg.model.clone())
                        .params(cfg.params.clone())
                        .build()
                }
            };

            let mut input = Vec::new();
            if let Some(system) = system {
                input.push(MessageInput::system(system));
            }
            input.push(MessageInput::user(message));
            let outcome = stream_turn(&session, input, tokio::signal::ctrl_c()).await?;
            tracing::debug!(?outcome, "turn finished");
        }
        Commands::Replay {
            file,
            chunk_size,
            message,
        } => {
            let body = tokio::fs::read(&file).await?;
            let session =
                ChatSession::builder(Arc::new(ReplayTransport::new(body, chunk_size)), "replay")
                    .build();
            session.submit(Some(vec![MessageInput::user(message)])).await?;
            if let Some(tail) = session.messages().last() {
                println!("{}", serde_json::to_string_pretty(tail)?);
            }
        }
    }

    Ok(())
}
