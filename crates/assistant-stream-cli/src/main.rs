//! Command-line front end: starts a run or follows an ingestion task and
//! prints snapshots as they change.

use std::sync::Arc;

use anyhow::{Context as _, bail};
use assistant_stream::observability::init_observability;
use assistant_stream::prelude::*;
use assistant_stream::{
    HttpTitleGenerator, StreamController, StreamOperation, StreamSnapshot, TitleGenerator,
    spawn_title_on_completion,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "assistant-stream", about = "Follow assistant run and ingestion streams")]
struct Cli {
    /// Overrides ASSISTANT_API_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a run; without --message the thread is resumed.
    Run {
        #[arg(long)]
        assistant_id: String,
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        user_id: Option<String>,
        /// Human message to send; repeat for several.
        #[arg(long = "message", short = 'm')]
        messages: Vec<String>,
        /// Print the final state as JSON instead of the live transcript.
        #[arg(long)]
        json: bool,
        /// Ask the API to title the thread once the run completes.
        #[arg(long)]
        title: bool,
    },
    /// Follow a file ingestion task.
    Ingest {
        #[arg(long)]
        task_id: String,
    },
}

fn load_config(api_url: Option<String>) -> anyhow::Result<ClientConfig> {
    let _ = dotenvy::dotenv();
    ClientConfig::from_lookup(|key| match key {
        "ASSISTANT_API_URL" => api_url.clone().or_else(|| std::env::var(key).ok()),
        _ => std::env::var(key).ok(),
    })
    .context("loading client configuration")
}

/// Calls `render` on every change until the stream ends, then once more with
/// the final snapshot; Ctrl-C stops it. Renderers must tolerate seeing the
/// same snapshot twice.
async fn watch_stream<O, F>(controller: &StreamController<O>, mut render: F) -> Option<O::State>
where
    O: StreamOperation,
    F: FnMut(&O::State),
{
    let mut updates = controller.subscribe();
    if let Some(state) = updates.current() {
        render(&state);
    }
    loop {
        if !controller.is_active() {
            break;
        }
        tokio::select! {
            changed = updates.changed() => {
                if !changed {
                    break;
                }
                if let Some(state) = updates.current() {
                    render(&state);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; stopping stream");
                controller.stop();
                break;
            }
        }
    }
    // the stream may end between the last render and the activity check
    let final_state = controller.read();
    if let Some(state) = &final_state {
        render(state);
    }
    final_state
}

/// Lines for transcript entries not printed yet. Completed entries are
/// returned once; the trailing one is held back while it may still grow.
fn transcript_lines(state: &StreamState, printed: &mut usize) -> Vec<String> {
    let settled = if state.status.is_terminal() {
        state.messages.len()
    } else {
        state.messages.len().saturating_sub(1)
    };
    let mut lines = Vec::new();
    for message in state.messages.iter().take(settled).skip(*printed) {
        lines.push(format!("[{}] {}", message.kind, message.text()));
        for call in message.tool_calls() {
            lines.push(format!(
                "    -> {}({})",
                call.name,
                call.args.query.as_deref().unwrap_or_default()
            ));
        }
    }
    *printed = (*printed).max(settled);
    lines
}

fn finish<S: StreamSnapshot>(state: Option<&S>, error: Option<&str>) -> anyhow::Result<()> {
    match state.map(|s| s.status()) {
        Some(StreamStatus::Done) => Ok(()),
        Some(StreamStatus::Error) => bail!("stream failed: {}", error.unwrap_or("unknown error")),
        Some(StreamStatus::Inflight) => bail!("stream stopped before completion"),
        None => bail!("stream never started"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.api_url)?;
    init_observability();

    match cli.command {
        Command::Run {
            assistant_id,
            thread_id,
            user_id,
            messages,
            json,
            title,
        } => {
            let controller = RunStreamController::from_config(&config)?;
            let input = if messages.is_empty() {
                RunInput::Resume
            } else {
                RunInput::Messages(messages.into_iter().map(Message::human_input).collect())
            };
            let mut request = RunRequest::new(input, thread_id, assistant_id);
            request.user_id = user_id;
            controller.start(request);
            let title_task = if title {
                let generator: Arc<dyn TitleGenerator> =
                    Arc::new(HttpTitleGenerator::new(config.clone())?);
                Some(spawn_title_on_completion(controller.subscribe(), generator))
            } else {
                None
            };

            let mut printed = 0;
            let final_state = watch_stream(&controller, |state: &StreamState| {
                if !json {
                    for line in transcript_lines(state, &mut printed) {
                        println!("{line}");
                    }
                }
            })
            .await;
            if json && let Some(state) = &final_state {
                println!("{}", serde_json::to_string_pretty(state)?);
            }
            if let Some(run_id) = final_state.as_ref().and_then(|s| s.run_id.as_deref()) {
                tracing::info!(run_id, "run finished");
            }
            if let Some(task) = title_task
                && matches!(task.await, Ok(true))
            {
                tracing::info!("thread title requested");
            }
            finish(
                final_state.as_ref(),
                final_state.as_ref().and_then(|s| s.error.as_deref()),
            )
        }
        Command::Ingest { task_id } => {
            let controller = IngestionProgressController::from_config(&config)?;
            controller.follow(task_id);
            let mut last = None;
            let final_state = watch_stream(&controller, |state: &IngestionProgressState| {
                if state.progress != last {
                    if let Some(progress) = &state.progress {
                        println!("{progress}");
                    }
                    last = state.progress.clone();
                }
            })
            .await;
            finish(
                final_state.as_ref(),
                final_state.as_ref().and_then(|s| s.error.as_deref()),
            )
        }
    }
}
