mod cli;

use anyhow::Result;
use assistant_turn::agent::{AgentTask, TaskServices};
use assistant_turn::logging::{setup_logging, setup_logging_to_file};
use assistant_turn::modes::DefaultModeValidator;
use assistant_turn::recording::RecordingSession;
use assistant_turn::settings::{AutoApproval, EngineSettings};
use assistant_turn::tools::impls::dry_run_registry;
use assistant_turn::ui::console::ConsoleUI;
use cli::Args;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.log_file {
        Some(path) => setup_logging_to_file(args.verbose, path)?,
        None => setup_logging(args.verbose, false),
    }

    let mut settings = EngineSettings::load(args.settings.as_deref())?;
    if let Some(mode) = &args.mode {
        settings.mode = mode.clone();
    }
    if args.yes {
        settings.auto_approval = AutoApproval::all();
    }

    let session = RecordingSession::from_file(&args.recording)?;
    let events = session.stream_events()?;
    info!(
        "Replaying {} events recorded at {} in {} mode",
        events.len(),
        session.timestamp,
        settings.mode
    );

    let services = TaskServices {
        ui: Arc::new(ConsoleUI::new(args.yes)),
        registry: Arc::new(dry_run_registry()),
        validator: Arc::new(DefaultModeValidator),
    };
    let task = AgentTask::new("replay", services, settings);

    // Ctrl-C aborts the turn
    let abort = task.abort_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.cancel();
        }
    });

    let turn = task.begin_turn();
    let mut previous_ms = 0;
    for (timestamp_ms, event) in events {
        if args.realtime {
            let delay = timestamp_ms.saturating_sub(previous_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        previous_ms = timestamp_ms;

        turn.handle_event(&event).await?;
        if turn.should_interrupt_stream() {
            debug!("Tool already handled, ignoring the rest of the recording");
            break;
        }
    }
    turn.finish_stream().await?;

    if !turn.is_outbound_ready() {
        warn!("Turn {} did not finish presenting", turn.turn_id());
    }

    println!("{}", serde_json::to_string_pretty(&turn.transcript())?);
    info!(
        "Consecutive mistakes: {}, tool usage: {:?}",
        task.consecutive_mistakes(),
        task.tool_usage()
    );
    Ok(())
}
