use clap::Parser;
use std::path::PathBuf;

/// Replay a recorded assistant stream through the presentation engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Recording file to replay
    #[arg(short, long)]
    pub recording: PathBuf,

    /// Settings file (defaults to ~/.config/assistant-turn/settings.json)
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Mode slug, overrides settings and environment
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Approve every tool without asking
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Keep the recorded delay between events
    #[arg(long)]
    pub realtime: bool,

    /// Enable verbose logging (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    pub fn parse() -> Self {
        <Args as Parser>::parse()
    }
}
