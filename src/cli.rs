use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "scenebatch",
    version,
    about = "Execute scene-editing plans through a batched editor endpoint"
)]
pub struct Cli {
    /// Configuration file. Defaults to the per-user scenebatch.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a plan file and print the job result.
    Run {
        plan: PathBuf,
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Show the commands and phases a plan maps to, without executing it.
    Phases { plan: PathBuf },
    /// Execute the undo plan recorded for a job.
    Undo { job_id: String },
    /// List archived jobs, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Check that the scene service answers.
    Ping,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Phases { .. } => "phases",
            Self::Undo { .. } => "undo",
            Self::History { .. } => "history",
            Self::Ping => "ping",
        }
    }
}
