use crate::models::AcquisitionType;
use crate::task::TaskKind;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "freezer",
    about = "Freezer - forensic acquisition of web pages with hashed, reportable evidence",
    version
)]
pub struct Args {
    /// JSON configuration file (defaults apply to every missing field)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging of all operations
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Hide progress bars and use quiet output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Acquire a URL into a new acquisition folder of a case
    Acquire(AcquireArgs),
    /// Check a finished acquisition folder against its manifest
    Verify {
        /// Acquisition folder containing manifest.json
        directory: PathBuf,
    },
    /// List the cases under the cases folder
    Cases,
    /// Print the effective configuration as JSON
    Config,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct AcquireArgs {
    /// Page to acquire
    pub url: String,

    /// Case the acquisition belongs to
    #[arg(long)]
    pub case: String,

    #[arg(long, value_enum, default_value = "web")]
    pub acquisition_type: AcquisitionType,

    #[arg(long)]
    pub lawyer: Option<String>,

    #[arg(long)]
    pub proceeding_type: Option<String>,

    #[arg(long)]
    pub courthouse: Option<String>,

    #[arg(long)]
    pub proceeding_number: Option<String>,

    /// Stop automatically after this many seconds instead of waiting for Enter
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Recordings to run for the whole acquisition
    #[arg(long, value_delimiter = ',', default_values_t = TaskKind::DEFAULT_START.to_vec())]
    pub start_tasks: Vec<TaskKind>,

    /// Probes to run when the acquisition stops
    #[arg(long, value_delimiter = ',', default_values_t = TaskKind::DEFAULT_STOP.to_vec())]
    pub stop_tasks: Vec<TaskKind>,

    /// Skip the screenshot and the saved copy of the page
    #[arg(long)]
    pub no_page_capture: bool,
}
