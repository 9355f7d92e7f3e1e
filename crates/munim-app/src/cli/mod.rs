use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};

use crate::cli::validators::{validate_batch_size, validate_ledger_name};

pub mod validators;

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "munim",
    version,
    author,
    about = "GST invoice extraction to CSV and Tally vouchers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            command: None,
            verbose: 0,
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract invoices from a batch of documents and export CSV plus Tally voucher XML.
    Process(ProcessArgs),
    /// Extract a single document and print the parsed record as JSON.
    Extract(ExtractArgs),
    /// Inspect or reset the model failover chain.
    Models(ModelsArgs),
}

/// Run the full extraction pipeline over a set of documents.
#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Invoice documents or directories of documents (png, jpg, jpeg, webp, pdf).
    #[arg(required = true, value_name = "INPUTS")]
    pub inputs: Vec<PathBuf>,
    /// Company name stamped into the Tally export.
    #[arg(long, value_parser = validate_ledger_name)]
    pub company: String,
    /// Fallback party ledger for records without a party name.
    #[arg(long, default_value = "Sundry Debtors", value_parser = validate_ledger_name)]
    pub party: String,
    /// Voucher type, which doubles as the revenue ledger name.
    #[arg(long = "voucher-type", default_value = "Sales", value_parser = validate_ledger_name)]
    pub voucher_type: String,
    /// Documents per model call group (overrides configuration).
    #[arg(long = "batch-size", value_parser = validate_batch_size)]
    pub batch_size: Option<usize>,
    /// Pin extraction to a single model instead of the fallback chain.
    #[arg(long)]
    pub model: Option<String>,
    /// Write the CSV report to this path instead of the default.
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
    /// Write the Tally voucher XML to this path instead of the default.
    #[arg(long, value_name = "FILE")]
    pub xml: Option<PathBuf>,
    /// Directory for default-named exports.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
}

/// Extract one document and print the record as JSON.
#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Invoice document to process (png, jpg, jpeg, webp, pdf).
    #[arg(value_name = "FILE")]
    pub input: PathBuf,
    /// Pin extraction to a single model instead of the fallback chain.
    #[arg(long)]
    pub model: Option<String>,
}

/// Namespace for model failover chain commands.
#[derive(Debug, Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommands,
}

/// Model chain subcommands.
#[derive(Debug, Subcommand)]
pub enum ModelsCommands {
    /// Show candidate availability, failure counts, and the call budget.
    Status(ModelsStatusArgs),
    /// Clear failure counters and restore every candidate.
    Reset,
}

/// Arguments for `models status`.
#[derive(Debug, Args)]
pub struct ModelsStatusArgs {
    /// Output rendering (human-readable text or JSON).
    #[arg(long, value_enum, default_value_t = StatusFormat::Text)]
    pub format: StatusFormat,
}

/// How to render status output.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFormat {
    Text,
    Json,
}
