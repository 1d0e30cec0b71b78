mod app;
mod output;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use wordwise_lib::engine::Command as EngineCommand;
use wordwise_lib::learning::InteractionKind;

#[derive(Parser)]
#[command(name = "wordwise-cli", about = "Wordwise vocabulary engine CLI", version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Command {
    /// Select the words to learn from a page of text
    Select {
        /// Text file ("-" reads stdin)
        file: PathBuf,
        /// Target language (default: configured language)
        #[arg(long)]
        lang: Option<String>,
        /// Maximum number of words
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Record an interaction with a word
    Interact {
        word: String,
        /// hover, pronunciation, context, ignored or clicked
        #[arg(value_parser = parse_kind)]
        kind: InteractionKind,
        #[arg(long)]
        lang: Option<String>,
    },

    /// List words due for review
    Review {
        #[arg(long)]
        lang: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show learning statistics
    Stats {
        #[arg(long)]
        lang: Option<String>,
    },

    /// Show today's usage
    Usage,

    /// Turn the unlimited tier on or off
    Plus { state: Toggle },

    /// Remove words not seen for 90 days
    Cleanup,

    /// Delete all learning data
    Reset,

    /// Run a raw JSON command
    Exec {
        /// Command JSON ("-" reads stdin)
        json: String,
    },
}

fn parse_kind(value: &str) -> Result<InteractionKind, String> {
    InteractionKind::parse(value).ok_or_else(|| format!("unknown interaction '{}'", value))
}

/// Read a file, or stdin for "-"
fn read_input(path: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
    }
}

fn to_engine_command(command: Command) -> anyhow::Result<EngineCommand> {
    let command = match command {
        Command::Select { file, lang, budget } => EngineCommand::SelectWords {
            language: lang,
            candidates: Vec::new(),
            text: Some(read_input(&file.to_string_lossy())?),
            budget,
        },
        Command::Interact { word, kind, lang } => EngineCommand::RecordInteraction {
            word,
            language: lang,
            kind,
        },
        Command::Review { lang, limit } => EngineCommand::ReviewQueue {
            language: lang,
            limit,
        },
        Command::Stats { lang } => EngineCommand::GetStats { language: lang },
        Command::Usage => EngineCommand::GetDailyUsage,
        Command::Plus { state } => EngineCommand::SetPlus {
            is_plus: matches!(state, Toggle::On),
        },
        Command::Cleanup => EngineCommand::CleanupStale,
        Command::Reset => EngineCommand::ResetData,
        Command::Exec { json } => {
            let json = if json == "-" { read_input("-")? } else { json };
            serde_json::from_str(&json).context("Invalid command JSON")?
        }
    };
    Ok(command)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let command = to_engine_command(cli.command)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let ok = runtime.block_on(async {
        let app = app::App::new(cli.config.as_deref(), cli.data_dir)?;
        app.run(command, &cli.format, use_color).await
    })?;

    if !ok {
        bail!("command failed");
    }
    Ok(())
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
