//! Quill CLI - interpreter controller for notebook documents.

mod attach;
mod batch;
mod colors;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Interpreter controller for notebook documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve an editor over stdin/stdout
    Attach {
        /// Identifier of the document being served
        document: String,

        /// Inactivity timeout for one cell, in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Stop a request at the first interpreter error
        #[arg(long)]
        stop_on_error: bool,
    },

    /// Evaluate a document's cells headlessly
    Batch {
        /// Path to the document
        document: String,

        /// Cell kind to evaluate (init or code)
        #[arg(long, default_value = "code")]
        kind: String,

        /// Output path (defaults to <document>.eval)
        #[arg(short, long)]
        output: Option<String>,

        /// Overwrite the document itself; refused unless every cell
        /// evaluated cleanly
        #[arg(long)]
        in_place: bool,

        /// Start each interpreter fresh
        #[arg(long)]
        reinit: bool,

        /// Keep prompts and echoed input in the written output
        #[arg(long)]
        echo: bool,

        /// Inactivity timeout for one cell, in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Stop at the first interpreter error
        #[arg(long)]
        stop_on_error: bool,
    },

    /// List the configured interpreter languages
    Languages,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stderr so the attach protocol owns stdout.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Attach {
            document,
            timeout,
            stop_on_error,
        } => attach::execute(&document, timeout, stop_on_error)?,

        Commands::Batch {
            document,
            kind,
            output,
            in_place,
            reinit,
            echo,
            timeout,
            stop_on_error,
        } => batch::execute(&batch::BatchArgs {
            document,
            kind,
            output,
            in_place,
            reinit,
            echo,
            timeout,
            stop_on_error,
        })?,

        Commands::Languages => list_languages(),
    }

    Ok(())
}

/// Print every registered language with its interpreter command line.
fn list_languages() {
    let registry = quill_core::SpecRegistry::builtin();
    for language in registry.languages() {
        if let Ok(spec) = registry.get(language) {
            println!(
                "{}{}{}  {} {}",
                colors::BOLD,
                language,
                colors::RESET,
                spec.command,
                spec.args.join(" ")
            );
        }
    }
}
