//! Batch command implementation for Quill CLI.
//!
//! Evaluates a document's cells headlessly and writes the result to a
//! separate file, or back over the original with `--in-place` once
//! every cell evaluated cleanly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quill_core::{
    CellKind, CellStatus, EvalConfig, EvalReport, Orchestrator, ProcessPool, SpecRegistry,
};

use crate::colors;

pub struct BatchArgs {
    pub document: String,
    pub kind: String,
    pub output: Option<String>,
    pub in_place: bool,
    pub reinit: bool,
    pub echo: bool,
    pub timeout: u64,
    pub stop_on_error: bool,
}

/// Evaluate every cell of the requested kind and write the result.
pub fn execute(args: &BatchArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    let kind = match CellKind::from_token(&args.kind) {
        Some(kind) if kind.is_evaluable() => kind,
        Some(kind) => anyhow::bail!("{} cells cannot be evaluated", kind),
        None => anyhow::bail!("unknown cell kind: {}", args.kind),
    };

    let text = std::fs::read_to_string(&args.document)?;
    let pool = Arc::new(ProcessPool::new(SpecRegistry::builtin()));
    let orchestrator = Orchestrator::new(
        pool,
        EvalConfig {
            eval_timeout: Duration::from_secs(args.timeout),
            stop_on_error: args.stop_on_error,
        },
    );

    let (updated, report) =
        orchestrator.evaluate_batch(&args.document, &text, kind, args.reinit, args.echo)?;

    if report.cells.is_empty() {
        println!(
            "{}No {} cells found in {}.{}",
            colors::YELLOW,
            kind,
            args.document,
            colors::RESET
        );
        return Ok(());
    }

    print_report(&report);

    let destination = if args.in_place {
        if !report.all_done() {
            anyhow::bail!(
                "refusing to overwrite {}: not every cell evaluated cleanly",
                args.document
            );
        }
        PathBuf::from(&args.document)
    } else {
        args.output
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("{}.eval", args.document)))
    };
    std::fs::write(&destination, updated)?;

    let done = report
        .cells
        .iter()
        .filter(|c| c.status == CellStatus::Done)
        .count();
    println!("\n{}", "─".repeat(50));
    println!(
        "{}Completed{} {}/{} cells in {:.2}s, wrote {}",
        colors::GREEN,
        colors::RESET,
        done,
        report.cells.len(),
        start.elapsed().as_secs_f64(),
        destination.display()
    );

    if !report.all_done() {
        anyhow::bail!("some cells did not evaluate cleanly");
    }
    Ok(())
}

fn print_report(report: &EvalReport) {
    println!("{}Cells:{}", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    for cell in &report.cells {
        let color = match cell.status {
            CellStatus::Done => colors::GREEN,
            CellStatus::Error | CellStatus::TimedOut => colors::RED,
            CellStatus::Skipped => colors::YELLOW,
        };
        match &cell.note {
            Some(note) => println!(
                "  cell {:>3} [{}]  {}{}{}  {}",
                cell.cell,
                cell.language,
                color,
                cell.status,
                colors::RESET,
                note
            ),
            None => println!(
                "  cell {:>3} [{}]  {}{}{}",
                cell.cell,
                cell.language,
                color,
                cell.status,
                colors::RESET
            ),
        }
    }
}
