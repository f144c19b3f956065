//! CLI entrypoint for slabscope.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use slabscope_core::snapshot::parse_address;
use slabscope_core::{AnalysisConfig, CounterLayout, NodeScope};
use slabscope_harness::runner::{self, OutputFormat, RunOptions, SnapshotSource};

/// Partial slab summaries from captured memory images.
#[derive(Debug, Parser)]
#[command(name = "slabscope")]
#[command(about = "Summarize SLUB partial slabs from a frozen memory snapshot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Summarize an ELF core image.
    Summary {
        /// ELF64 core image.
        #[arg(long)]
        core: PathBuf,
        /// JSON symbol and type-layout document for the image.
        #[arg(long)]
        layout: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Summarize a synthetic JSON snapshot.
    Fixture {
        /// Snapshot fixture path.
        #[arg(long)]
        fixture: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

#[derive(Debug, Args)]
struct OutputArgs {
    /// Directory for the report and artifact index.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Report format: `text` (default), `json`, or `both`.
    #[arg(long, default_value = "text")]
    format: String,
    /// Node scope: `first` or `all:<n>`. Defaults to SLABSCOPE_NODE_SCOPE, then `first`.
    #[arg(long)]
    nodes: Option<String>,
    /// Upper bound for page descriptor addresses (decimal or 0x...).
    #[arg(long)]
    max_page_address: Option<String>,
    /// Force the counter layout: `legacy` or `unified`.
    #[arg(long)]
    counter_layout: Option<String>,
    /// Structured JSONL log output path.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Run identifier used in trace ids.
    #[arg(long)]
    run_id: Option<String>,
}

impl OutputArgs {
    fn config(&self) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
        let mut config = AnalysisConfig::from_env();
        if let Some(raw) = &self.nodes {
            let scope = NodeScope::from_str_loose(raw)
                .ok_or_else(|| format!("Unsupported node scope '{raw}', expected first|all:<n>"))?;
            config = config.with_node_scope(scope);
        }
        if let Some(raw) = &self.max_page_address {
            let address =
                parse_address(raw).ok_or_else(|| format!("Invalid address '{raw}'"))?;
            config = config.with_max_page_address(address);
        }
        if let Some(raw) = &self.counter_layout {
            let layout = CounterLayout::from_str_loose(raw)
                .ok_or_else(|| format!("Unsupported counter layout '{raw}', expected legacy|unified"))?;
            config = config.with_counter_layout(layout);
        }
        Ok(config)
    }

    fn options(&self) -> Result<RunOptions, Box<dyn std::error::Error>> {
        let format = OutputFormat::from_str_loose(&self.format).ok_or_else(|| {
            format!("Unsupported format '{}', expected text|json|both", self.format)
        })?;
        let mut options = RunOptions::new(&self.output_dir);
        options.format = format;
        options.log = self.log.clone();
        if let Some(run_id) = &self.run_id {
            options.run_id = run_id.clone();
        }
        Ok(options)
    }
}

fn summarize(source: SnapshotSource, output: &OutputArgs) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Summary of partial slabs will be provided");
    let config = output.config()?;
    let options = output.options()?;
    let run = runner::run_summary(&source, &config, &options)?;

    eprintln!(
        "Summary complete: rows={}, skipped={}, unreadable={}, outcome={:?}",
        run.report.caches.len(),
        run.report.skipped,
        run.report.unreadable.len(),
        run.outcome
    );
    for (cache, anomaly) in run.report.anomalies() {
        eprintln!("  {cache}: {:?} walk stopped: {}", anomaly.source, anomaly.stop.label());
    }
    for path in &run.written {
        eprintln!("Wrote {}", path.display());
    }
    eprintln!("Wrote artifact index to {}", run.artifact_index.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Summary {
            core,
            layout,
            output,
        } => summarize(SnapshotSource::Core { image: core, layout }, &output)?,
        Command::Fixture { fixture, output } => {
            summarize(SnapshotSource::Fixture { path: fixture }, &output)?;
        }
        Command::ValidateLog { log } => {
            let lines = runner::validate_log(&log)?;
            eprintln!("{}: {lines} valid line(s)", log.display());
        }
    }

    Ok(())
}
