//! PDFPromote CLI - Release step for the documentation site
//!
//! Commands: sources, baseline, compare, publish
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when individual artifacts fail (even if `--allow-partial`
//! published the rest), 1 on any other failure

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use pdfpromote_core::{
    config::PublishConfig,
    descriptors::DescriptorSet,
    diff::{BaselineArtifact, RasterDiffEngine},
    ledger::fetch_baseline,
    logging::{self, LogFormat},
    pipeline::{PipelineError, PublishPipeline},
    raster::ScratchSpace,
    source::SourceLocator,
};

#[derive(Parser)]
#[command(name = "pdfpromote-cli")]
#[command(about = "PDFPromote CLI - Publish compiled documents, keeping unchanged ones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to publishing configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the published site location (URL or directory)
    #[arg(long, global = true)]
    locator: Option<String>,

    /// Override the resources directory artifacts are published into
    #[arg(long, global = true)]
    resources_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the source files to compile, one per line
    Sources,

    /// Fetch and print the published checksum ledger
    Baseline,

    /// Compare two local documents visually
    Compare {
        /// Previously published document
        #[arg(long)]
        old: PathBuf,

        /// Newly built document
        #[arg(long)]
        new: PathBuf,
    },

    /// Decide every artifact and publish the result
    Publish {
        /// Decide and report without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Publish even if some artifacts fail, keeping their published version
        #[arg(long)]
        allow_partial: bool,
    },
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    print_json(&serde_json::json!({ "success": false, "error": message.to_string() }));
    ExitCode::FAILURE
}

fn load_config(cli: &Cli) -> Result<PublishConfig, String> {
    let mut config =
        PublishConfig::load_or_default(cli.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(locator) = &cli.locator {
        config.source.locator = locator.clone();
    }
    if let Some(dir) = &cli.resources_dir {
        config.publish.resources_dir = dir.clone();
    }
    if let Commands::Publish { allow_partial, .. } = &cli.command {
        config.publish.allow_partial |= *allow_partial;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Text };
    logging::init(format, cli.verbose);

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    match &cli.command {
        Commands::Sources => {
            let descriptors = match DescriptorSet::load(&config.compile_list) {
                Ok(d) => d,
                Err(e) => return fail(e),
            };
            for path in descriptors.source_files() {
                println!("{}", path.display());
            }
            ExitCode::SUCCESS
        }

        Commands::Baseline => {
            let source = match config.source.locator().open(config.source.timeout()) {
                Ok(s) => s,
                Err(e) => return fail(e),
            };
            let baseline = fetch_baseline(&*source, &config.source.ledger_name);
            print_json(&serde_json::json!({ "success": true, "baseline": baseline }));
            ExitCode::SUCCESS
        }

        Commands::Compare { old, new } => compare(&config, old, new),

        Commands::Publish { dry_run, .. } => publish(&config, *dry_run),
    }
}

fn compare(config: &PublishConfig, old: &Path, new: &Path) -> ExitCode {
    let (old_bytes, new_bytes) = match (std::fs::read(old), std::fs::read(new)) {
        (Ok(o), Ok(n)) => (o, n),
        (Err(e), _) => return fail(format!("{}: {e}", old.display())),
        (_, Err(e)) => return fail(format!("{}: {e}", new.display())),
    };
    let scratch = match ScratchSpace::new(config.raster.scratch_parent.as_deref()) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let artifact_scratch = match scratch.for_artifact("compare") {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    let engine =
        RasterDiffEngine::with_threshold(config.raster.rasterizer(), config.raster.rmse_threshold);
    let baseline = BaselineArtifact::Available(old_bytes);
    match engine.compare(&baseline, &new_bytes, &artifact_scratch) {
        Ok(verdict) => {
            print_json(&serde_json::json!({ "success": true, "verdict": verdict }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
            ExitCode::from(2)
        }
    }
}

fn publish(config: &PublishConfig, dry_run: bool) -> ExitCode {
    let descriptors = match DescriptorSet::load(&config.compile_list) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };
    let locator: SourceLocator = config.source.locator();
    let source = match locator.open(config.source.timeout()) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let pipeline = PublishPipeline::new(config.clone(), source, config.raster.rasterizer());

    let plan = match pipeline.plan(&descriptors) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };

    if dry_run {
        let decisions: Vec<_> = plan
            .decisions
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "verdict": d.promotion.verdict,
                    "entry": d.promotion.entry,
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "success": plan.is_complete(),
            "run_id": plan.run_id,
            "baseline": plan.baseline_origin,
            "decisions": decisions,
            "failures": plan.failures,
        }));
        return if plan.is_complete() { ExitCode::SUCCESS } else { ExitCode::from(2) };
    }

    match pipeline.commit(plan) {
        Ok(report) => {
            print_json(&serde_json::json!({ "success": true, "report": report }));
            if report.carried_forward.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(PipelineError::ArtifactsFailed(failures)) => {
            print_json(&serde_json::json!({ "success": false, "failures": failures }));
            ExitCode::from(2)
        }
        Err(e) => fail(e),
    }
}
