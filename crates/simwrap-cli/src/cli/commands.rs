use super::CliError;
use simwrap_core::manifest::{RunManifest, StudyManifest, SweepManifest, key_values_to_json};
use simwrap_core::runs::ExecutionConfig;
use simwrap_core::{Dialect, KeyValues, Value};
use std::path::PathBuf;

/// Value token that keeps a block-dialect line unchanged.
const KEEP_TOKEN: &str = "keep";

#[derive(clap::Args)]
pub(super) struct PatchArgs {
    /// Input file to edit in place
    file: PathBuf,

    /// Input dialect: block, commented, or line
    #[arg(long, default_value = "block")]
    dialect: String,

    /// Keyword to replace
    #[arg(long)]
    keyword: String,

    /// Replacement value; repeat for a value block ('keep' leaves a
    /// block line unchanged)
    #[arg(long = "value", required = true)]
    values: Vec<String>,
}

#[derive(clap::Args)]
pub(super) struct SweepArgs {
    /// Sweep manifest path
    #[arg(long)]
    manifest: PathBuf,

    /// Emit a machine-readable JSON listing instead of plain names
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
pub(super) struct RunArgs {
    /// Run manifest path
    #[arg(long)]
    manifest: PathBuf,

    /// Log the constructed command instead of spawning it
    #[arg(long)]
    dry_run: bool,

    /// Return as soon as the run is launched instead of waiting
    #[arg(long)]
    no_block: bool,
}

#[derive(clap::Args)]
pub(super) struct StudyArgs {
    /// Study manifest path
    #[arg(long)]
    manifest: PathBuf,

    /// Override the manifest's local concurrency bound
    #[arg(long)]
    max_processes: Option<usize>,
}

pub(super) fn run_patch_command(args: PatchArgs) -> Result<i32, CliError> {
    let dialect = Dialect::from_name(&args.dialect).ok_or_else(|| {
        CliError::Usage(format!(
            "Unknown dialect '{}'; expected block, commented, or line.",
            args.dialect
        ))
    })?;
    let values = parse_values(&args.values);
    let outcome = dialect.replace(&args.file, &args.keyword, &values)?;
    println!(
        "{}: '{}' {:?}",
        args.file.display(),
        args.keyword,
        outcome
    );
    Ok(0)
}

/// A single token is a scalar; several tokens form a value block, with the
/// keep token holding a line in place.
fn parse_values(tokens: &[String]) -> KeyValues {
    if tokens.len() == 1 && tokens[0] != KEEP_TOKEN {
        return KeyValues::Scalar(Value::coerce(&tokens[0]));
    }
    KeyValues::List(
        tokens
            .iter()
            .map(|token| {
                if token == KEEP_TOKEN {
                    None
                } else {
                    Some(Value::coerce(token))
                }
            })
            .collect(),
    )
}

pub(super) fn run_sweep_command(args: SweepArgs) -> Result<i32, CliError> {
    let manifest = SweepManifest::load(&args.manifest)?;
    let sweep = manifest.expand()?;
    let names = sweep.run_names(&manifest.separator);

    if args.json {
        let listing: Vec<serde_json::Value> = names
            .iter()
            .zip(sweep.points())
            .map(|(name, point)| {
                let changes: serde_json::Map<String, serde_json::Value> = point
                    .iter()
                    .map(|(keyword, values)| (keyword.to_string(), key_values_to_json(values)))
                    .collect();
                serde_json::json!({ "name": name, "changes": changes })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&listing)
                .map_err(|error| CliError::Internal(error.into()))?
        );
    } else {
        for (name, point) in names.iter().zip(sweep.points()) {
            let summary: Vec<String> = point
                .iter()
                .map(|(keyword, values)| format!("{keyword}={}", key_values_to_json(values)))
                .collect();
            println!("{name}: {}", summary.join(", "));
        }
    }
    Ok(0)
}

pub(super) fn run_run_command(args: RunArgs) -> Result<i32, CliError> {
    let mut manifest = RunManifest::load(&args.manifest)?;
    if args.dry_run {
        manifest.dry_run = true;
    }
    let mut run = manifest.build()?;
    let config = if args.no_block {
        ExecutionConfig::background()
    } else {
        ExecutionConfig::default()
    };

    run.setup()?;
    run.execute(&config)?;
    if config.blocking {
        run.finish()?;
    }
    println!("{}: {}", run.run_dir().display(), run.state());
    Ok(0)
}

pub(super) fn run_study_command(args: StudyArgs) -> Result<i32, CliError> {
    let mut manifest = StudyManifest::load(&args.manifest)?;
    if let Some(max_processes) = args.max_processes {
        manifest.max_processes = max_processes;
    }
    let study = manifest.build()?;
    let report = study.run();

    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "sequence {}: {}/{} runs completed",
                outcome.index, outcome.completed, outcome.total
            ),
            Some(error) => println!(
                "sequence {}: stopped after {}/{} runs: {error}",
                outcome.index, outcome.completed, outcome.total
            ),
        }
    }
    if report.all_succeeded() { Ok(0) } else { Ok(4) }
}
