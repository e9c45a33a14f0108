//! Recon CLI
//!
//! Entry point for the `recon` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use recon_overlay::config::{ConfigError, ConfigOrigin, EffectiveConfig, DEFAULT_CONFIG_FILE};
use recon_overlay::pipeline::{ArtifactStatus, Pipeline, RunError, RunResult};
use recon_overlay::{ConfigValue, TreePath};
use recon_tree::ConfigMap;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "recon")]
#[command(about = "Development-mode overlay for templated container deployments", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve patches and write the artifacts that changed
    Render {
        #[command(flatten)]
        run: RunArgs,

        /// Output directory (overrides output_dir)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Report what would be written without writing
        #[arg(long)]
        dry_run: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show which fragment last wrote each value
    Explain {
        #[command(flatten)]
        run: RunArgs,

        /// Only show values under this path
        #[arg(long)]
        path: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List registered fragments in resolution order
    Fragments {
        #[command(flatten)]
        run: RunArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration and where it came from
    Config {
        #[command(flatten)]
        run: RunArgs,

        /// Print only the value at this dotted path
        #[arg(long)]
        get: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to project config file
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Set a variable (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Leave a patch source out of this run (repeatable)
    #[arg(long = "disable", value_name = "SOURCE")]
    disabled: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Render {
            run,
            output,
            dry_run,
            json,
        } => run_render(run, output, dry_run, json),
        Commands::Explain { run, path, json } => run_explain(run, path, json),
        Commands::Fragments { run, json } => run_fragments(run, json),
        Commands::Config { run, get, json } => run_config(run, get, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &RunArgs, output: Option<PathBuf>) -> RunResult<EffectiveConfig> {
    let overrides = cli_overrides(&args.vars, output)?;
    let effective = EffectiveConfig::build(Some(args.config.as_path()), Some(overrides))?;
    tracing::debug!(config = %args.config.display(), sources = effective.sources.len(), "loaded configuration");
    Ok(effective)
}

/// Build the pipeline for one invocation
fn load_pipeline(args: &RunArgs, output: Option<PathBuf>) -> RunResult<Pipeline> {
    let effective = load_config(args, output)?;
    let mut pipeline = Pipeline::from_config(&effective.run)?;
    for name in &args.disabled {
        pipeline = pipeline.disable_source(name.clone());
    }
    Ok(pipeline)
}

/// CLI layer of the configuration
fn cli_overrides(vars: &[String], output: Option<PathBuf>) -> RunResult<ConfigValue> {
    let mut layer = ConfigMap::new();

    if !vars.is_empty() {
        let mut variables = ConfigMap::new();
        for pair in vars {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::ValidationError(format!("--var expects KEY=VALUE, got '{}'", pair))
            })?;
            if key.is_empty() {
                return Err(ConfigError::ValidationError(format!("--var has an empty name: '{}'", pair)).into());
            }
            variables.insert(key.to_string(), value.into());
        }
        layer.insert("variables".into(), ConfigValue::Mapping(variables));
    }

    if let Some(output) = output {
        // Relative to where the command runs, not to the config file
        let output = std::env::current_dir()
            .map(|cwd| cwd.join(&output))
            .unwrap_or(output);
        layer.insert("output_dir".into(), output.to_string_lossy().to_string().into());
    }

    Ok(ConfigValue::Mapping(layer))
}

fn print_json<T: Serialize>(value: &T) -> RunResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_render(args: RunArgs, output: Option<PathBuf>, dry_run: bool, json: bool) -> RunResult<()> {
    let pipeline = load_pipeline(&args, output)?;
    let report = pipeline.execute(dry_run)?;

    if json {
        return print_json(&report);
    }

    for artifact in &report.artifacts {
        let label = match artifact.status {
            ArtifactStatus::Written => "wrote",
            ArtifactStatus::Unchanged => "unchanged",
            ArtifactStatus::WouldWrite => "would write",
        };
        println!("{:<12} {}", label, artifact.path);
    }
    println!(
        "{} fragment(s) from {} source(s) applied; {} artifact(s) written",
        report.fragments_applied,
        report.sources.len(),
        report.written()
    );
    Ok(())
}

fn run_explain(args: RunArgs, path: Option<String>, json: bool) -> RunResult<()> {
    let prefix = match path {
        Some(p) => TreePath::parse(&p).map_err(|e| RunError::Config(ConfigError::ValidationError(e.to_string())))?,
        None => TreePath::root(),
    };

    let resolved = load_pipeline(&args, None)?.resolve()?;
    let claims = resolved.claims_under(&prefix);

    if json {
        return print_json(&claims);
    }

    for claim in &claims {
        let value = serde_json::to_string(claim.value)?;
        let origin = claim
            .fragment
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(base)".to_string());
        println!("{} = {}  [{}]", claim.path, value, origin);
    }
    Ok(())
}

fn run_config(args: RunArgs, get: Option<String>, json: bool) -> RunResult<()> {
    let effective = load_config(&args, None)?;

    if let Some(path) = get {
        let value = effective
            .get(&path)
            .ok_or_else(|| ConfigError::ValidationError(format!("no configuration value at '{}'", path)))?;
        return print_json(value);
    }

    if json {
        println!("{}", effective.to_json()?);
        return Ok(());
    }

    for source in &effective.sources {
        let origin = match source.origin {
            ConfigOrigin::Builtin => "builtin",
            ConfigOrigin::Project => "project",
            ConfigOrigin::Cli => "cli",
        };
        let digest = source.digest.as_deref().map(|d| &d[..12.min(d.len())]).unwrap_or("-");
        println!("{:<8} {:<12} {}", origin, digest, source.path.as_deref().unwrap_or("-"));
    }
    println!();
    print_json(&effective.config)
}

#[derive(Serialize)]
struct FragmentRow<'a> {
    id: String,
    priority: i64,
    op: &'a str,
    path: &'a TreePath,
    digest: String,
}

fn run_fragments(args: RunArgs, json: bool) -> RunResult<()> {
    let registry = load_pipeline(&args, None)?.registry()?;

    let rows = registry
        .list_fragments()
        .into_iter()
        .map(|f| -> RunResult<FragmentRow> {
            Ok(FragmentRow {
                id: f.id().to_string(),
                priority: f.priority(),
                op: f.operation().as_str(),
                path: f.target_path(),
                digest: f.digest()?,
            })
        })
        .collect::<RunResult<Vec<_>>>()?;

    if json {
        return print_json(&rows);
    }

    if rows.is_empty() {
        println!("No fragments registered.");
        return Ok(());
    }
    for row in &rows {
        println!("{:>5}  {:<7} {:<30} {}", row.priority, row.op, row.id, row.path);
    }
    Ok(())
}
