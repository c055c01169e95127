mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{TargetSpec, EXIT_FAILURE, EXIT_RESOLUTION_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use stratum_core::Engine;
use stratum_host::select_host;
use stratum_plan::Action;

#[derive(Debug, Parser)]
#[command(
    name = "stratum",
    version,
    about = "Idempotent convergence engine for Apache httpd instances on Enterprise Linux"
)]
struct Cli {
    /// Host backend to converge against ("live" or "mock").
    #[arg(long, default_value = "live", global = true, overrides_with = "backend")]
    backend: String,

    /// Directory holding per-instance run locks.
    #[arg(long, global = true)]
    lock_dir: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// What to converge: the managed product, instance, and host facts.
#[derive(Debug, Args)]
struct TargetArgs {
    /// Product version of the managed httpd installation, e.g. 2.4.6.
    #[arg(long, default_value = "2.4")]
    product_version: String,

    /// Instance name; "default" keeps the unsuffixed layout.
    #[arg(long, default_value = "default")]
    instance: String,

    /// Multi-processing module to configure.
    #[arg(long, default_value = "prefork")]
    mpm: String,

    /// Override the detected CPU architecture.
    #[arg(long)]
    arch: Option<String>,

    /// Override the detected platform version.
    #[arg(long)]
    platform_version: Option<String>,

    /// Read host facts from a TOML file instead of detecting them.
    #[arg(long)]
    facts: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PlanAction {
    Create,
    Delete,
}

impl From<PlanAction> for Action {
    fn from(action: PlanAction) -> Self {
        match action {
            PlanAction::Create => Action::Create,
            PlanAction::Delete => Action::Delete,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Converge the host toward a fully realized installation.
    Create {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Converge the host toward the installation being absent.
    Delete {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Resolve the profile and print the resource plan without touching the host.
    Plan {
        /// Top-level action to plan for.
        #[arg(value_enum, default_value = "create")]
        action: PlanAction,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATUM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let host = match select_host(&cli.backend) {
        Ok(host) => host,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let mut engine = Engine::new(host);
    if let Some(dir) = cli.lock_dir {
        engine = engine.with_lock_dir(dir);
    }
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Create { target } => target_spec(&target)
            .and_then(|spec| commands::create::run(&engine, &spec, json_output)),
        Commands::Delete { target } => target_spec(&target)
            .and_then(|spec| commands::delete::run(&engine, &spec, json_output)),
        Commands::Plan { action, target } => target_spec(&target)
            .and_then(|spec| commands::plan::run(&engine, action.into(), &spec, json_output)),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("resolution error:")
                || msg.starts_with("failed to read facts")
                || msg.starts_with("failed to parse facts")
            {
                EXIT_RESOLUTION_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn target_spec(target: &TargetArgs) -> Result<TargetSpec, String> {
    let facts = commands::gather_facts(
        target.facts.as_deref(),
        target.arch.as_deref(),
        target.platform_version.as_deref(),
    )?;
    Ok(TargetSpec {
        facts,
        product_version: target.product_version.clone(),
        instance: target.instance.clone(),
        mpm: target.mpm.clone(),
    })
}
