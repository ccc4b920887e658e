use anyhow::Result;
/// Vigil CLI - run site audit policies from the terminal
///
/// Provides audit and remediate commands on top of vigil_core.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vigil_cli::{build_engine, find, format_response, format_summary, render_json, select, Settings, Summary};

#[derive(Parser)]
#[command(name = "vigil-cli")]
#[command(about = "Vigil - policy audits for remote sites", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to an engine config YAML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Target facts YAML file
    #[arg(short, long, global = true)]
    target: Option<PathBuf>,
    /// Override the remote CLI gateway, e.g. "drush @prod"
    #[arg(short, long, global = true)]
    gateway: Option<String>,
    /// Log debug output and attach error traces to responses
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run audit on policies
    Audit {
        /// Path to policies YAML file
        #[arg(short, long, default_value = "policies.yaml")]
        policies: PathBuf,
        /// Only run policies whose name contains this text
        #[arg(short, long)]
        filter: Option<String>,
        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Audit one policy and remediate it if it fails
    Remediate {
        /// Path to policies YAML file
        #[arg(short, long, default_value = "policies.yaml")]
        policies: PathBuf,
        /// Policy name to remediate
        #[arg(short, long)]
        id: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Audit {
            policies,
            filter,
            json,
        } => {
            let settings = settings(&cli.global, policies);
            let failed = run_audit_cli(&settings, filter.as_deref(), json)?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Remediate { policies, id, yes } => {
            let settings = settings(&cli.global, policies);
            run_remediate_cli(&settings, &id, yes)?;
        }
    }

    Ok(())
}

fn settings(global: &GlobalArgs, policies: PathBuf) -> Settings {
    Settings {
        policies,
        target: global.target.clone(),
        config: global.config.clone(),
        gateway: global.gateway.clone(),
        verbose: global.verbose,
    }
}

/// Returns whether any policy failed or errored.
fn run_audit_cli(settings: &Settings, filter: Option<&str>, json: bool) -> Result<bool> {
    let engine = build_engine(settings)?;
    let policies = select(&engine, filter);

    if !json {
        println!("Running audit on {} policies...", policies.len());
    }

    let responses = engine.audit(&policies);
    let summary = Summary::from_responses(&responses);

    if json {
        println!("{}", render_json(&responses)?);
    } else {
        for response in &responses {
            println!("\n{}", format_response(response));
        }
        println!("\n{}", format_summary(&summary));
        println!("Audit complete.");
    }

    Ok(summary.has_problems())
}

fn run_remediate_cli(settings: &Settings, policy_name: &str, skip_confirm: bool) -> Result<()> {
    let engine = build_engine(settings)?;
    let policy = find(&engine, policy_name)?;

    if !skip_confirm {
        let title = policy.title.as_deref().unwrap_or("Untitled");
        println!("Remediate policy: {} [{}]", title, policy.name);
        println!("Gateway: {}", engine.config().gateway);
        println!("\nProceed? (y/N): ");

        use std::io::{self, BufRead};
        let stdin = io::stdin();
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;

        if !line.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    println!("Running remediation...");
    let response = engine.execute(&policy, true);
    println!("{}", format_response(&response));
    println!("Remediation complete.");

    Ok(())
}
