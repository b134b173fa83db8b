//! xcarc CLI
//!
//! Thin driver over the pipeline library: all retry and diagnostic logic
//! lives in the library crates, this binary only parses arguments, loads
//! config and maps outcomes to exit codes.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use xcarc::config::DEFAULT_CONFIG_PATH;
use xcarc::{report, Archiver, Exporter, Invocation, PipelineConfig};
use xcarc_portal::{PortalAuth, PortalClient, ProcessPortalRunner};

#[derive(Parser)]
#[command(name = "xcarc")]
#[command(about = "Xcode archive/export pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the archive command, recovering once from an invalid package cache
    Archive {
        /// Path to config file (default: .xcarc/pipeline.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Override the Swift package cache path from config
        #[arg(long)]
        swift_packages_cache: Option<PathBuf>,

        /// The xcodebuild command to run (after --)
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Run the export command, locating IDEDistribution logs on failure
    Export {
        /// Path to config file (default: .xcarc/pipeline.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// The xcodebuild command to run (after --)
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Extract error records from a saved build log
    Diagnose {
        /// Output records as JSON
        #[arg(long)]
        json: bool,

        logfile: PathBuf,
    },

    /// Run one Developer Portal operation through the retrying bridge.
    /// Credentials come from XCARC_PORTAL_USERNAME, XCARC_PORTAL_PASSWORD,
    /// XCARC_PORTAL_SESSION and XCARC_PORTAL_TEAM_ID.
    Portal {
        /// Pre-provisioned portal client runtime directory
        #[arg(long)]
        runtime_dir: PathBuf,

        /// Portal operation name (e.g. list_profiles)
        subcommand: String,

        /// Extra arguments for the portal client (after --)
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Archive {
            config,
            swift_packages_cache,
            cmd,
        } => run_archive(config, swift_packages_cache, cmd),
        Commands::Export { config, cmd } => run_export(config, cmd),
        Commands::Diagnose { json, logfile } => run_diagnose(json, logfile),
        Commands::Portal {
            runtime_dir,
            subcommand,
            args,
        } => run_portal(runtime_dir, subcommand, args),
    };

    process::exit(code);
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig, i32> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    PipelineConfig::load(&path).map_err(|e| {
        eprintln!("[config] {}", e);
        2
    })
}

fn parse_invocation(cmd: Vec<String>) -> Result<Invocation, i32> {
    let mut parts = cmd.into_iter();
    match parts.next() {
        Some(program) => Ok(Invocation::new(program, parts.collect())),
        None => {
            eprintln!("[config] empty command line");
            Err(2)
        }
    }
}

fn run_archive(
    config: Option<PathBuf>,
    cache_override: Option<PathBuf>,
    cmd: Vec<String>,
) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let invocation = match parse_invocation(cmd) {
        Ok(i) => i,
        Err(code) => return code,
    };

    let cache = cache_override.or_else(|| config.swift_packages_cache.clone());
    let archiver = Archiver::new(config.use_xcpretty, cache);

    let run = match archiver.run(&invocation) {
        Ok(run) => run,
        Err(e) => {
            eprintln!("[archive] {}", e);
            return 1;
        }
    };

    match report::describe_failure(&invocation.printable_cmd(), &run.log, &run.outcome) {
        Some(msg) => {
            eprintln!("[archive] {}", msg);
            eprintln!(
                "[archive] last {} log lines:\n{}",
                config.log_tail_lines,
                report::tail(&run.log, config.log_tail_lines)
            );
            1
        }
        None => {
            eprintln!("[archive] archive succeeded");
            0
        }
    }
}

fn run_export(config: Option<PathBuf>, cmd: Vec<String>) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let invocation = match parse_invocation(cmd) {
        Ok(i) => i,
        Err(code) => return code,
    };

    let exporter = Exporter::new(config.use_xcpretty);
    let run = match exporter.run(&invocation) {
        Ok(run) => run,
        Err(e) => {
            eprintln!("[export] {}", e);
            return 1;
        }
    };

    match report::describe_failure(&invocation.printable_cmd(), &run.log, &run.outcome) {
        Some(msg) => {
            eprintln!("[export] {}", msg);
            eprintln!(
                "[export] last {} log lines:\n{}",
                config.log_tail_lines,
                report::tail(&run.log, config.log_tail_lines)
            );
            if let Some(dir) = &run.distribution_logs {
                eprintln!("[export] IDEDistribution logs: {}", dir.display());
                if let Some(critical) = run.critical_log() {
                    eprintln!("[export] IDEDistribution.critical.log:\n{}", critical);
                }
            }
            1
        }
        None => {
            eprintln!("[export] export succeeded");
            0
        }
    }
}

fn run_diagnose(json: bool, logfile: PathBuf) -> i32 {
    let log = match std::fs::read_to_string(&logfile) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("[diagnose] failed to read {}: {}", logfile.display(), e);
            return 2;
        }
    };

    let records = xcarc::extract_errors(&log);
    if json {
        match serde_json::to_string_pretty(&records) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("[diagnose] {}", e);
                return 1;
            }
        }
    } else {
        for record in &records {
            println!("{}", record.message());
        }
    }

    // An empty record set is a valid diagnosis, not a failure.
    0
}

fn run_portal(runtime_dir: PathBuf, subcommand: String, args: Vec<String>) -> i32 {
    let auth = match portal_auth_from_env() {
        Ok(auth) => auth,
        Err(var) => {
            eprintln!("[portal] missing required environment variable {}", var);
            return 2;
        }
    };

    let mut client = PortalClient::new(runtime_dir, auth, ProcessPortalRunner);
    match client.run(&subcommand, &args) {
        Ok(payload) => {
            println!("{}", payload);
            0
        }
        Err(e) => {
            eprintln!("[portal] {}", e);
            1
        }
    }
}

fn portal_auth_from_env() -> Result<PortalAuth, &'static str> {
    let var = |name: &'static str| std::env::var(name).map_err(|_| name);
    Ok(PortalAuth {
        username: var("XCARC_PORTAL_USERNAME")?,
        password: var("XCARC_PORTAL_PASSWORD")?,
        session: var("XCARC_PORTAL_SESSION")?,
        team_id: var("XCARC_PORTAL_TEAM_ID")?,
    })
}
