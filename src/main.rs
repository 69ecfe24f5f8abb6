use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use lmcp_lib::commands;
use lmcp_lib::core::error::LmcpResult;
use lmcp_lib::core::monitor::{MonitoringSnapshot, DEFAULT_LOG_TAIL};
use lmcp_lib::core::orchestrator::OperationReport;

#[derive(Parser)]
#[command(name = "lmcp")]
#[command(about = "Lazy Minecraft Panel - build and run a Velocity proxy with backend servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace directory (lmcp.yaml is searched from here upwards)
    #[arg(short = 'C', long, global = true, default_value = ".")]
    directory: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create lmcp.yaml, templates/ and servers/
    Init {
        /// Project name; defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Build servers from their templates (all active servers by default)
    Build { servers: Vec<String> },
    /// Build what is missing and start the cluster
    Up,
    /// Stop every container and tear the cluster down
    Down,
    /// One line per server
    Status {
        #[arg(long, default_value_t = 0)]
        tail: usize,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recent output of a server
    Logs {
        server: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_TAIL)]
        tail: usize,
    },
    /// Turn an existing server directory into a template
    Extract {
        dir: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Remove a built server and release its ports
    Remove {
        server: String,
        /// Also delete the world data in state/
        #[arg(long)]
        purge: bool,
    },
    /// Keep a generated config file as-is on rebuild
    Pin { server: String, file: PathBuf },
    /// Let rebuilds regenerate a pinned file again
    Unpin { server: String, file: PathBuf },
    /// Check lmcp.yaml and every template without building
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    lmcp_lib::init_logging(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` means the command ran but something in it failed.
async fn run(cli: Cli) -> LmcpResult<bool> {
    let dir = cli.directory;
    match cli.command {
        Commands::Init { name } => {
            let path = commands::init_workspace(&dir, name.as_deref())?;
            println!("Created {}", path.display());
            Ok(true)
        }
        Commands::Build { servers } => {
            let engine = commands::open_engine(&dir).await?;
            let report = commands::build(&engine, &servers).await?;
            Ok(print_report("built", &report))
        }
        Commands::Up => {
            let engine = commands::open_engine(&dir).await?;
            let report = commands::up(&engine).await?;
            Ok(print_report("started", &report))
        }
        Commands::Down => {
            let engine = commands::open_engine(&dir).await?;
            let report = commands::down(&engine).await?;
            Ok(print_report("stopped", &report))
        }
        Commands::Status { tail, json } => {
            let engine = commands::open_engine(&dir).await?;
            let snapshot = commands::status(&engine, tail).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
            Ok(true)
        }
        Commands::Logs { server, tail } => {
            let engine = commands::open_engine(&dir).await?;
            for line in commands::logs(&engine, &server, tail).await? {
                println!("{}", line);
            }
            Ok(true)
        }
        Commands::Extract { dir: source, out, force } => {
            let outcome = commands::extract(&dir, &source, out, force).await?;
            println!("Wrote {}", outcome.path.display());
            for warning in &outcome.warnings {
                println!("  warning: {}", warning);
            }
            Ok(true)
        }
        Commands::Remove { server, purge } => {
            let engine = commands::open_engine(&dir).await?;
            commands::remove(&engine, &server, purge).await?;
            println!("Removed {}", server);
            Ok(true)
        }
        Commands::Pin { server, file } => {
            let engine = commands::open_engine(&dir).await?;
            commands::pin(&engine, &server, &file).await?;
            println!("Pinned {} for {}", file.display(), server);
            Ok(true)
        }
        Commands::Unpin { server, file } => {
            let engine = commands::open_engine(&dir).await?;
            commands::unpin(&engine, &server, &file).await?;
            println!("Unpinned {} for {}", file.display(), server);
            Ok(true)
        }
        Commands::Validate => {
            let checks = commands::validate(&dir)?;
            let mut ok = true;
            for check in &checks {
                if check.problems.is_empty() {
                    println!("ok    {} ({})", check.server, check.template);
                } else {
                    ok = false;
                    println!("error {} ({})", check.server, check.template);
                    for problem in &check.problems {
                        println!("        {}", problem);
                    }
                }
            }
            Ok(ok)
        }
    }
}

fn print_report(verb: &str, report: &OperationReport) -> bool {
    for server in &report.succeeded {
        println!("{:<8} {}", verb, server);
    }
    for failure in &report.failed {
        println!("{:<8} {}: {}", "failed", failure.server, failure.error);
    }
    report.is_success()
}

fn print_snapshot(snapshot: &MonitoringSnapshot) {
    println!(
        "{:<16} {:<8} {:<10} {:<18} {:>6} {:>7} {:>9}",
        "SERVER", "ROLE", "STATE", "CONTAINER", "PORT", "CPU%", "MEM"
    );
    for server in &snapshot.servers {
        let marker = if server.is_diverged() { "!" } else { "" };
        println!(
            "{:<16} {:<8} {:<10} {:<18} {:>6} {:>7} {:>9}{}",
            server.name,
            server.role.to_string(),
            server.lifecycle.to_string(),
            server.runtime.to_string(),
            server.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            server
                .cpu_percent
                .map(|c| format!("{:.1}", c))
                .unwrap_or_else(|| "-".into()),
            server
                .memory_bytes
                .map(|m| format!("{}M", m / (1024 * 1024)))
                .unwrap_or_else(|| "-".into()),
            marker,
        );
        if let Some(error) = &server.last_error {
            println!("    last error: {}", error);
        }
        for line in &server.log_tail {
            println!("    | {}", line);
        }
    }
    let host = &snapshot.host;
    println!(
        "host: {:.1}% cpu on {} core(s), {} / {} MiB memory",
        host.cpu_percent,
        host.cpu_count,
        host.memory_used_bytes / (1024 * 1024),
        host.memory_total_bytes / (1024 * 1024)
    );
}
