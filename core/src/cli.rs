use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::Config;
use crate::host::StandardHost;
use crate::interpreter::{compile_with, CompileOptions, CompiledProgram};
use crate::worker::server::serve;
use crate::worker::{spawn_worker, Command, Control, Event, Session, Status};

#[derive(Parser)]
#[command(name = "stepscript")]
#[command(about = "stepscript - line-oriented automation scripts with a steppable interpreter", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory scripts are confined to (overrides config file and env vars)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a script and report every error
    Check {
        /// Script file
        file: PathBuf,

        /// Print the compiled program as JSON
        #[arg(long)]
        dump: bool,
    },

    /// Run a script to completion
    Run {
        /// Script file
        file: PathBuf,
    },

    /// Serve a script to a remote controller over TCP
    Serve {
        /// Script file
        file: PathBuf,

        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let bind = match &cli.command {
        Commands::Serve { bind, .. } => bind.clone(),
        _ => None,
    };

    // Load eagerly so config errors show before any script output
    let config = Config::builder()
        .config_path(cli.config)
        .root(cli.root)
        .bind(bind)
        .build()?;

    match cli.command {
        Commands::Check { file, dump } => {
            let program = compile_file(&file, &config, true)?;
            if dump {
                let json = serde_json::to_string_pretty(&program)
                    .context("Failed to serialize compiled program")?;
                println!("{}", json);
            } else {
                println!(
                    "✓ {}: {} instructions, {} subroutines",
                    file.display(),
                    program.len(),
                    program.subroutines.len()
                );
            }
        }

        Commands::Run { file } => {
            let program = compile_file(&file, &config, false)?;
            let host = StandardHost::new(&config.filesystem.root);
            let mut session = Session::new(program, Box::new(host), &config.interpreter_config())?;

            let mut console = Console::default();
            session.handle(Command::Run, &mut console);
            if let Some(Status::Error(msg)) = console.last_status {
                return Err(anyhow!("{}", msg));
            }
        }

        Commands::Serve { file, .. } => {
            let program = compile_file(&file, &config, false)?;
            let host = StandardHost::new(&config.filesystem.root);
            let session = Session::new(program, Box::new(host), &config.interpreter_config())?;
            info!(session = %session.id(), script = %file.display(), "serving");

            let worker = spawn_worker(session)?;
            let listener = TcpListener::bind(&config.server.bind)
                .await
                .with_context(|| format!("Failed to bind {}", config.server.bind))?;
            serve(listener, worker, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Read and compile a script; `check_all` reports every error, not just the first
fn compile_file(path: &Path, config: &Config, check_all: bool) -> Result<CompiledProgram> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut options = CompileOptions::new(name).with_options(config.option_table());
    if check_all {
        options = options.check_only();
    }

    let report = compile_with(&source, &options);
    if !report.is_ok() {
        for err in &report.errors {
            eprintln!("{}: {}", path.display(), err);
        }
        return Err(anyhow!(
            "{} failed to compile ({} errors)",
            path.display(),
            report.errors.len()
        ));
    }
    Ok(report.program)
}

/// Local control for `run`: nothing to poll, events go to the log
#[derive(Default)]
struct Console {
    last_status: Option<Status>,
}

impl Control for Console {
    fn poll(&mut self) -> Option<Command> {
        None
    }

    fn emit(&mut self, event: Event) {
        match event {
            Event::Status(status) => {
                info!(%status, "status");
                self.last_status = Some(status);
            }
            other => debug!(event = %other, "event"),
        }
    }
}
