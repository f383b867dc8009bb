use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use service_ppt::backend::{self, BackendKind};
use service_ppt::compiler::loader::load_service;
use service_ppt::config::{AppConfig, BackendChoice, ErrorPolicy};
use service_ppt::runtime::engine::{AbortHandle, Engine, Prepared};
use service_ppt::runtime::monitor::LogMonitor;
use service_ppt::runtime::variables::VariableTable;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a service definition file
    Run {
        /// Path to the .sdf file
        file: PathBuf,

        /// Start at this command index, e.g. after fixing a failed step.
        /// The last OpenFile before it is run again first; edits made by
        /// the commands in between are not replayed.
        #[arg(long, default_value_t = 0)]
        from: usize,

        /// auto, pptx, com or applescript
        #[arg(long)]
        backend: Option<BackendChoice>,

        #[arg(long)]
        bible_dir: Option<PathBuf>,

        #[arg(long)]
        lyrics_dir: Option<PathBuf>,

        /// Stop at the first command error instead of continuing
        #[arg(long)]
        stop_on_error: bool,

        /// Acknowledge popup messages without waiting for input
        #[arg(long, short)]
        yes: bool,

        /// Initial string variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Decode and validate a service definition without running it
    Check {
        file: PathBuf,
    },

    /// Show which presentation backends are usable here
    Backends,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Backends => {
            let report = backend::probe().await;
            for kind in [BackendKind::Pptx, BackendKind::Com, BackendKind::AppleScript] {
                let status = if report.is_available(kind) { "available" } else { "unavailable" };
                println!("{:<12} {}", kind, status);
            }
        }

        Commands::Check { file } => {
            let service = load_service(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            // Validation does not touch a backend; the built-in one is enough.
            let offline = backend::ProbeReport {
                pptx: true,
                ..backend::ProbeReport::none()
            };
            config.backend = BackendChoice::Pptx;
            let engine = Engine::from_config(&config, &offline)?;

            let mut invalid = 0;
            for prepared in engine.prepare(&service) {
                let status = match &prepared.prepared {
                    Prepared::Ready(_) => "ok".to_string(),
                    Prepared::Disabled => "disabled".to_string(),
                    Prepared::Invalid(e) => {
                        invalid += 1;
                        format!("invalid: {}", e)
                    }
                };
                println!("#{:<3} {:<40} {}", prepared.step.index, prepared.step.label(), status);
            }
            if invalid > 0 {
                bail!("{} invalid command(s) in {}", invalid, file.display());
            }
        }

        Commands::Run {
            file,
            from,
            backend: choice,
            bible_dir,
            lyrics_dir,
            stop_on_error,
            yes,
            vars,
        } => {
            if let Some(choice) = choice {
                config.backend = choice;
            }
            if bible_dir.is_some() {
                config.bible_dir = bible_dir;
            }
            if lyrics_dir.is_some() {
                config.lyrics_dir = lyrics_dir;
            }
            if stop_on_error {
                config.error_policy = ErrorPolicy::Stop;
            }

            let service = load_service(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            info!(file = %file.display(), commands = service.len(), enabled = service.enabled_count(), "loaded service definition");

            let report = backend::probe().await;
            let monitor = if yes { LogMonitor::unattended() } else { LogMonitor::new() };
            let mut variables = VariableTable::new();
            for (key, value) in &vars {
                variables.set_string(key, value);
            }
            let mut engine = Engine::from_config(&config, &report)?
                .with_monitor(Arc::new(monitor))
                .with_variables(variables);

            let abort = AbortHandle::new();
            let on_signal = abort.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping after the current command");
                    on_signal.abort();
                }
            });

            let mut ctx = engine.new_context();
            let result = match engine.reopen_before(&mut ctx, &service, from).await {
                Ok(_) => engine.run_from(&mut ctx, &service, from, &abort).await,
                Err(e) => Err(e),
            };
            if let Err(e) = ctx.close_presentation().await {
                error!(error = %e, "failed to release presentation");
            }

            let report = result?;
            for err in &report.errors {
                warn!(index = err.index, command = %err.command, error = %err.source, "command reported an error");
            }
            println!(
                "{} commands executed, {} skipped, {} errors",
                report.executed.len(),
                report.skipped.len(),
                report.errors.len()
            );
        }
    }

    Ok(())
}
