use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mentat_config::AppConfig;
use mentat_core::{Controller, CoreEvent, OnEvent};

#[derive(Parser, Debug)]
#[command(name = "mentat", about = "Cognitive orchestration core for a personal assistant")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "mentat.toml")]
    config: String,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<String>,

    /// Override the workspace directory.
    #[arg(long)]
    workspace: Option<String>,

    /// Process a single request and exit.
    #[arg(long)]
    once: Option<String>,

    /// Print pipeline events (thoughts, status, progress) while processing.
    #[arg(long)]
    verbose_events: bool,
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));

    if config.telemetry.log_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    } else {
        let appender = tracing_appender::rolling::daily(&config.telemetry.log_dir, "mentat.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    }
}

fn event_sink() -> OnEvent {
    Arc::new(|event: CoreEvent| match event {
        CoreEvent::Thought { summary } => eprintln!("  [thought] {summary}"),
        CoreEvent::Status { status } => eprintln!("  [status] {status}"),
        CoreEvent::Progress { step, total_steps } => eprintln!("  [step {step}/{total_steps}]"),
        CoreEvent::Model { label } => eprintln!("  [model] {label}"),
        CoreEvent::Budget { time_s } => eprintln!("  [budget] {time_s}s"),
        CoreEvent::NexusTask { added, id } => {
            eprintln!("  [nexus] {} {id}", if added { "+" } else { "-" })
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.system.data_dir = data_dir;
    }
    if let Some(workspace) = cli.workspace {
        config.system.workspace_dir = workspace;
    }

    let _log_guard = init_tracing(&config);
    info!(config = %cli.config, "mentat starting");

    let controller = Arc::new(Controller::new(config)?);
    controller.start_missions();
    controller.start_reflector();

    let on_event = cli.verbose_events.then(event_sink);

    if let Some(request) = cli.once {
        let reply = controller.process_request(&request, on_event, &[]).await;
        println!("{reply}");
        controller.shutdown().await;
        return Ok(());
    }

    // Interactive loop: one request per line; /quit exits.
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("mentat ready. Type a request, or /quit to exit.");
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        let reply = controller.process_request(line, on_event.clone(), &[]).await;
        println!("{reply}");
    }

    controller.shutdown().await;
    info!("mentat stopped");
    Ok(())
}
