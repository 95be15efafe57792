// taptape CLI
//
// Cross-platform (macOS, Linux, Windows) command-line interface for TapTape:
// run the recorder against a Bluetooth shutter button (or a simulated one)
// and inspect the delivery queue it leaves behind.

mod config;
mod spool;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use taptape_core::{
    ButtonEvent, DeliveryConfig, DeliveryQueue, GestureEvent, HttpEndpoint, ItemStatus,
    NullTranscriber, QueueStore, RecorderObserver, RecorderService,
};

#[derive(Parser)]
#[command(name = "taptape")]
#[command(about = "TapTape: press a button, keep the recording", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recorder
    Run {
        /// Drive gestures from stdin instead of a Bluetooth button
        #[arg(long)]
        simulate: bool,
        /// Storage directory for the queue and spooled recordings
        #[arg(long)]
        storage: Option<String>,
        /// Upload endpoint (overrides the configured one)
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Show queue counts
    Status,
    /// List queued recordings
    List,
    /// Queue failed recordings for another round of attempts
    Retry,
    /// Remove delivered recordings from the queue
    Clear,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            simulate,
            storage,
            endpoint,
        } => cmd_run(simulate, storage, endpoint).await,
        Commands::Status => cmd_status().await,
        Commands::List => cmd_list().await,
        Commands::Retry => cmd_retry().await,
        Commands::Clear => cmd_clear().await,
        Commands::Config { action } => cmd_config(action).await,
    }
}

async fn cmd_run(simulate: bool, storage: Option<String>, endpoint: Option<String>) -> Result<()> {
    let config = config::Config::load()?;

    let endpoint_url = endpoint.unwrap_or_else(|| config.endpoint.clone());
    if endpoint_url.is_empty() {
        anyhow::bail!(
            "No delivery endpoint configured. Run `taptape config set endpoint <url>` or pass --endpoint."
        );
    }

    let storage_dir = resolve_storage_dir(storage, &config)?;

    println!("{}", "TapTape".bold());
    println!();
    println!("Storage:  {}", storage_dir.display().to_string().bright_cyan());
    println!("Endpoint: {}", endpoint_url.bright_cyan());
    println!();

    let store = QueueStore::open(storage_dir.join("queue.json"))
        .context("Failed to open queue store")?;
    let recovered = store.counts();

    let http = HttpEndpoint::new(&endpoint_url).context("Invalid delivery endpoint")?;
    let delivery = DeliveryConfig {
        max_retries: config.max_retries,
        ..DeliveryConfig::default()
    };
    let queue = DeliveryQueue::new(store, Arc::new(http), delivery)
        .context("Failed to open delivery queue")?;
    queue.start();

    if recovered.pending + recovered.failed > 0 {
        println!(
            "{} Recovered queue: {} pending, {} failed",
            "✓".green(),
            recovered.pending,
            recovered.failed
        );
    }
    println!("{} Delivery queue ready", "✓".green());

    let capture = spool::SpoolCapture::new(storage_dir.join("spool"))?;
    let service = RecorderService::new(
        Arc::clone(&queue),
        Arc::new(capture),
        Arc::new(NullTranscriber),
    );
    service.add_observer(Arc::new(ConsoleObserver { prompt: simulate }));

    if simulate {
        run_simulated(Arc::clone(&service), Arc::clone(&queue)).await?;
    } else {
        run_with_button(Arc::clone(&service), &config).await?;
    }

    let stats = service.stats();
    let counts = queue.status();
    println!();
    println!("{}", "Session summary".bold());
    println!(
        "  Recordings: {} started, {} queued, {} bookmarks",
        stats.recordings_started, stats.recordings_enqueued, stats.bookmarks_marked
    );
    println!(
        "  Queue:      {} pending, {} in flight, {} delivered, {} failed",
        counts.pending, counts.in_flight, counts.completed, counts.failed
    );

    Ok(())
}

async fn run_simulated(service: Arc<RecorderService>, queue: Arc<DeliveryQueue>) -> Result<()> {
    let (event_tx, event_rx) = tokio::sync::mpsc::channel(64);
    let _pipeline = tokio::spawn(Arc::clone(&service).run(event_rx));

    println!("{}", "Simulated button. Commands:".bold());
    println!("  {}       single click (start or stop a recording)", "s".bright_green());
    println!("  {}       double click (drop a bookmark)", "d".bright_green());
    println!("  {}       hold (stop and flag)", "h".bright_green());
    println!("  {}  queue counts", "status".bright_green());
    println!("  {}       quit", "q".bright_green());
    println!();

    let stdin_task = tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        print!("> ");
        let _ = std::io::Write::flush(&mut std::io::stdout());

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();

            if line.is_empty() {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                continue;
            }

            if line == "q" || line == "quit" || line == "exit" {
                println!("Shutting down...");
                break;
            }

            if line == "status" {
                let counts = queue.status();
                println!(
                    "Pending: {}  In flight: {}  Delivered: {}  Failed: {}",
                    counts.pending, counts.in_flight, counts.completed, counts.failed
                );
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                continue;
            }

            let gesture = match line {
                "s" => Some(GestureEvent::SingleClick),
                "d" => Some(GestureEvent::DoubleClick),
                "h" => Some(GestureEvent::Hold),
                _ => None,
            };

            match gesture {
                Some(gesture) => {
                    if event_tx.send(ButtonEvent::Gesture(gesture)).await.is_err() {
                        break;
                    }
                    // ConsoleObserver restores the prompt when the gesture lands.
                }
                None => {
                    println!("Try: s, d, h, status, q");
                    print!("> ");
                    let _ = std::io::Write::flush(&mut std::io::stdout());
                }
            }
        }
    });

    tokio::select! {
        _ = stdin_task => {}
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("Shutting down...");
        }
    }

    Ok(())
}

#[cfg(feature = "btle")]
async fn run_with_button(service: Arc<RecorderService>, config: &config::Config) -> Result<()> {
    use taptape_core::{
        BtleAdapter, ConnectConfig, ConnectionManager, DeviceFilter, GestureTiming,
        UnknownSignalPolicy,
    };

    let adapter = BtleAdapter::new()
        .await
        .context("No Bluetooth adapter available")?;

    let connect = ConnectConfig {
        filter: DeviceFilter {
            marker: config.marker.clone(),
            excluded: config.excluded.clone(),
        },
        ..ConnectConfig::default()
    };

    let (manager, events) = ConnectionManager::spawn(
        Arc::new(adapter),
        connect,
        GestureTiming::default(),
        UnknownSignalPolicy::default(),
    )
    .context("Failed to start the button pipeline")?;

    if !manager.start_scanning().await {
        anyhow::bail!("Bluetooth is unavailable or not permitted");
    }

    println!(
        "{} Scanning for a button named like {:?}",
        "✓".green(),
        config.marker
    );
    println!("Press Ctrl-C to stop.");
    println!();

    let _pipeline = tokio::spawn(service.run(events));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    println!();
    println!("Shutting down...");
    manager.disconnect();

    Ok(())
}

#[cfg(not(feature = "btle"))]
async fn run_with_button(_service: Arc<RecorderService>, _config: &config::Config) -> Result<()> {
    anyhow::bail!(
        "This build has no Bluetooth support. Rebuild with `--features btle`, or run with --simulate."
    )
}

async fn cmd_status() -> Result<()> {
    let config = config::Config::load()?;
    let store = open_store(&config)?;
    let counts = store.counts();

    println!("{}", "TapTape Queue".bold());
    println!();

    println!("Pending:    {}", counts.pending);
    println!("In flight:  {}", counts.in_flight);
    println!("Delivered:  {}", counts.completed);
    if counts.failed > 0 {
        println!("Failed:     {}", counts.failed.to_string().bright_red());
    } else {
        println!("Failed:     {}", counts.failed);
    }
    println!("Total:      {}", counts.total);

    Ok(())
}

async fn cmd_list() -> Result<()> {
    let config = config::Config::load()?;
    let store = open_store(&config)?;
    let items = store.items();

    if items.is_empty() {
        println!("{}", "Queue is empty.".dimmed());
        return Ok(());
    }

    println!("{} ({} total)", "Queued Recordings".bold(), items.len());
    println!();

    for item in items {
        let status = match item.status {
            ItemStatus::Pending => "pending".bright_yellow(),
            ItemStatus::InFlight => "in-flight".bright_cyan(),
            ItemStatus::Completed => "delivered".bright_green(),
            ItemStatus::Failed => "failed".bright_red(),
        };

        let mut notes = Vec::new();
        if item.flagged {
            notes.push("flagged".to_string());
        }
        if !item.bookmarks.is_empty() {
            notes.push(format!("{} bookmarks", item.bookmarks.len()));
        }
        if item.retry_count > 0 {
            notes.push(format!("{} retries", item.retry_count));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("  ({})", notes.join(", "))
        };

        println!(
            "  {} {} {}  {}{}",
            short_id(&item.id).bright_cyan(),
            status,
            format_timestamp(item.created_at).dimmed(),
            item.artifact_path.display(),
            notes,
        );
    }

    Ok(())
}

async fn cmd_retry() -> Result<()> {
    let config = config::Config::load()?;
    let mut store = open_store(&config)?;

    let reset = store.reset_failed();
    if reset == 0 {
        println!("{}", "No failed recordings.".dimmed());
        return Ok(());
    }
    store.persist().context("Failed to save queue")?;

    println!("{} {} recording(s) queued for another attempt", "✓".green(), reset);
    println!("They will be sent the next time the recorder runs.");

    Ok(())
}

async fn cmd_clear() -> Result<()> {
    let config = config::Config::load()?;
    let mut store = open_store(&config)?;

    let removed = store.remove_completed();
    if removed == 0 {
        println!("{}", "Nothing delivered to clear.".dimmed());
        return Ok(());
    }
    store.persist().context("Failed to save queue")?;

    println!("{} {} delivered recording(s) removed", "✓".green(), removed);

    Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::Show => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<14} {}", key.bright_cyan(), value);
            }

            println!();
            println!(
                "Config file: {}",
                config::Config::config_file()?.display().to_string().dimmed()
            );
        }
    }

    Ok(())
}

/// Prints gesture and connectivity feedback; in simulate mode it also
/// restores the prompt the event interrupted.
struct ConsoleObserver {
    prompt: bool,
}

impl ConsoleObserver {
    fn reprompt(&self) {
        if self.prompt {
            print!("> ");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
    }
}

impl RecorderObserver for ConsoleObserver {
    fn on_single_click(&self) {
        println!("\n{} single click", "•".bright_green());
        self.reprompt();
    }

    fn on_double_click(&self) {
        println!("\n{} double click", "•".bright_green());
        self.reprompt();
    }

    fn on_hold(&self) {
        println!("\n{} hold", "•".bright_green());
        self.reprompt();
    }

    fn on_connectivity_changed(&self, connected: bool) {
        if connected {
            println!("\n{} Button connected", "✓".green());
        } else {
            println!("\n{} Button disconnected", "✗".red());
        }
        self.reprompt();
    }
}

/// Resolve the storage directory: the --storage flag wins, then the
/// configured one, then the platform data directory.
fn resolve_storage_dir(flag: Option<String>, config: &config::Config) -> Result<PathBuf> {
    let dir = match flag.or_else(|| config.storage_dir.clone()) {
        Some(dir) => PathBuf::from(dir),
        None => config::Config::data_dir()?,
    };
    std::fs::create_dir_all(&dir).context("Failed to create storage directory")?;
    Ok(dir)
}

fn open_store(config: &config::Config) -> Result<QueueStore> {
    let dir = resolve_storage_dir(None, config)?;
    QueueStore::open(dir.join("queue.json")).context("Failed to open queue store")
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_timestamp(timestamp: u64) -> String {
    use chrono::{DateTime, Local, Utc};

    let dt = DateTime::from_timestamp(timestamp as i64, 0)
        .unwrap_or_else(|| Utc::now());
    let local: DateTime<Local> = dt.into();

    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
