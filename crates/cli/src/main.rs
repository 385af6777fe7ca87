mod config;
mod error;

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use runtime::{DrainReport, EVER_ID_KEY, HttpTransport, OPT_OUT_KEY, Tracked, Tracker};
use storage::{DeadLetter, DurableQueue, EventKind, SqliteStore};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "beacon.toml";
const QUEUE_FILE: &str = "queue.db";

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Durable event tracking from the command line", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track an event and try to deliver the backlog
    Track {
        /// Event name
        name: String,
        #[arg(short, long, value_enum, default_value = "page")]
        kind: Kind,
        /// Parameter as key=value; repeatable, order is kept
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Deliver everything pending
    Flush,
    /// Show queue counts and tracking state
    Status,
    /// List events that will never be delivered
    DeadLetters {
        /// Show only the last N entries
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Remove all entries after listing them
        #[arg(long)]
        clear: bool,
    },
    /// Turn tracking off or back on
    OptOut {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Page,
    Action,
    Custom,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Track { name, kind, params } => cmd_track(config, name, kind, params).await,
        Commands::Flush => cmd_flush(config).await,
        Commands::Status => cmd_status(&config),
        Commands::DeadLetters { limit, clear } => cmd_dead_letters(&config, limit, clear),
        Commands::OptOut { state } => cmd_opt_out(config, state).await,
    }
}

async fn cmd_track(
    config: Config,
    name: String,
    kind: Kind,
    params: Vec<(String, String)>,
) -> Result<()> {
    let kind = match kind {
        Kind::Page => EventKind::page(name),
        Kind::Action => EventKind::action(name),
        Kind::Custom => EventKind::custom(name),
    };

    let tracker = start_tracker(config)?;
    match tracker.track(kind, params)? {
        Tracked::Queued { id, evicted } => {
            println!("Queued {id}");
            if evicted > 0 {
                println!("Queue full: dropped {evicted} oldest events");
            }
        }
        Tracked::Rejected { limit } => println!("Queue full ({limit} events), event dropped"),
        Tracked::OptedOut => println!("Tracking is off, event dropped"),
    }

    let report = tracker.shutdown().await?;
    print_report(&report);
    Ok(())
}

async fn cmd_flush(config: Config) -> Result<()> {
    let tracker = start_tracker(config)?;
    let report = tracker.shutdown().await?;
    print_report(&report);
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let path = queue_path();
    let queue = open_queue(config)?;
    let stats = queue.stats()?;

    println!("Queue:        {}", path.display());
    println!("Endpoint:     {}", config.tracker.endpoint);
    println!(
        "Ever id:      {}",
        queue.get_state(EVER_ID_KEY)?.unwrap_or_else(|| "-".into())
    );
    let opted_out = queue.get_state(OPT_OUT_KEY)?.as_deref() == Some("true");
    println!("Tracking:     {}", if opted_out { "off" } else { "on" });
    println!();
    println!("Pending:      {}", stats.pending);
    println!("In flight:    {}", stats.in_flight);
    println!("Delivered:    {}", stats.delivered);
    println!("Dead letters: {}", stats.dead_letters);
    println!("Capacity:     {}", queue.capacity());
    Ok(())
}

fn cmd_dead_letters(config: &Config, limit: usize, clear: bool) -> Result<()> {
    let mut queue = open_queue(config)?;
    let letters = queue.dead_letters(limit)?;

    if letters.is_empty() {
        println!("No dead letters.");
    } else {
        println!(
            "{:<36}  {:<16}  {:<9}  {:<4}  REASON",
            "EVENT ID", "FAILED", "KIND", "TRY"
        );
        println!("{}", "-".repeat(100));
        for letter in &letters {
            print_dead_letter(letter);
        }
    }

    if clear {
        let removed = queue.clear_dead_letters()?;
        println!("\nCleared {removed} dead letters.");
    }
    Ok(())
}

async fn cmd_opt_out(config: Config, state: Toggle) -> Result<()> {
    let tracker = start_tracker(config)?;
    let opt_out = matches!(state, Toggle::On);
    tracker.set_opt_out(opt_out)?;
    println!(
        "Tracking is {}",
        if tracker.is_opted_out() { "off" } else { "on" }
    );
    tracker.shutdown().await?;
    Ok(())
}

fn print_dead_letter(letter: &DeadLetter) {
    let failed = Local
        .from_utc_datetime(&letter.failed_at.naive_utc())
        .format("%Y-%m-%d %H:%M");
    let event = &letter.event;
    println!(
        "{:<36}  {:<16}  {:<9}  {:<4}  {}",
        event.id,
        failed,
        event.kind.label(),
        letter.attempts,
        letter.reason
    );
}

fn print_report(report: &DrainReport) {
    if report.remaining == 0 {
        println!("Delivered {} events, queue empty", report.delivered);
    } else {
        println!(
            "Delivered {} events, {} still queued",
            report.delivered, report.remaining
        );
    }
}

fn start_tracker(config: Config) -> Result<Tracker> {
    let path = queue_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let transport = HttpTransport::from_config(&config.tracker)?;
    let tracker = Tracker::builder(config.tracker)
        .policy(config.policy)
        .store(SqliteStore::open(&path)?)
        .on_notice(|notice| tracing::info!(%notice, "delivery"))
        .start(transport)?;
    Ok(tracker)
}

fn open_queue(config: &Config) -> Result<DurableQueue> {
    let path = queue_path();
    if !path.exists() {
        return Err(Error::QueueNotFound { path });
    }
    let store = SqliteStore::open(&path)?;
    Ok(DurableQueue::open(
        Box::new(store),
        config.tracker.max_queue_entries,
        config.tracker.overflow,
    )?)
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        Ok(Config::default())
    }
}

fn queue_path() -> PathBuf {
    dirs_data_dir()
        .unwrap_or_else(|| ".beacon".into())
        .join(QUEUE_FILE)
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/beacon"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("beacon"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("beacon"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_param_splits_on_first_equals() {
        assert_eq!(
            parse_param("cg1=a=b").unwrap(),
            ("cg1".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_param("k=").unwrap(), ("k".to_string(), String::new()));
        assert!(parse_param("novalue").is_err());
    }

    #[test]
    fn cli_parses_track_command() {
        let cli = Cli::try_parse_from([
            "beacon", "track", "checkout", "--kind", "action", "-p", "ck1=blue", "-p", "is=shoes",
        ])
        .unwrap();
        match cli.command {
            Commands::Track { name, kind, params } => {
                assert_eq!(name, "checkout");
                assert!(matches!(kind, Kind::Action));
                assert_eq!(params.len(), 2);
                assert_eq!(params[1], ("is".to_string(), "shoes".to_string()));
            }
            _ => panic!("expected track"),
        }
    }
}
