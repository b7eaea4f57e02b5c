//! PieceStore CLI - Operator Command Line Interface
//!
//! This binary opens a store directory and drives it through the public
//! storage API: filling objects with pieces, reading them back, inspecting
//! and evicting content, and running the capacity daemon for a while.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use piecestore_common::{CHUNK_SIZE, InfoHash, PieceInfo, StoreConfig, SyncMode};
use piecestore_storage::PieceStore;
use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "piecestore-cli")]
#[command(about = "PieceStore operator CLI")]
#[command(version)]
struct Args {
    /// Store directory
    #[arg(short, long, env = "PIECESTORE_DIR", default_value = "./piecestore-data")]
    dir: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capacity threshold in bytes
    #[arg(long)]
    threshold: Option<u64>,

    /// Commit durability: relaxed or full
    #[arg(long, value_parser = parse_sync_mode)]
    sync_mode: Option<SyncMode>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write random pieces to an object
    Fill {
        /// Object info hash (hex); random if omitted
        #[arg(long)]
        info_hash: Option<String>,
        /// Number of pieces to write
        #[arg(long, default_value_t = 16)]
        pieces: u32,
        /// Piece length in bytes
        #[arg(long, default_value_t = 262_144)]
        piece_length: u64,
    },
    /// Show how much of a piece is stored
    Read {
        /// Object info hash (hex)
        info_hash: String,
        /// Piece index
        #[arg(long)]
        index: u32,
        /// Piece length in bytes
        #[arg(long, default_value_t = 262_144)]
        piece_length: u64,
    },
    /// Print store statistics
    Stats,
    /// Run one capacity pass, or evict a fixed amount
    Evict {
        /// Nominal bytes to evict regardless of the threshold
        #[arg(long)]
        bytes: Option<u64>,
    },
    /// Remove an object and its sequence records
    Drop {
        /// Object info hash (hex)
        info_hash: String,
    },
    /// Keep the store open with the capacity daemon running
    Watch {
        /// How long to run
        #[arg(long, default_value_t = 60)]
        secs: u64,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default)]
    format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn parse_sync_mode(s: &str) -> Result<SyncMode, String> {
    match s {
        "relaxed" => Ok(SyncMode::Relaxed),
        "full" => Ok(SyncMode::Full),
        other => Err(format!("unknown sync mode '{other}' (expected relaxed or full)")),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Merge CLI args over the file's store section (CLI takes precedence)
fn store_config(args: &Args, mut config: StoreConfig) -> StoreConfig {
    if let Some(threshold) = args.threshold {
        config.capacity.threshold_bytes = threshold;
    }
    if let Some(sync_mode) = args.sync_mode {
        config.sync_mode = sync_mode;
    }
    // One-shot commands run passes explicitly
    if !matches!(args.command, Commands::Watch { .. }) {
        config.capacity.enabled = false;
    }
    config
}

/// Level and format from the flags, falling back to the `[logging]` section
fn logging_options(args: &Args, logging: &LoggingConfig) -> (String, LogFormat) {
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| logging.level.clone());
    (level, args.log_format.unwrap_or(logging.format))
}

fn init_logging(level: String, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn parse_info_hash(s: &str) -> Result<InfoHash> {
    s.parse().with_context(|| format!("invalid info hash '{s}'"))
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let (log_level, log_format) = logging_options(&args, &config.logging);
    init_logging(log_level, log_format);

    let store_config = store_config(&args, config.store);
    let store = PieceStore::open(&args.dir, store_config)
        .with_context(|| format!("failed to open store in {}", args.dir.display()))?;

    match args.command {
        Commands::Fill {
            info_hash,
            pieces,
            piece_length,
        } => {
            let info_hash = match info_hash {
                Some(s) => parse_info_hash(&s)?,
                None => InfoHash::new(rand::random()),
            };
            fill(&store, info_hash, pieces, piece_length)?;
        }
        Commands::Read {
            info_hash,
            index,
            piece_length,
        } => {
            let info = PieceInfo::new(index, piece_length)?;
            let piece = store.open_object(parse_info_hash(&info_hash)?).piece(info);
            let len = usize::try_from(piece_length).context("piece length too large")?;
            match piece.read_at(0, len)? {
                Some(data) => {
                    println!("Piece {index}: {} of {piece_length} bytes stored", data.len());
                    println!("Complete: {}", piece.is_complete()?);
                }
                None => println!("Piece {index}: not stored"),
            }
        }
        Commands::Stats => print_stats(&store)?,
        Commands::Evict { bytes } => {
            let report = match bytes {
                Some(bytes) => Some(store.evict(bytes)?),
                None => store.enforce_capacity()?,
            };
            match report {
                Some(report) => {
                    println!("Evicted chunks:  {}", report.evicted_chunks);
                    println!("Reclaimed bytes: {} (nominal)", report.reclaimed_bytes);
                    println!("Pieces removed:  {}", report.sequence_records_removed);
                }
                None => println!(
                    "Content within threshold of {} bytes, nothing evicted",
                    store.config().capacity.threshold_bytes
                ),
            }
        }
        Commands::Drop { info_hash } => {
            let info_hash = parse_info_hash(&info_hash)?;
            let removed = store.open_object(info_hash).remove()?;
            println!("Removed {removed} chunks of {info_hash}");
        }
        Commands::Watch { secs } => watch(&store, Duration::from_secs(secs))?,
    }

    store.close().context("failed to close store")?;
    Ok(())
}

/// Write `pieces` pieces of random bytes, one chunk-sized block per write
fn fill(store: &PieceStore, info_hash: InfoHash, pieces: u32, piece_length: u64) -> Result<()> {
    let object = store.open_object(info_hash);
    let mut rng = rand::thread_rng();
    let mut block = vec![0u8; CHUNK_SIZE];

    for index in 0..pieces {
        let piece = object.piece(PieceInfo::new(index, piece_length)?);
        let mut offset = 0;
        while offset < piece_length {
            let len = usize::try_from(piece_length - offset)
                .unwrap_or(CHUNK_SIZE)
                .min(CHUNK_SIZE);
            rng.fill(&mut block[..len]);
            piece
                .write_at(offset, &block[..len])
                .with_context(|| format!("failed to write piece {index} at offset {offset}"))?;
            offset += len as u64;
        }
    }

    info!("Filled {} pieces of {} bytes", pieces, piece_length);
    println!("Object: {info_hash}");
    println!("Pieces: {pieces} x {piece_length} bytes");
    Ok(())
}

fn print_stats(store: &PieceStore) -> Result<()> {
    let stats = store.stats()?;
    let records = store.sequence_records()?;

    println!("Store: {}", store.path().display());
    println!("=====");
    println!("Content entries:  {}", stats.content_entries);
    println!("Content bytes:    {}", stats.content_bytes);
    println!(
        "Threshold bytes:  {}",
        store.config().capacity.threshold_bytes
    );
    println!("Sequence records: {}", stats.sequence_records);
    if let (Some(oldest), Some(newest)) = (records.first(), records.last()) {
        println!(
            "Oldest piece:     {} #{} (seq {})",
            oldest.piece.info_hash(),
            oldest.piece.piece_index(),
            oldest.key
        );
        println!(
            "Newest piece:     {} #{} (seq {})",
            newest.piece.info_hash(),
            newest.piece.piece_index(),
            newest.key
        );
    }
    Ok(())
}

fn watch(store: &PieceStore, duration: Duration) -> Result<()> {
    let interval = store.config().capacity.check_interval();
    let start = Instant::now();
    while start.elapsed() < duration {
        std::thread::sleep(interval.min(duration.saturating_sub(start.elapsed())));
        let stats = store.stats()?;
        info!(
            "entries={} bytes={} records={}",
            stats.content_entries, stats.content_bytes, stats.sequence_records
        );
    }

    if let Some(daemon) = store.daemon_stats() {
        println!("Capacity passes:  {}", daemon.passes.load(Ordering::Relaxed));
        println!("Evictions:        {}", daemon.evictions.load(Ordering::Relaxed));
        println!("Failed passes:    {}", daemon.failed_passes.load(Ordering::Relaxed));
        println!("Evicted chunks:   {}", daemon.evicted_chunks.load(Ordering::Relaxed));
        println!("Reclaimed bytes:  {}", daemon.reclaimed_bytes.load(Ordering::Relaxed));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["piecestore-cli"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_parse_sync_mode() {
        assert_eq!(parse_sync_mode("full").unwrap(), SyncMode::Full);
        assert_eq!(parse_sync_mode("relaxed").unwrap(), SyncMode::Relaxed);
        assert!(parse_sync_mode("always").is_err());
    }

    #[test]
    fn test_config_file_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piecestore.toml");
        std::fs::write(
            &path,
            r#"
[store]
sync_mode = "full"

[store.capacity]
threshold_bytes = 1000000
check_interval_secs = 2

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.store.sync_mode, SyncMode::Full);
        assert_eq!(config.store.capacity.threshold_bytes, 1_000_000);
        assert_eq!(config.store.capacity.check_interval_secs, 2);
        assert_eq!(config.store.file_name, "piecestore.redb");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("absent.toml").as_path())).is_err());
        assert!(load_config(None).is_ok());
    }

    #[test]
    fn test_cli_flags_override_file() {
        let args = args(&["--threshold", "42", "--sync-mode", "full", "watch"]);
        let config = store_config(&args, StoreConfig::with_threshold(7));
        assert_eq!(config.capacity.threshold_bytes, 42);
        assert_eq!(config.sync_mode, SyncMode::Full);
        assert!(config.capacity.enabled);
    }

    #[test]
    fn test_log_flags_override_file() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Json,
        };

        let (level, format) = logging_options(&args(&["--log-level", "info", "stats"]), &logging);
        assert_eq!(level, "info");
        assert_eq!(format, LogFormat::Json);

        let (level, format) =
            logging_options(&args(&["--log-format", "text", "stats"]), &logging);
        assert_eq!(level, "debug");
        assert_eq!(format, LogFormat::Text);

        let (level, _) = logging_options(&args(&["stats"]), &LoggingConfig::default());
        assert_eq!(level, "info");
    }

    #[test]
    fn test_one_shot_commands_disable_daemon() {
        let config = store_config(&args(&["stats"]), StoreConfig::default());
        assert!(!config.capacity.enabled);
        assert_eq!(config.capacity.threshold_bytes, 5_000_000_000);
    }

    #[test]
    fn test_fill_then_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.capacity.enabled = false;
        let store = PieceStore::open(dir.path(), config).unwrap();
        let info_hash = InfoHash::new([3; 20]);

        fill(&store, info_hash, 2, CHUNK_SIZE as u64 + 100).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.content_entries, 4);
        assert_eq!(stats.sequence_records, 2);

        let piece = store
            .open_object(info_hash)
            .piece(PieceInfo::new(1, CHUNK_SIZE as u64 + 100).unwrap());
        assert!(piece.is_complete().unwrap());

        assert_eq!(store.open_object(info_hash).remove().unwrap(), 4);
        assert_eq!(store.stats().unwrap().sequence_records, 0);
    }
}
