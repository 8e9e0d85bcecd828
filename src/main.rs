//! Module: Main
//! But: Entry point for the generator and puzzle scanners, and the report reader.
//!
//! *Signed: kryon.kas*

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use coin_hunter::config::{OutputPaths, ScanConfig};
use coin_hunter::derive::{Address, Currency, Secp256k1Deriver};
use coin_hunter::keys::{KeySource, parse_u128, puzzle_range};
use coin_hunter::oracle::{BalanceOracle, KnownBalances, TargetFilter};
use coin_hunter::report;
use coin_hunter::scanner::BatchScanner;
use coin_hunter::sink::ResultSink;
use coin_hunter::status::{CounterStore, Counters, StatusReporter};

// --- Configuration ---

/// Batched ETH/BTC key scanner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Random keys checked against BTC and ETH balances.
    Generator(GeneratorArgs),
    /// Walk a puzzle key range.
    Puzzle(PuzzleArgs),
    /// Print status and found records left in output directories.
    Report(ReportArgs),
}

/// Tunables shared by both scanners. Each one also reads its environment variable.
#[derive(Args, Debug)]
struct Tunables {
    /// Candidates per cycle.
    /// Défaut: 10 (generator), 25 (puzzle).
    #[arg(long, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Unchecked-journal lines held before a write.
    #[arg(long, env = "BUFFER_SIZE", default_value_t = 100)]
    buffer_size: usize,

    /// Address cache capacity.
    #[arg(long, env = "CACHE_SIZE", default_value_t = 5_000)]
    cache_size: usize,

    /// Seconds between status.json writes.
    #[arg(long, env = "STATUS_INTERVAL", default_value_t = 30.0)]
    status_interval: f64,

    /// Oracle requests per second.
    #[arg(long, env = "API_RATE_LIMIT", default_value_t = 4.0)]
    api_rate_limit: f64,

    /// Console progress every N keys (0 = never).
    #[arg(long, env = "PRINT_INTERVAL", default_value_t = 1000)]
    print_interval: u64,

    /// Oracle retries per address before it is journaled as unchecked.
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// First backoff step in seconds, doubled per retry.
    #[arg(long, env = "RETRY_DELAY", default_value_t = 5.0)]
    retry_delay: f64,

    /// Lifetime cap on metered oracle calls; the scan stops once it is spent.
    #[arg(long, env = "MAX_API_CALLS")]
    max_api_calls: Option<u64>,

    /// Where found_funds.log, status.json and the counter file live.
    #[arg(long, env = "OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Funded address table: `<currency> <address> <balance>` per line.
    #[arg(long, env = "BALANCES_FILE")]
    balances_file: Option<PathBuf>,

    /// Number of derivation threads.
    /// Défaut: All logical cores.
    #[arg(short, long)]
    threads: Option<usize>,
}

impl Tunables {
    fn to_config(&self, default_batch: usize) -> ScanConfig {
        ScanConfig {
            batch_size: self.batch_size.unwrap_or(default_batch),
            buffer_size: self.buffer_size,
            cache_size: self.cache_size,
            status_interval: self.status_interval,
            api_rate_limit: self.api_rate_limit,
            print_interval: self.print_interval,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            max_api_calls: self.max_api_calls,
            output_dir: self.output_dir.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct GeneratorArgs {
    #[command(flatten)]
    tunables: Tunables,

    /// Draw BIP-39 mnemonics of this many words (12 or 24) instead of raw keys.
    #[arg(short, long)]
    words: Option<usize>,

    /// Currencies checked per key.
    #[arg(long, value_delimiter = ',', default_value = "btc,eth")]
    currencies: Vec<Currency>,
}

#[derive(Args, Debug)]
struct PuzzleArgs {
    #[command(flatten)]
    tunables: Tunables,

    /// Puzzle number; its range is [2^(n-1), 2^n - 1].
    #[arg(short, long, default_value_t = 71)]
    puzzle: u8,

    /// Range start override (decimal or 0x hex).
    #[arg(long)]
    low: Option<String>,

    /// Range end override, inclusive.
    #[arg(long)]
    high: Option<String>,

    /// Resume the sequential walk from this key.
    #[arg(long)]
    start: Option<String>,

    /// Draw uniformly inside the range instead of walking it.
    #[arg(long, default_value_t = false)]
    random: bool,

    /// Derived address of the puzzle key. Only a match reaches the balance table.
    #[arg(long, env = "TARGET_ADDRESS")]
    target: Option<String>,

    /// Balance recorded for a target match the table does not list.
    /// Défaut: n / 10 BTC for puzzle #n.
    #[arg(long)]
    reward: Option<f64>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Output directories to read.
    #[arg(default_value = ".")]
    dirs: Vec<PathBuf>,

    /// Print private keys of found records.
    #[arg(long, default_value_t = false)]
    show_keys: bool,
}

// --- Exécution ---

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Generator(args) => run_generator(args),
        Command::Puzzle(args) => run_puzzle(args),
        Command::Report(args) => {
            for dir in &args.dirs {
                print!("{}", report::render(dir, args.show_keys));
            }
            Ok(())
        }
    }
}

fn run_generator(args: GeneratorArgs) -> anyhow::Result<()> {
    if args.currencies.is_empty() {
        bail!("at least one currency is required");
    }
    let source = match args.words {
        Some(words) => KeySource::mnemonic(words)?,
        None => KeySource::random(),
    };

    println!("\n{}", "=".repeat(60));
    println!("=== Cryptocurrency Balance Checker (generator) ===");
    println!("{}", "=".repeat(60));
    match args.words {
        Some(words) => println!("Keys: {words}-word BIP-39 mnemonics"),
        None => println!("Keys: uniform 256-bit"),
    }
    let names: Vec<String> = args.currencies.iter().map(Currency::to_string).collect();
    println!("Currencies: {}", names.join(", "));

    let Some(oracle) = load_balances(&args.tunables)? else {
        bail!("the generator needs --balances-file (or BALANCES_FILE)");
    };

    let deriver = Secp256k1Deriver::new(args.currencies);
    scan(&args.tunables, 10, "generator", source, deriver, oracle)
}

fn run_puzzle(args: PuzzleArgs) -> anyhow::Result<()> {
    let (mut low, mut high) = puzzle_range(args.puzzle)?;
    if let Some(value) = &args.low {
        low = parse_u128(value)?;
    }
    if let Some(value) = &args.high {
        high = parse_u128(value)?;
    }
    let start = args.start.as_deref().map(parse_u128).transpose()?;

    let source = if args.random {
        if start.is_some() {
            warn!("--start is ignored with --random");
        }
        KeySource::range_random(low, high)?
    } else {
        KeySource::sequential(low, high, start)?
    };

    println!("\n{}", "=".repeat(60));
    println!("=== BITCOIN PUZZLE #{} HUNTER ===", args.puzzle);
    println!("{}", "=".repeat(60));
    println!("Key Range: {low:#x} - {high:#x}");
    println!("Range Size: {} possible keys", (high - low).saturating_add(1));
    println!("Mode: {}", if args.random { "random in range" } else { "sequential" });

    let deriver = Secp256k1Deriver::new(vec![Currency::Btc]);
    let table = load_balances(&args.tunables)?;
    match (&args.target, table) {
        (Some(target), table) => {
            let target = Address::new(Currency::Btc, target.trim().to_ascii_lowercase());
            let reward = args.reward.unwrap_or(f64::from(args.puzzle) / 10.0);
            println!("Target: {target} (reward {reward:.8} BTC)");
            let oracle = TargetFilter::new(table.unwrap_or_default(), [target], reward);
            scan(&args.tunables, 25, "puzzle", source, deriver, oracle)
        }
        (None, Some(table)) => scan(&args.tunables, 25, "puzzle", source, deriver, table),
        (None, None) => bail!("the puzzle scan needs --target or --balances-file"),
    }
}

fn load_balances(tunables: &Tunables) -> anyhow::Result<Option<KnownBalances>> {
    let Some(path) = &tunables.balances_file else {
        return Ok(None);
    };
    let table = KnownBalances::load(path)?;
    if table.is_empty() {
        warn!("{} holds no funded addresses", path.display());
    }
    Ok(Some(table))
}

/// Shared setup and run loop.
fn scan<O: BalanceOracle>(
    tunables: &Tunables,
    default_batch: usize,
    script: &str,
    source: KeySource,
    deriver: Secp256k1Deriver,
    oracle: O,
) -> anyhow::Result<()> {
    let config = tunables.to_config(default_batch);
    let settings = config.validate()?;

    // Configuration du ThreadPool
    if let Some(threads) = tunables.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to build thread pool")?;
    }

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("cannot create {}", config.output_dir.display()))?;
    let paths = OutputPaths::new(&config.output_dir, script);

    let counter_store = CounterStore::new(paths.counter.clone());
    let total_start = counter_store.load();
    println!("[Info] Total keys already tested: {total_start}");
    println!("Any match will be logged to '{}'", paths.found_log.display());
    println!("Press Ctrl+C to stop gracefully\n");

    let sink = ResultSink::new(paths.found_log, paths.unchecked_log, settings.buffer_size);
    let reporter = StatusReporter::new(paths.status, counter_store, script, settings.status_interval)
        .with_range(source.range());

    let batch_size = settings.batch_size;
    let mut scanner = BatchScanner::new(source, deriver, oracle, sink, reporter, settings);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_sig = shutdown.clone();
    ctrlc::set_handler(move || {
        println!("\n[!] Stopping after the current batch...");
        shutdown_sig.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    info!("scanning with batch size {batch_size} on {} threads", rayon::current_num_threads());
    let started = Instant::now();
    let counters: Counters = scanner.run_forever(batch_size, Counters::resume(total_start), &shutdown);
    let elapsed = started.elapsed();

    let speed = if elapsed.as_secs_f64() > 0.0 {
        counters.session_checked as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    println!("\nFinished!");
    println!(
        "Tested {} keys in {}",
        counters.session_checked,
        humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
    );
    println!("Average speed: {speed:.2} keys/sec");
    println!("Hits: {} (BTC {}, ETH {})", counters.hits(), counters.btc_hits, counters.eth_hits);
    println!("Unchecked: {}", counters.unchecked);
    Ok(())
}
