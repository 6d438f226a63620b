//! isotask - CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use isotask::logger::{self, LogLevel};
use isotask::{
    for_int_array_func, reduce_int_array_func, ConcurrentArray, Context, ContextConfig, Range, VERSION,
};

/// Work-stealing parallel loops over isolated worker contexts
#[derive(Parser, Debug)]
#[command(name = "isotask")]
#[command(version = VERSION)]
#[command(about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print pool size, manifest and scheduler statistics
    Info,

    /// Sum the integers in [begin, end) with parallel_reduce
    Sum {
        #[arg(long, default_value_t = 1)]
        begin: i64,

        #[arg(long, default_value_t = 101)]
        end: i64,

        #[arg(long, default_value_t = 10)]
        grain: i64,
    },

    /// Fill an array with i*i using parallel_for
    Squares {
        /// Number of elements
        #[arg(long, default_value_t = 16)]
        count: i64,

        #[arg(long, default_value_t = 4)]
        grain: i64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    logger::init_with_level(if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    });

    let config = match &args.config {
        Some(path) => ContextConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ContextConfig::from_env().context("Failed to read environment overrides")?,
    };
    let context = Context::new(config).context("Failed to start worker pool")?;

    match args.command {
        Commands::Info => info(&context),
        Commands::Sum { begin, end, grain } => sum(&context, begin, end, grain),
        Commands::Squares { count, grain } => squares(&context, count, grain),
    }
}

fn info(context: &Context) -> Result<()> {
    let manifest = context.manifest();
    println!("isotask {}", VERSION);
    println!("workers:  {}", context.pool_size());
    println!("lib:      {:?}", manifest.lib());
    println!("modules:  {:?}", manifest.modules());
    println!("requires: {:?}", manifest.requires());
    println!(
        "stats:    {}",
        serde_json::to_string(&context.stats()).context("Failed to encode stats")?
    );
    Ok(())
}

fn sum(
    context: &Context,
    begin: i64,
    end: i64,
    grain: i64,
) -> Result<()> {
    let range = Range::new(begin, end, grain)?;
    let body = reduce_int_array_func(
        Arc::new(ConcurrentArray::new()),
        |_, leaf: Range| Ok(leaf.indices().sum::<i64>()),
        |left: i64, right: Option<i64>| Ok(left + right.unwrap_or(0)),
    );
    let total = context
        .parallel_reduce(range, &body)
        .with_context(|| format!("Failed to sum {}", range))?;
    println!("{}", total);
    Ok(())
}

fn squares(
    context: &Context,
    count: i64,
    grain: i64,
) -> Result<()> {
    let range = Range::new(0, count, grain)?;
    let array = Arc::new(ConcurrentArray::with_len(usize::try_from(count)?));
    let body = for_int_array_func(Arc::clone(&array), |leaf, array| {
        for i in leaf.indices() {
            array.set(usize::try_from(i)?, i * i)?;
        }
        Ok(())
    });
    context
        .parallel_for(range, &body)
        .with_context(|| format!("Failed to fill {}", range))?;
    println!("{}", serde_json::to_string(&array.snapshot())?);
    Ok(())
}
