//! pagedb - drive a B+ tree index over the paged storage engine

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, ValueEnum};
use pagedb::access::{DataType, RowId, Value};
use pagedb::database::{ReplacerKind, StorageConfig, StorageEngine};
use pagedb::storage::PageId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;

/// Order in which keys are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KeyOrder {
    Ascending,
    Descending,
    Random,
}

/// pagedb - insert, look up and remove keys in a disk-backed B+ tree
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file; created if it does not exist
    #[arg(short = 'D', long, default_value = "./pagedb.db")]
    db: PathBuf,

    /// Buffer pool frames
    #[arg(short, long, default_value = "64")]
    pool_size: usize,

    /// Page replacement policy
    #[arg(short, long, value_enum, default_value = "lru")]
    replacer: ReplacerKind,

    /// Number of keys to insert
    #[arg(short, long, default_value = "10000")]
    keys: i32,

    #[arg(short, long, value_enum, default_value = "random")]
    order: KeyOrder,

    /// Share of inserted keys to remove again, between 0 and 1
    #[arg(long, default_value = "0.5")]
    remove_fraction: f64,

    /// Seed for the random key order
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Leaf fan-out, defaults to what fits in a page
    #[arg(long)]
    leaf_max: Option<usize>,

    /// Internal fan-out, defaults to what fits in a page
    #[arg(long)]
    internal_max: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if !(0.0..=1.0).contains(&args.remove_fraction) {
        bail!("--remove-fraction must be between 0 and 1");
    }
    if args.keys < 0 {
        bail!("--keys must not be negative");
    }

    let config = StorageConfig {
        pool_size: args.pool_size,
        replacer: args.replacer,
        leaf_max_size: args.leaf_max,
        internal_max_size: args.internal_max,
    };

    let engine = if args.db.exists() {
        println!("Opening existing database at: {}", args.db.display());
        StorageEngine::open(&args.db, config).context("Failed to open database")?
    } else {
        println!("Creating new database at: {}", args.db.display());
        StorageEngine::create(&args.db, config).context("Failed to create database")?
    };

    // Each run works on a fresh index; earlier ones stay in the file.
    let mut index = engine.create_index(vec![DataType::Int32])?;
    println!(
        "Index {}: leaf max {}, internal max {}",
        index.index_id(),
        index.leaf_max_size(),
        index.internal_max_size()
    );

    let mut keys: Vec<i32> = (0..args.keys).collect();
    let mut rng = StdRng::seed_from_u64(args.seed);
    match args.order {
        KeyOrder::Ascending => {}
        KeyOrder::Descending => keys.reverse(),
        KeyOrder::Random => keys.shuffle(&mut rng),
    }

    let started = Instant::now();
    for &k in &keys {
        let key = index.key_manager().serialize(&[Value::Int32(k)])?;
        if !index.insert(&key, RowId::new(PageId(k as u32), 0))? {
            bail!("Key {} inserted twice", k);
        }
    }
    println!(
        "Inserted {} keys in {:?}, height {}",
        keys.len(),
        started.elapsed(),
        index.height()?
    );

    let started = Instant::now();
    for &k in &keys {
        let key = index.key_manager().serialize(&[Value::Int32(k)])?;
        if index.get_value(&key)? != Some(RowId::new(PageId(k as u32), 0)) {
            bail!("Lookup of key {} failed", k);
        }
    }
    println!("Looked up {} keys in {:?}", keys.len(), started.elapsed());

    let remove_count = (keys.len() as f64 * args.remove_fraction) as usize;
    keys.shuffle(&mut rng);
    let started = Instant::now();
    for &k in &keys[..remove_count] {
        let key = index.key_manager().serialize(&[Value::Int32(k)])?;
        if !index.remove(&key)? {
            bail!("Key {} missing on remove", k);
        }
    }
    println!(
        "Removed {} keys in {:?}, height {}",
        remove_count,
        started.elapsed(),
        index.height()?
    );

    index.check_integrity()?;
    let remaining = index.iter()?.count();
    println!("{} keys remain", remaining);
    drop(index);

    engine.flush()?;
    engine
        .buffer_pool()
        .with_disk_manager(|dm| dm.verify_consistency())?;
    let (allocated, extents) = engine
        .buffer_pool()
        .with_disk_manager(|dm| (dm.allocated_pages(), dm.extent_count()));
    println!("Disk: {} pages allocated in {} extents", allocated, extents);

    engine.close()?;
    Ok(())
}
