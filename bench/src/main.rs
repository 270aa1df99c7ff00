#![forbid(unsafe_code)]
//! Micro-benchmarks and a demo for the durahash core.
//!
//! Scenarios:
//! - `exthash`: put/get throughput of the persistent table under both
//!   durability policies
//! - `minhash`: signature construction + Jaccard estimation throughput
//! - `perfect`: perfect-hash build + membership-probe throughput
//! - `demo`: a short insert sequence followed by the table status report

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use durahash_core::{
    estimate_jaccard, DurabilityPolicy, ExtendibleHashTable, MinHash, PerfectHashSet, TableConfig,
};
use tracing_subscriber::EnvFilter;

const EXTHASH_KEYS: usize = 2_000;
const EXTHASH_BUCKET_CAPACITY: usize = 4;
const MINHASH_SIGNATURE_LEN: usize = 128;
const MINHASH_SET_SIZE: usize = 1_000;
const MINHASH_RUNS: usize = 50;
const PERFECT_KEYS: usize = 300;
const PERFECT_RUNS: usize = 20;

fn main() {
    init_tracing();

    if cfg!(debug_assertions) && env::var("DURAHASH_ALLOW_DEBUG_BENCH").as_deref() != Ok("1") {
        eprintln!(
            "error=debug_build_not_allowed message=\"run `cargo run --release -p durahash-bench`\""
        );
        process::exit(2);
    }

    let mode = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };

    let scenario = env::var("DURAHASH_BENCH_SCENARIO").unwrap_or_else(|_| "all".to_string());
    let ok = match scenario.as_str() {
        "all" => run_exthash_bench(mode) && run_minhash_bench(mode) && run_perfect_bench(mode),
        "exthash" => run_exthash_bench(mode),
        "minhash" => run_minhash_bench(mode),
        "perfect" => run_perfect_bench(mode),
        "demo" => run_demo(),
        _ => {
            eprintln!(
                "error=invalid_scenario scenario=\"{}\" allowed=\"all,exthash,minhash,perfect,demo\"",
                scenario
            );
            false
        }
    };

    if !ok {
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(error) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("failed to initialize tracing subscriber: {error}");
    }
}

fn scratch_dir(prefix: &str) -> Option<PathBuf> {
    let timestamp = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos(),
        Err(error) => {
            eprintln!("error=clock_failed detail=\"{error}\"");
            return None;
        }
    };
    Some(env::temp_dir().join(format!("durahash_bench_{prefix}_{timestamp}")))
}

fn run_exthash_bench(mode: &str) -> bool {
    for (policy, policy_name) in [
        (DurabilityPolicy::WriteThrough, "write_through"),
        (DurabilityPolicy::OnCheckpoint, "on_checkpoint"),
    ] {
        let Some(root) = scratch_dir(policy_name) else {
            return false;
        };

        let config = match TableConfig::new(EXTHASH_BUCKET_CAPACITY, 1) {
            Ok(config) => config.with_durability(policy),
            Err(error) => {
                eprintln!("error=table_config_failed detail=\"{error}\"");
                return false;
            }
        };
        let mut table: ExtendibleHashTable<u64, u64> =
            match ExtendibleHashTable::create(&root, config) {
                Ok(table) => table,
                Err(error) => {
                    eprintln!("error=table_create_failed detail=\"{error}\"");
                    return false;
                }
            };

        let put_started = Instant::now();
        for key in 0..EXTHASH_KEYS as u64 {
            if let Err(error) = table.put(key, key.wrapping_mul(31)) {
                eprintln!("error=table_put_failed key={key} detail=\"{error}\"");
                return false;
            }
        }
        let put_elapsed = put_started.elapsed();

        let get_started = Instant::now();
        let mut checksum = 0_u64;
        for key in 0..EXTHASH_KEYS as u64 {
            let Some(value) = table.get(&key) else {
                eprintln!("error=table_get_missing key={key}");
                return false;
            };
            checksum = checksum.wrapping_add(*value);
        }
        let get_elapsed = get_started.elapsed();

        let status = table.status();
        println!(
            "bench=exthash mode={mode} policy={policy_name} keys={EXTHASH_KEYS} \
             bucket_capacity={EXTHASH_BUCKET_CAPACITY} global_depth={} unique_buckets={} \
             put_qps={:.2} get_qps={:.2} checksum={checksum}",
            status.global_depth,
            status.buckets.len(),
            ops_per_second(EXTHASH_KEYS, put_elapsed),
            ops_per_second(EXTHASH_KEYS, get_elapsed),
        );

        if let Err(error) = fs::remove_dir_all(&root) {
            eprintln!("error=scratch_cleanup_failed detail=\"{error}\"");
            return false;
        }
    }
    true
}

fn run_minhash_bench(mode: &str) -> bool {
    let minhash = match MinHash::new(MINHASH_SIGNATURE_LEN, 42) {
        Ok(minhash) => minhash,
        Err(error) => {
            eprintln!("error=minhash_build_failed detail=\"{error}\"");
            return false;
        }
    };

    let left: Vec<u64> = (0..MINHASH_SET_SIZE as u64).collect();
    let right: Vec<u64> = (MINHASH_SET_SIZE as u64 / 2..MINHASH_SET_SIZE as u64 * 3 / 2).collect();

    let started = Instant::now();
    let mut last_estimate = 0.0;
    for _ in 0..MINHASH_RUNS {
        let left_sig = minhash.signature(left.iter().copied());
        let right_sig = minhash.signature(right.iter().copied());
        last_estimate = match estimate_jaccard(&left_sig, &right_sig) {
            Ok(estimate) => estimate,
            Err(error) => {
                eprintln!("error=jaccard_estimate_failed detail=\"{error}\"");
                return false;
            }
        };
    }
    let elapsed = started.elapsed();

    println!(
        "bench=minhash mode={mode} signature_len={MINHASH_SIGNATURE_LEN} set_size={MINHASH_SET_SIZE} \
         runs={MINHASH_RUNS} signatures_per_s={:.2} estimate={last_estimate:.4}",
        ops_per_second(MINHASH_RUNS * 2, elapsed),
    );
    true
}

fn run_perfect_bench(mode: &str) -> bool {
    let mut build_elapsed = Duration::from_secs(0);
    let mut probe_elapsed = Duration::from_secs(0);
    let mut hits = 0_usize;

    for _ in 0..PERFECT_RUNS {
        let keys: Vec<u64> = (0..PERFECT_KEYS as u64)
            .map(|key| key.wrapping_mul(2))
            .collect();

        let build_started = Instant::now();
        let set = match PerfectHashSet::build(keys) {
            Ok(set) => set,
            Err(error) => {
                eprintln!("error=perfect_build_failed detail=\"{error}\"");
                return false;
            }
        };
        build_elapsed += build_started.elapsed();

        let probe_started = Instant::now();
        hits = 0;
        for key in 0..(PERFECT_KEYS as u64 * 2) {
            if set.contains(&key) {
                hits += 1;
            }
        }
        probe_elapsed += probe_started.elapsed();
    }

    println!(
        "bench=perfect mode={mode} keys={PERFECT_KEYS} runs={PERFECT_RUNS} hits={hits} \
         builds_per_s={:.2} probes_per_s={:.2}",
        ops_per_second(PERFECT_RUNS, build_elapsed),
        ops_per_second(PERFECT_RUNS * PERFECT_KEYS * 2, probe_elapsed),
    );
    true
}

/// Constructs a small table, inserts a handful of keys and prints the shape
/// report: global depth, directory size, and per unique bucket its depth, the
/// slots addressing it and its item count.
fn run_demo() -> bool {
    let Some(root) = scratch_dir("demo") else {
        return false;
    };

    let config = match TableConfig::new(2, 1) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error=table_config_failed detail=\"{error}\"");
            return false;
        }
    };
    let mut table: ExtendibleHashTable<String, u64> =
        match ExtendibleHashTable::create(&root, config) {
            Ok(table) => table,
            Err(error) => {
                eprintln!("error=table_create_failed detail=\"{error}\"");
                return false;
            }
        };

    for (index, name) in ["ada", "grace", "alan", "edsger", "barbara", "donald"]
        .iter()
        .enumerate()
    {
        if let Err(error) = table.put(name.to_string(), index as u64) {
            eprintln!("error=table_put_failed key=\"{name}\" detail=\"{error}\"");
            return false;
        }
    }

    print!("{}", table.status());

    if let Err(error) = fs::remove_dir_all(&root) {
        eprintln!("error=scratch_cleanup_failed detail=\"{error}\"");
        return false;
    }
    true
}

fn ops_per_second(operations: usize, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return f64::INFINITY;
    }
    operations as f64 / elapsed.as_secs_f64()
}
