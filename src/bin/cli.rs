//! AtlasKV Cluster CLI
//!
//! Command-line client that routes through a shard list.
//!
//! Keys are comma-separated parts; parts that parse as numbers become
//! number parts, everything else a string part (`user,42`).

use atlaskv_cluster::{Config, Key, KeyPart, Projection, Record, Router, ScanOptions};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasKV Cluster CLI
#[derive(Parser, Debug)]
#[command(name = "atlaskv-cluster-cli")]
#[command(about = "CLI for a sharded AtlasKV cluster")]
#[command(version)]
struct Args {
    /// Shard address; repeat once per shard, in the same order every time
    #[arg(short, long = "shard", required = true)]
    shards: Vec<String>,

    /// Ring positions per shard
    #[arg(long, default_value = "64")]
    virtual_nodes: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Print the shard owning a key
    Owner {
        key: String,
    },

    /// Scan the whole cluster in key order
    Scan {
        /// Print keys only
        #[arg(long, conflicts_with = "values")]
        keys: bool,

        /// Print values only
        #[arg(long)]
        values: bool,

        /// Inclusive start key
        #[arg(long)]
        start: Option<String>,

        /// Exclusive end key
        #[arg(long)]
        end: Option<String>,

        /// Maximum number of records
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_key(raw: &str) -> Key {
    let parts = raw
        .split(',')
        .map(|part| match part.parse::<f64>() {
            Ok(n) => KeyPart::Number(n),
            Err(_) => KeyPart::String(part.to_string()),
        })
        .collect();
    Key::new(parts)
}

fn run(args: Args) -> atlaskv_cluster::Result<()> {
    let config = Config::builder()
        .shards(args.shards)
        .virtual_nodes(args.virtual_nodes)
        .build();
    let router = Router::connect(config)?;

    match args.command {
        Commands::Get { key } => match router.get(&parse_key(&key)) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(e) if e.is_not_found() => println!("(nil)"),
            Err(e) => return Err(e),
        },
        Commands::Set { key, value } => {
            router.put(&parse_key(&key), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            router.del(&parse_key(&key))?;
            println!("OK");
        }
        Commands::Owner { key } => println!("{}", router.owner(&parse_key(&key))),
        Commands::Scan {
            keys,
            values,
            start,
            end,
            limit,
        } => {
            let projection = match (keys, values) {
                (true, _) => Projection::KeysOnly,
                (_, true) => Projection::ValuesOnly,
                _ => Projection::Entries,
            };
            let options = ScanOptions {
                projection,
                start: start.as_deref().map(parse_key),
                end: end.as_deref().map(parse_key),
                limit,
            };

            for record in router.read_stream(options)? {
                match record? {
                    Record::Entry(entry) => println!(
                        "{} => {}",
                        entry.key,
                        String::from_utf8_lossy(&entry.value)
                    ),
                    Record::Key(key) => println!("{}", key),
                    Record::Value(value) => println!("{}", String::from_utf8_lossy(&value)),
                }
            }
        }
    }

    router.close()
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
