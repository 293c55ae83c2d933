//! SocialIndex CLI: replay chain blocks into Postgres and query the read model.
//!
//! # Commands
//! ```text
//! socialindex sync     --blocks <blocks.ndjson> [--skip-errored-blocks]
//! socialindex height
//! socialindex post     <slug | owner/uuid>
//! socialindex posts    [--sort-by pdv] [--order-by asc] [--limit 50] ...
//! socialindex profiles <address>...
//! socialindex likes    --liked-by <address> <owner/uuid>...
//! socialindex stats    profile <address>... | post <owner/uuid>... | decentr | ddv
//! socialindex info
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use socialindex_core::pdv;
use socialindex_core::query::{DEFAULT_LIMIT, MAX_LIMIT};
use socialindex_core::{
    init_tracing, HandlerRegistry, IndexerBuilder, IndexerConfig, ListPostsParams,
    MemoryBlockSource, MessageKind, PostId, Queries,
};
use socialindex_storage::PostgresStorage;

#[derive(Parser)]
#[command(
    name = "socialindex",
    about = "Off-chain indexer for the community module (SocialIndex CLI)",
    long_about = "
SocialIndex CLI: apply finalized blocks exactly once and query the indexed
posts, likes, profiles and PDV statistics.

ENVIRONMENT VARIABLES:
  DATABASE_URL         Postgres connection string
  SOCIALINDEX_CONFIG   Path to a JSON config file
  LOG_LEVEL            Global log level (trace|debug|info|warn|error)
",
    version
)]
struct Cli {
    /// Postgres connection string (overrides the config file)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// JSON config file
    #[arg(long, env = "SOCIALINDEX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Global log level (overrides the config file)
    #[arg(long, env = "LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply blocks from a newline-delimited JSON file
    Sync {
        /// One JSON block per line: {"height", "time", "messages"}
        #[arg(long)]
        blocks: PathBuf,
        /// Move past blocks that fail instead of retrying them
        #[arg(long)]
        skip_errored_blocks: bool,
    },

    /// Print the last committed height
    Height,

    /// Show one post by slug or owner/uuid
    Post {
        key: String,
    },

    /// List posts with keyset pagination
    Posts {
        /// createdAt | likesCount | dislikesCount | pdv
        #[arg(long)]
        sort_by: Option<String>,
        /// asc | desc
        #[arg(long)]
        order_by: Option<String>,
        /// Category 1..=9
        #[arg(long)]
        category: Option<u8>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        liked_by: Option<String>,
        #[arg(long)]
        followed_by: Option<String>,
        /// Unix seconds, exclusive
        #[arg(long)]
        from: Option<i64>,
        /// Unix seconds, exclusive
        #[arg(long)]
        to: Option<i64>,
        #[arg(long)]
        exclude_negative: bool,
        #[arg(long)]
        exclude_neutral: bool,
        /// Last post of the previous page, owner/uuid
        #[arg(long)]
        after: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,
    },

    /// Show profiles with their post counts
    Profiles {
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Show the like weights an address has on posts
    Likes {
        #[arg(long)]
        liked_by: String,
        #[arg(required = true)]
        posts: Vec<String>,
    },

    /// PDV statistics
    Stats {
        #[command(subcommand)]
        kind: StatsKind,
    },

    /// Show build and scale information
    Info,
}

#[derive(Subcommand)]
enum StatsKind {
    /// Cumulative balance per date for addresses
    Profile {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Cumulative like value per date for posts
    Post {
        #[arg(required = true)]
        posts: Vec<String>,
    },
    /// Average and distributed value across all accounts
    Decentr,
    /// Distributed value growth per date
    Ddv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Sync {
            blocks,
            skip_errored_blocks,
        } => cmd_sync(config, &blocks, skip_errored_blocks).await,
        command => {
            let storage = connect(&config).await?;
            run_query(&storage, command).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<IndexerConfig> {
    let mut config = match &cli.config {
        Some(path) => IndexerConfig::from_json_file(path)?,
        None => IndexerConfig::default(),
    };
    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if cli.json_logs {
        config.log.json = true;
    }
    Ok(config)
}

async fn connect(config: &IndexerConfig) -> Result<PostgresStorage> {
    let Some(url) = config.database_url.as_deref() else {
        bail!("no database configured: pass --database-url or set DATABASE_URL");
    };
    PostgresStorage::connect_with_options(url, config.postgres.clone())
        .await
        .context("connecting to postgres")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_ids(raw: &[String]) -> Result<Vec<PostId>> {
    raw.iter()
        .map(|s| s.parse::<PostId>().with_context(|| format!("bad post id '{s}'")))
        .collect()
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_sync(
    mut config: IndexerConfig,
    blocks: &Path,
    skip_errored_blocks: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(blocks)
        .with_context(|| format!("reading {}", blocks.display()))?;
    let source = MemoryBlockSource::from_ndjson(&raw)?;
    tracing::info!(blocks = source.len(), file = %blocks.display(), "loaded blocks");

    config.skip_errored_blocks |= skip_errored_blocks;
    let storage = Arc::new(connect(&config).await?);
    let consumer = IndexerBuilder::from_config(config).build(storage, Arc::new(source));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current block");
            on_signal.cancel();
        }
    });

    consumer.run(cancel).await?;
    println!("height: {}", consumer.ping().await?);
    Ok(())
}

async fn run_query(storage: &PostgresStorage, command: Commands) -> Result<()> {
    match command {
        Commands::Height => {
            println!("{}", storage.indexed_height().await?);
        }

        Commands::Post { key } => {
            let post = storage
                .get_post_by_slug_or_id(&key)
                .await
                .with_context(|| format!("post '{key}'"))?;
            print_json(&post)?;
        }

        Commands::Posts {
            sort_by,
            order_by,
            category,
            owner,
            liked_by,
            followed_by,
            from,
            to,
            exclude_negative,
            exclude_neutral,
            after,
            limit,
        } => {
            let mut query: HashMap<String, String> = HashMap::new();
            let mut set = |key: &str, value: Option<String>| {
                if let Some(v) = value {
                    query.insert(key.to_string(), v);
                }
            };
            set("sortBy", sort_by);
            set("orderBy", order_by);
            set("category", category.map(|c| c.to_string()));
            set("owner", owner);
            set("likedBy", liked_by);
            set("followedBy", followed_by);
            set("from", from.map(|v| v.to_string()));
            set("to", to.map(|v| v.to_string()));
            set("excludeNegative", Some(exclude_negative.to_string()));
            set("excludeNeutral", Some(exclude_neutral.to_string()));
            set("after", after);
            set("limit", Some(limit.to_string()));

            let params = ListPostsParams::from_query(&query)?;
            print_json(&storage.list_posts(&params).await?)?;
        }

        Commands::Profiles { addresses } => {
            print_json(&storage.get_profiles(&addresses).await?)?;
        }

        Commands::Likes { liked_by, posts } => {
            let likes = storage.get_likes(&liked_by, &parse_ids(&posts)?).await?;
            let likes: BTreeMap<String, i8> = likes
                .into_iter()
                .map(|(id, weight)| (id.to_string(), weight.value()))
                .collect();
            print_json(&likes)?;
        }

        Commands::Stats { kind } => match kind {
            StatsKind::Profile { addresses } => {
                print_json(&storage.get_profile_stats(&addresses).await?)?;
            }
            StatsKind::Post { posts } => {
                let stats = storage.get_post_stats(&parse_ids(&posts)?).await?;
                let stats: BTreeMap<String, _> = stats
                    .into_iter()
                    .map(|(id, series)| (id.to_string(), series))
                    .collect();
                print_json(&stats)?;
            }
            StatsKind::Decentr => print_json(&storage.get_decentr_stats().await?)?,
            StatsKind::Ddv => print_json(&storage.get_ddv_stats().await?)?,
        },

        Commands::Sync { .. } | Commands::Info => bail!("not a query command"),
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("SocialIndex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Ledger scale:");
    println!("  1 PDV             = {} uPDV", pdv::PDV_DENOMINATOR);
    println!("  like weight unit  = {} uPDV", pdv::UPDV_PER_LIKE);
    println!(
        "  initial balance   = {} uPDV = {} PDV (at {})",
        pdv::INITIAL_BALANCE,
        pdv::denominate(pdv::INITIAL_BALANCE),
        pdv::sentinel_date()
    );
    println!();
    let registry = HandlerRegistry::standard();
    let handled: Vec<String> = MessageKind::ALL
        .iter()
        .filter(|kind| registry.handles(**kind))
        .map(|kind| kind.to_string())
        .collect();
    println!("Messages handled:   {}", handled.join(", "));
    println!();
    println!("Queries:");
    println!("  page size         = {DEFAULT_LIMIT} (max {MAX_LIMIT})");
    println!("  sort columns      = createdAt, likesCount, dislikesCount, pdv");
    println!();
    println!("Storage backends: memory, Postgres (materialized views, LOCK TABLE height)");
    Ok(())
}
