//! `lifefeed` - read LifeChain feeds from a local node

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lifefeed_engine::classifier::Cover;
use lifefeed_engine::ledger::expand_path;
use lifefeed_engine::{FeedConfig, FeedEngine, FeedItem, FeedKind, IpcLedger, LocalCache, PaginationController};

const DEFAULT_CONFIG_PATH: &str = "~/.lifefeed/config.json";
const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "lifefeed", about = "Read LifeChain feeds straight from the ledger")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the node IPC socket path
    #[arg(long)]
    ipc: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merged feed of followed users and topics
    Home {
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        count: usize,
    },
    /// Items carrying a tag
    Topic {
        tag: String,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        count: usize,
    },
    /// Items by one author
    User {
        address: Address,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        count: usize,
    },
    /// Items mentioning an account (defaults to the configured account)
    Notifications {
        account: Option<Address>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        count: usize,
    },
    /// A single transaction with its replies
    Tx {
        hash: TxHash,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        replies: usize,
    },
    /// Delete all locally cached ledger data
    ClearCache,
}

fn load_config(cli: &Cli) -> Result<FeedConfig, Box<dyn std::error::Error>> {
    let path = PathBuf::from(expand_path(&cli.config));
    let mut config = if path.exists() {
        FeedConfig::load(&path)?
    } else {
        warn!("Config {} not found, using defaults", path.display());
        FeedConfig::default()
    };
    if let Some(ipc) = &cli.ipc {
        config.node.socket_path = ipc.clone();
    }
    Ok(config)
}

fn print_item(item: &FeedItem) {
    let label = match item.kind {
        FeedKind::Post => "post",
        FeedKind::Reply => "reply",
        FeedKind::Repost => "repost",
    };
    println!("[{}] {:#x} by {:#x} at block {}", label, item.hash(), item.author, item.block_number());
    if let Some(parent) = item.parent_ref {
        println!("    re {:#x}", parent);
    }
    if let Some(origin) = item.repost_author {
        println!("    originally by {:#x}", origin);
    }
    if let Some(title) = &item.summary.title {
        println!("    {}", title);
    }
    println!("    {}", item.summary.summary);
    match item.summary.cover() {
        Some(Cover::Video(src)) => println!("    video: {}", src),
        Some(Cover::Image(src)) => println!("    image: {}", src),
        None => {}
    }
    if item.summary.has_more_content {
        println!("    ...");
    }
}

async fn print_page(feed: &PaginationController, count: usize) {
    if let Err(e) = feed.load_page(count).await {
        error!("Feed request failed: {}", e);
    }
    let snapshot = feed.snapshot();
    for item in &snapshot.items {
        print_item(item);
    }
    println!("-- {} --", snapshot.status);
}

/// Connect to the node and build an engine over the configured cache
async fn connect(config: &FeedConfig) -> Result<FeedEngine, Box<dyn std::error::Error>> {
    let ledger = Arc::new(IpcLedger::connect(&config.node, config.contract_address).await?);
    let engine = FeedEngine::from_config(config, ledger).await?;
    info!("Feed engine ready");
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::ClearCache => {
            LocalCache::new(config.cache.open().await?).clear().await?;
            println!("Local cache cleared");
        }
        Command::Home { count } => print_page(&connect(&config).await?.home_feed().await?, count).await,
        Command::Topic { tag, count } => print_page(&connect(&config).await?.topic_feed(&tag).await?, count).await,
        Command::User { address, count } => print_page(&connect(&config).await?.user_feed(address).await?, count).await,
        Command::Notifications { account, count } => {
            print_page(&connect(&config).await?.notifications_feed(account).await?, count).await
        }
        Command::Tx { hash, replies } => {
            let engine = connect(&config).await?;
            let item = engine.transaction_item(hash).await?;
            if let Some(parent) = engine.resolve_parent(&item).await? {
                print_item(&parent);
            }
            print_item(&item);
            print_page(&engine.replies_feed(hash).await?, replies).await;
        }
    }

    Ok(())
}
