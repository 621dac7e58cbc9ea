use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hashchain_core::{constants::POW_TARGET_DIFFICULTY, Block, Chain, ChainConfig, PowConfig};
use hashchain_storage::SledStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hashchain-cli")]
#[command(about = "Append to and inspect a proof-of-work hash-chain")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct Local {
    /// Data directory for sled
    #[arg(long, env = "HASHCHAIN_DATA_DIR", default_value = "./data")]
    data_dir: String,
    /// Leading zero bits required of every block hash
    #[arg(long, env = "HASHCHAIN_DIFFICULTY", default_value_t = POW_TARGET_DIFFICULTY)]
    difficulty: u32,
    /// Mine on all cores
    #[arg(long)]
    parallel: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the chain (genesis block) if it does not exist yet
    Init {
        #[command(flatten)]
        local: Local,
    },
    /// Mine and append a block
    Add {
        #[command(flatten)]
        local: Local,
        /// Block payload
        #[arg(long)]
        data: String,
    },
    /// Print blocks from the tip back to genesis
    Print {
        #[command(flatten)]
        local: Local,
        /// Stop after this many blocks
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check every block's hash, proof of work and link
    Verify {
        #[command(flatten)]
        local: Local,
    },
    /// Show the current tip
    Head {
        #[command(flatten)]
        local: Local,
    },
    /// Submit a payload to a running node
    Submit {
        /// Node base URL (e.g. http://127.0.0.1:8080)
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        /// Block payload
        #[arg(long)]
        data: String,
    },
}

#[derive(Serialize)]
struct AppendRequest {
    payload: String,
}

fn open_chain(local: &Local) -> Result<Chain<SledStore>> {
    let store = SledStore::open(&local.data_dir)?;
    let pow = PowConfig::new(local.difficulty).with_parallel(local.parallel);
    let chain = Chain::open(Arc::new(store), ChainConfig::new(pow))
        .with_context(|| format!("opening chain in {}", local.data_dir))?;
    debug!("opened chain at {}", local.data_dir);
    Ok(chain)
}

fn print_block(block: &Block, difficulty: u32) {
    println!("hash:      {}", hex::encode(block.hash()));
    println!(
        "prev:      {}",
        block.prev_hash().map(hex::encode).unwrap_or_default()
    );
    println!("timestamp: {}", block.timestamp());
    println!("nonce:     {}", block.nonce());
    println!("data:      {}", String::from_utf8_lossy(block.payload()));
    println!("pow:       {}", block.verify(difficulty).is_ok());
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Init { local } => {
            let chain = open_chain(&local)?;
            println!("tip: {}", hex::encode(chain.tip()));
            chain.close()?;
        }
        Command::Add { local, data } => {
            let mut chain = open_chain(&local)?;
            let block = chain.append(data)?;
            print_block(&block, local.difficulty);
            chain.close()?;
        }
        Command::Print { local, limit } => {
            let chain = open_chain(&local)?;
            for block in chain.iter().take(limit.unwrap_or(usize::MAX)) {
                print_block(&block?, local.difficulty);
            }
            chain.close()?;
        }
        Command::Verify { local } => {
            let chain = open_chain(&local)?;
            let count = chain.verify()?;
            println!("ok: {count} blocks verified");
            chain.close()?;
        }
        Command::Head { local } => {
            let mut chain = open_chain(&local)?;
            println!("tip:    {}", hex::encode(chain.tip()));
            println!("height: {}", chain.height()?);
            chain.close()?;
        }
        Command::Submit { node, data } => {
            let req = AppendRequest { payload: data };
            let client = reqwest::Client::new();
            let res = client
                .post(format!("{node}/chain/blocks"))
                .json(&req)
                .send()
                .await?;
            let status = res.status();
            let body = res.text().await?;
            println!("status: {}", status);
            println!("{body}");
        }
    }
    Ok(())
}
