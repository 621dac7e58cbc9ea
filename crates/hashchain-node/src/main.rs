mod routes;

use clap::Parser;
use hashchain_core::{constants::POW_TARGET_DIFFICULTY, Chain, ChainConfig, PowConfig};
use hashchain_storage::SledStore;
use routes::{router, AppState};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "HASHCHAIN_LISTEN", default_value = "127.0.0.1:8080")]
    listen: String,

    /// Data directory for sled
    #[arg(long, env = "HASHCHAIN_DATA_DIR", default_value = "./data")]
    data_dir: String,

    /// Leading zero bits required of every block hash
    #[arg(long, env = "HASHCHAIN_DIFFICULTY", default_value_t = POW_TARGET_DIFFICULTY)]
    difficulty: u32,

    /// Mine on all cores
    #[arg(long, env = "HASHCHAIN_PARALLEL")]
    parallel: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let store = Arc::new(SledStore::open(&args.data_dir)?);
    let pow = PowConfig::new(args.difficulty).with_parallel(args.parallel);
    let chain = Chain::open(store.clone(), ChainConfig::new(pow))?;
    info!("chain tip {}", hex::encode(chain.tip()));

    let state = AppState {
        chain: Arc::new(Mutex::new(chain)),
    };
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = args.listen.parse()?;
    info!("hashchain-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    store.close()?;
    Ok(())
}
