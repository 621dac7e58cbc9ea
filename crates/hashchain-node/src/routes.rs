use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hashchain_core::{
    constants::{BLOCKS_PER_BATCH, HASH_HEX_SIZE, HASH_SIZE, MAX_BLOCKS_PER_REQUEST},
    Block, Chain, ChainError, Hash,
};
use hashchain_storage::SledStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::warn;

pub type SharedChain = Arc<Mutex<Chain<SledStore>>>;

#[derive(Clone)]
pub struct AppState {
    pub chain: SharedChain,
}

#[derive(Serialize, Deserialize)]
struct Health {
    status: String,
}

#[derive(Serialize, Deserialize)]
pub struct Head {
    pub tip: String,
    pub height: usize,
    pub difficulty: u32,
}

#[derive(Serialize, Deserialize)]
pub struct BlockView {
    pub hash: String,
    pub prev_hash: Option<String>,
    pub timestamp: i64,
    pub nonce: u64,
    /// Payload as UTF-8, lossily decoded.
    pub payload: String,
    pub payload_hex: String,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            hash: hex::encode(block.hash()),
            prev_hash: block.prev_hash().map(hex::encode),
            timestamp: block.timestamp(),
            nonce: block.nonce(),
            payload: String::from_utf8_lossy(block.payload()).into_owned(),
            payload_hex: hex::encode(block.payload()),
        }
    }
}

#[derive(Deserialize)]
pub struct AppendRequest {
    pub payload: String,
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<u32>,
}

#[derive(Serialize, Deserialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub blocks: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("invalid block hash: {0}")]
    BadHash(String),

    #[error("block {0} not found")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadHash(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Chain(ChainError::TipConflict { .. }) => StatusCode::CONFLICT,
            ApiError::Chain(ChainError::MiningExhausted { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Chain(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("request failed: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chain/head", get(head))
        .route("/chain/blocks", get(list_blocks).post(append_block))
        .route("/chain/blocks/{hash}", get(get_block))
        .route("/chain/verify", get(verify))
        .with_state(state)
}

/// Runs `f` against the chain on the blocking pool; mining and sled I/O never
/// run on the async workers.
async fn with_chain<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut Chain<SledStore>) -> Result<T, ApiError> + Send + 'static,
{
    let chain = Arc::clone(&state.chain);
    tokio::task::spawn_blocking(move || {
        let mut guard = chain
            .lock()
            .map_err(|_| ApiError::Internal("chain lock poisoned".into()))?;
        f(&mut guard)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
}

fn parse_hash(raw: &str) -> Result<Hash, ApiError> {
    if raw.len() != HASH_HEX_SIZE {
        return Err(ApiError::BadHash(raw.to_string()));
    }
    let bytes = hex::decode(raw).map_err(|_| ApiError::BadHash(raw.to_string()))?;
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".into(),
    })
}

async fn head(State(state): State<AppState>) -> Result<Json<Head>, ApiError> {
    let head = with_chain(&state, |chain| {
        Ok(Head {
            tip: hex::encode(chain.tip()),
            height: chain.height()?,
            difficulty: chain.config().difficulty(),
        })
    })
    .await?;
    Ok(Json(head))
}

async fn list_blocks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<BlockView>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(BLOCKS_PER_BATCH)
        .min(MAX_BLOCKS_PER_REQUEST) as usize;
    let blocks = with_chain(&state, move |chain| Ok(chain.blocks(limit)?)).await?;
    Ok(Json(blocks.iter().map(BlockView::from).collect()))
}

async fn get_block(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<BlockView>, ApiError> {
    let hash = parse_hash(&raw)?;
    let block = with_chain(&state, move |chain| Ok(chain.get_block(&hash)?)).await?;
    block
        .map(|b| Json(BlockView::from(&b)))
        .ok_or(ApiError::NotFound(raw))
}

async fn append_block(
    State(state): State<AppState>,
    Json(req): Json<AppendRequest>,
) -> Result<(StatusCode, Json<BlockView>), ApiError> {
    let block = with_chain(&state, move |chain| Ok(chain.append(req.payload.into_bytes())?)).await?;
    Ok((StatusCode::CREATED, Json(BlockView::from(&block))))
}

async fn verify(State(state): State<AppState>) -> Result<Json<VerifyReport>, ApiError> {
    let outcome = with_chain(&state, |chain| Ok(chain.verify())).await?;
    let report = match outcome {
        Ok(blocks) => VerifyReport {
            valid: true,
            blocks: Some(blocks),
            error: None,
        },
        Err(ChainError::Store(e)) => return Err(ChainError::Store(e).into()),
        Err(e) => VerifyReport {
            valid: false,
            blocks: None,
            error: Some(e.to_string()),
        },
    };
    Ok(Json(report))
}
