use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use ferrum_core::{Account, AccountId, BlockData, BlockTx, Error, Genesis, SignedTx};
use ferrum_network::NodeStatus;

/// Decouples the HTTP layer from `ferrum-node`'s `State` facade: `ferrum-node`
/// depends on `ferrum-rpc` to start the servers, so `ferrum-rpc` cannot
/// depend back on `ferrum-node` without a cycle. Handlers hold `Arc<dyn
/// NodeApi>` instead of a concrete state type.
pub trait NodeApi: Send + Sync {
    fn node_status(&self) -> NodeStatus;
    fn uncommitted_txs(&self, account: Option<&AccountId>) -> Vec<BlockTx>;
    fn blocks_by_height(&self, from: u64, to: u64) -> Result<Vec<BlockData>, Error>;
    fn latest_height(&self) -> u64;
    fn submit_node_block(&self, data: BlockData) -> Result<(), Error>;
    fn submit_node_tx(&self, tx: BlockTx) -> Result<(), Error>;
    fn add_peer(&self, host: String);
    fn genesis(&self) -> Genesis;
    fn accounts(&self) -> Vec<Account>;
    fn account(&self, id: &AccountId) -> Result<Account, Error>;
    fn submit_wallet_tx(&self, tx: SignedTx) -> Result<(), Error>;
}

/// Resolves an [`AccountId`] to a human label. The name-service directory is
/// an out-of-scope external collaborator (spec §1); this trait is the seam
/// it would plug into. The default implementation never resolves anything.
pub trait NameResolver: Send + Sync {
    fn resolve(&self, id: &AccountId) -> Option<String>;
}

pub struct NoopNameResolver;

impl NameResolver for NoopNameResolver {
    fn resolve(&self, _id: &AccountId) -> Option<String> {
        None
    }
}

#[derive(Clone)]
struct AppState {
    api: Arc<dyn NodeApi>,
    resolver: Arc<dyn NameResolver>,
}

/// An [`Account`] plus whatever label the [`NameResolver`] has for it, if
/// any. `name` is `null` in the response when nothing resolves.
#[derive(Serialize)]
struct AccountView {
    #[serde(flatten)]
    account: Account,
    name: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

#[derive(Serialize)]
struct MessageBody {
    message: &'static str,
}

fn ok_message() -> Json<MessageBody> {
    Json(MessageBody { message: "success" })
}

fn wallet_tx_status(err: &Error) -> StatusCode {
    match err {
        Error::AccountNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn node_submission_status(err: &Error) -> StatusCode {
    match err {
        Error::AccountNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::NOT_ACCEPTABLE,
    }
}

/// Starts both the private (inter-node) and public (wallet) HTTP servers
/// and returns once either one exits. `resolver` is the name-service seam
/// (spec §1's out-of-scope directory collaborator) the public account
/// endpoints consult; pass [`NoopNameResolver`] when nothing backs it.
pub async fn start_servers(
    private_addr: SocketAddr,
    public_addr: SocketAddr,
    api: Arc<dyn NodeApi>,
    resolver: Arc<dyn NameResolver>,
) -> Result<()> {
    let private = tokio::spawn(run_private(private_addr, api.clone()));
    let public = tokio::spawn(run_public(public_addr, api, resolver));
    tokio::select! {
        res = private => res??,
        res = public => res??,
    }
    Ok(())
}

async fn run_private(addr: SocketAddr, api: Arc<dyn NodeApi>) -> Result<()> {
    let app = private_router(api);
    info!(%addr, "private node API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_public(addr: SocketAddr, api: Arc<dyn NodeApi>, resolver: Arc<dyn NameResolver>) -> Result<()> {
    let app = public_router(api, resolver);
    info!(%addr, "public wallet API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn private_router(api: Arc<dyn NodeApi>) -> Router {
    Router::new()
        .route("/v1/node/status", get(node_status))
        .route("/v1/node/tx/uncommitted", get(node_uncommitted_tx))
        .route("/v1/node/blocks/:from/:to", get(node_blocks))
        .route("/v1/node/block", post(node_submit_block))
        .route("/v1/node/tx", post(node_submit_tx))
        .route("/v1/node/peer", post(node_add_peer))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { api, resolver: Arc::new(NoopNameResolver) })
}

pub fn public_router(api: Arc<dyn NodeApi>, resolver: Arc<dyn NameResolver>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/genesis", get(wallet_genesis))
        .route("/v1/accounts", get(wallet_accounts))
        .route("/v1/accounts/:address", get(wallet_account))
        .route("/v1/tx/uncommitted", get(wallet_uncommitted_all))
        .route("/v1/tx/uncommitted/:address", get(wallet_uncommitted_for))
        .route("/v1/tx/submit", post(wallet_submit_tx))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { api, resolver })
}

async fn node_status(State(state): State<AppState>) -> Json<NodeStatus> {
    Json(state.api.node_status())
}

async fn node_uncommitted_tx(State(state): State<AppState>) -> Json<Vec<BlockTx>> {
    Json(state.api.uncommitted_txs(None))
}

fn parse_height(raw: &str, latest: u64) -> Result<u64, Response> {
    if raw.eq_ignore_ascii_case("latest") {
        return Ok(latest);
    }
    raw.parse::<u64>()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid height: {raw}")))
}

async fn node_blocks(State(state): State<AppState>, Path((from, to)): Path<(String, String)>) -> Response {
    let latest = state.api.latest_height();
    let from = match parse_height(&from, latest) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match parse_height(&to, latest) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.api.blocks_by_height(from, to) {
        Ok(blocks) => Json(blocks).into_response(),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

async fn node_submit_block(State(state): State<AppState>, Json(data): Json<BlockData>) -> Response {
    match state.api.submit_node_block(data) {
        Ok(()) => ok_message().into_response(),
        Err(err) => error_response(node_submission_status(&err), err.to_string()),
    }
}

async fn node_submit_tx(State(state): State<AppState>, Json(tx): Json<BlockTx>) -> Response {
    match state.api.submit_node_tx(tx) {
        Ok(()) => ok_message().into_response(),
        Err(err) => error_response(node_submission_status(&err), err.to_string()),
    }
}

#[derive(Deserialize)]
struct AddPeerRequest {
    host: String,
}

async fn node_add_peer(State(state): State<AppState>, Json(req): Json<AddPeerRequest>) -> Response {
    state.api.add_peer(req.host);
    ok_message().into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn wallet_genesis(State(state): State<AppState>) -> Json<Genesis> {
    Json(state.api.genesis())
}

async fn wallet_accounts(State(state): State<AppState>) -> Json<Vec<Account>> {
    Json(state.api.accounts())
}

async fn wallet_account(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    let id = match AccountId::new(address) {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    match state.api.account(&id) {
        Ok(account) => {
            let name = state.resolver.resolve(&id);
            Json(AccountView { account, name }).into_response()
        }
        Err(err) => error_response(StatusCode::NOT_FOUND, err.to_string()),
    }
}

async fn wallet_uncommitted_all(State(state): State<AppState>) -> Json<Vec<BlockTx>> {
    Json(state.api.uncommitted_txs(None))
}

async fn wallet_uncommitted_for(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    let id = match AccountId::new(address) {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    Json(state.api.uncommitted_txs(Some(&id))).into_response()
}

async fn wallet_submit_tx(State(state): State<AppState>, Json(tx): Json<SignedTx>) -> Response {
    match state.api.submit_wallet_tx(tx) {
        Ok(()) => ok_message().into_response(),
        Err(err) => error_response(wallet_tx_status(&err), err.to_string()),
    }
}
