use {
  crate::{
    dapp::Dapp,
    model::Transaction,
    node::NodeHandle,
    primitives::Address,
    store::BlockchainStore,
  },
  axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json,
    Router,
  },
  axum_extra::response::ErasedJson,
  serde_json::json,
  std::net::SocketAddr,
};

/// A small read/write JSON API over a running node. Holds no
/// consensus-relevant state of its own: every route reads through the
/// store/pool/dapp a [`NodeHandle`] already exposes, so a crashed and
/// restarted RPC service loses nothing the node itself didn't already
/// have.
pub struct ApiService;

impl ApiService {
  pub fn spawn<S, D>(addr: SocketAddr, handle: NodeHandle<S, D>)
  where
    S: BlockchainStore + 'static,
    D: Dapp + 'static,
  {
    let router = Router::new()
      .route("/info", get(serve_info::<S, D>))
      .route("/block/:height", get(serve_block::<S, D>))
      .route("/account/:address", get(serve_account::<S, D>))
      .route("/transaction", post(serve_send_transaction::<S, D>))
      .layer(Extension(handle));

    tokio::spawn(async move {
      if let Err(err) = axum::Server::bind(&addr).serve(router.into_make_service()).await {
        tracing::error!(%err, "rpc service stopped");
      }
    });
  }
}

async fn serve_info<S, D>(
  Extension(handle): Extension<NodeHandle<S, D>>,
) -> impl axum::response::IntoResponse
where
  S: BlockchainStore + 'static,
  D: Dapp + 'static,
{
  match handle.store().height() {
    Ok(height) => match handle.store().header_of(height) {
      Ok(header) => (
        StatusCode::OK,
        ErasedJson::pretty(json!({
          "system": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
          },
          "height": height,
          "head": header.hash().to_string(),
          "pending_transactions": handle.pool_len(),
        })),
      ),
      Err(err) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErasedJson::pretty(json!({ "error": err.to_string() })),
      ),
    },
    Err(err) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      ErasedJson::pretty(json!({ "error": err.to_string() })),
    ),
  }
}

async fn serve_block<S, D>(
  Path(height): Path<u64>,
  Extension(handle): Extension<NodeHandle<S, D>>,
) -> impl axum::response::IntoResponse
where
  S: BlockchainStore + 'static,
  D: Dapp + 'static,
{
  match handle.store().block_of(height) {
    Ok(block) => (
      StatusCode::OK,
      ErasedJson::pretty(json!({
        "height": block.header.height,
        "hash": block.hash().to_string(),
        "last_block_hash": block.header.last_block_hash.to_string(),
        "transaction_root": block.header.transaction_root.to_string(),
        "app_state_hash": block.header.app_state_hash.to_string(),
        "transactions": block
          .body
          .transactions
          .as_slice()
          .iter()
          .map(|tx| tx.hash().to_string())
          .collect::<Vec<_>>(),
      })),
    ),
    Err(err) => (
      StatusCode::NOT_FOUND,
      ErasedJson::pretty(json!({ "error": err.to_string() })),
    ),
  }
}

async fn serve_account<S, D>(
  Path(address): Path<Address>,
  Extension(handle): Extension<NodeHandle<S, D>>,
) -> impl axum::response::IntoResponse
where
  S: BlockchainStore + 'static,
  D: Dapp + 'static,
{
  match handle.dapp().query_account(&address).await {
    Some(value) => (
      StatusCode::OK,
      ErasedJson::pretty(json!({ "address": address, "account": value })),
    ),
    None => (
      StatusCode::NOT_IMPLEMENTED,
      ErasedJson::pretty(json!({
        "error": "this dapp does not expose per-account state",
      })),
    ),
  }
}

async fn serve_send_transaction<S, D>(
  Extension(handle): Extension<NodeHandle<S, D>>,
  Json(transaction): Json<Transaction>,
) -> impl axum::response::IntoResponse
where
  S: BlockchainStore + 'static,
  D: Dapp + 'static,
{
  if transaction.verify_signature().is_err() {
    return (
      StatusCode::BAD_REQUEST,
      ErasedJson::pretty(json!({ "error": "invalid transaction signature" })),
    );
  }

  let hash = transaction.hash();
  match handle.submit_transaction(transaction).await {
    Ok(_) => (
      StatusCode::CREATED,
      ErasedJson::pretty(json!({ "transaction": hash.to_string() })),
    ),
    Err(err) => (
      StatusCode::BAD_REQUEST,
      ErasedJson::pretty(json!({ "error": err.to_string() })),
    ),
  }
}
