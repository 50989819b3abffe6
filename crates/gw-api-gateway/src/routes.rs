//! Route handlers and shared state.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use gw_chain_db::ChainDb;
use gw_data_source::TxChunksDataSource;
use serde_json::json;
use shared_types::TxId;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The chain database, for debug counters.
    pub db: Arc<ChainDb>,
    /// The payload streamer behind the data routes.
    pub data_source: Arc<TxChunksDataSource>,
    /// Process start, for the uptime field.
    pub started_at: Instant,
}

impl AppState {
    /// Build handler state.
    pub fn new(db: Arc<ChainDb>, data_source: Arc<TxChunksDataSource>) -> Self {
        Self {
            db,
            data_source,
            started_at: Instant::now(),
        }
    }
}

/// The gateway's router. Static routes win over the tx-id captures.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/debug", get(debug_info))
        .route("/gateway_metrics", get(gateway_metrics))
        .route("/:tx_id", get(tx_data))
        .route("/:tx_id/*subpath", get(tx_data_with_subpath))
        .with_state(state)
}

async fn healthcheck(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "uptime": state.started_at.elapsed().as_secs(),
        "message": "Welcome to Permagate",
        "date": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn debug_info(State(state): State<AppState>) -> Response {
    // TODO: fold this into an authenticated admin router.
    match state.db.get_debug_info() {
        Ok(info) => Json(json!({ "db": info })).into_response(),
        Err(e) => {
            error!(error = %e, "debug info query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn gateway_metrics() -> Response {
    match gateway_telemetry::encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn tx_data(State(state): State<AppState>, Path(tx_id): Path<String>) -> Response {
    stream_tx_data(&state, &tx_id).await
}

async fn tx_data_with_subpath(
    State(state): State<AppState>,
    Path((tx_id, _subpath)): Path<(String, String)>,
) -> Response {
    // Subpaths address content inside manifests; the raw bytes are the
    // same transaction payload either way.
    stream_tx_data(&state, &tx_id).await
}

async fn stream_tx_data(state: &AppState, raw_id: &str) -> Response {
    // Anything that is not a well-formed id cannot name stored data.
    let Ok(id) = raw_id.parse::<TxId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.data_source.open(&id).await {
        Ok(data) => {
            let builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CONTENT_LENGTH, data.size);
            match builder.body(Body::from_stream(data.stream)) {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "response build failed");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Err(e) => {
            debug!(tx_id = %id, error = %e, "payload unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gw_data_source::ChunkSource;
    use parking_lot::Mutex;
    use shared_types::{ChainError, Transaction, TxOffset};
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct ScriptedChunks {
        txs: Mutex<HashMap<TxId, (Transaction, TxOffset, Vec<u8>)>>,
    }

    impl ScriptedChunks {
        fn new() -> Self {
            Self {
                txs: Mutex::new(HashMap::new()),
            }
        }

        fn add(&self, id: &TxId, payload: &[u8]) {
            let tx = Transaction {
                id: id.clone(),
                owner: "owner".into(),
                target: String::new(),
                quantity: "0".into(),
                reward: "1".into(),
                tags: Vec::new(),
                data_size: payload.len() as u64,
                data_root: "root".into(),
                signature: "sig".into(),
            };
            let offset = TxOffset {
                offset: 100 + payload.len() as u64 - 1,
                size: payload.len() as u64,
            };
            self.txs.lock().insert(id.clone(), (tx, offset, payload.to_vec()));
        }
    }

    #[async_trait]
    impl ChunkSource for ScriptedChunks {
        async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError> {
            self.txs
                .lock()
                .get(id)
                .map(|(tx, _, _)| tx.clone())
                .ok_or_else(|| ChainError::NotFound("tx".into()))
        }

        async fn get_tx_offset(&self, id: &TxId) -> Result<TxOffset, ChainError> {
            self.txs
                .lock()
                .get(id)
                .map(|(_, offset, _)| *offset)
                .ok_or_else(|| ChainError::NotFound("offset".into()))
        }

        async fn get_chunk(&self, offset: u64) -> Result<Vec<u8>, ChainError> {
            let txs = self.txs.lock();
            txs.values()
                .find(|(_, o, _)| o.start_offset() == offset)
                .map(|(_, _, payload)| payload.clone())
                .ok_or_else(|| ChainError::NotFound("chunk".into()))
        }
    }

    fn make_state() -> (Arc<ScriptedChunks>, AppState) {
        let chunks = Arc::new(ScriptedChunks::new());
        let db = Arc::new(ChainDb::open_in_memory().unwrap());
        let data_source = Arc::new(TxChunksDataSource::new(
            Arc::clone(&chunks) as Arc<dyn ChunkSource>
        ));
        (chunks, AppState::new(db, data_source))
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn healthcheck_is_200_with_uptime() {
        let (_chunks, state) = make_state();
        let response = router(state).oneshot(get_request("/healthcheck")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(body.get("uptime").is_some());
        assert_eq!(body["message"], "Welcome to Permagate");
    }

    #[tokio::test]
    async fn debug_reports_db_counts() {
        let (_chunks, state) = make_state();
        let response = router(state).oneshot(get_request("/debug")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["db"]["newBlocks"], 0);
        assert_eq!(body["db"]["maxHeight"], -1);
    }

    #[tokio::test]
    async fn tx_route_streams_payload() {
        let (chunks, state) = make_state();
        let id: TxId = "oq-v4Cv61YAGmY_KlLdxmGp5HjcldvOSLOMv0UPjSTE".parse().unwrap();
        chunks.add(&id, b"payload bytes");

        let response = router(state)
            .oneshot(get_request(&format!("/{id}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(body_bytes(response).await, b"payload bytes");
    }

    #[tokio::test]
    async fn unknown_tx_is_404() {
        let (_chunks, state) = make_state();
        let response = router(state)
            .oneshot(get_request(
                "/AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_id_is_404() {
        let (_chunks, state) = make_state();
        let response = router(state)
            .oneshot(get_request("/not-a-valid-id"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
