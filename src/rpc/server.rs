// src/rpc/server.rs
use crate::engine::StatsEngine;
use crate::error::EngineError;
use crate::models::cdr::ExternalCdr;
use crate::models::{AttrGetCdrs, AttrGetMetrics, AttrLoadTpFromFolder, AttrResetQueues, OK};
use crate::rpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ERR_METHOD_NOT_FOUND, ERR_PARSE, ERR_SERVER,
};
use crate::services::CdrServer;
use crate::storage::{CdrStorage, DataDb};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// JSON-RPC over TCP: one request per line, admin surface for the
/// stats engine plus the CDR ingest/query path.
pub struct RpcServer {
    stats: Arc<StatsEngine>,
    cdr_server: Arc<CdrServer>,
    storage: Arc<dyn CdrStorage>,
    data_db: Arc<dyn DataDb>,
}

impl RpcServer {
    pub fn new(
        stats: Arc<StatsEngine>,
        cdr_server: Arc<CdrServer>,
        storage: Arc<dyn CdrStorage>,
        data_db: Arc<dyn DataDb>,
    ) -> Self {
        Self {
            stats,
            cdr_server,
            storage,
            data_db,
        }
    }

    pub async fn start(self: Arc<Self>, bind_address: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_address).await?;
        info!("<RPC> listening on {}", bind_address);

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(socket).await {
                            error!("<RPC> connection from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("<RPC> accept failed: {}", e);
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    warn!("<RPC> malformed request dropped: {}", e);
                    error_response(0, ERR_PARSE, &format!("parse error: {}", e))
                }
            };
            let mut payload = serde_json::to_vec(&response)?;
            payload.push(b'\n');
            write_half.write_all(&payload).await?;
        }
    }

    /// Method dispatch, exposed separately from the listener so tests
    /// can drive the surface without a socket.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse<Value> {
        let id = request.id;
        let result = self.dispatch(&request).await;
        match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(value),
                error: None,
                id,
            },
            Err(e) => {
                let code = match e {
                    EngineError::Decode(_) => ERR_PARSE,
                    EngineError::Internal(ref msg) if msg.starts_with("unsupported method") => {
                        ERR_METHOD_NOT_FOUND
                    }
                    _ => ERR_SERVER,
                };
                error_response(id, code, &e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: &JsonRpcRequest) -> Result<Value, EngineError> {
        match request.method.as_str() {
            "CDRStatsV1.GetQueueIds" => Ok(json!(self.stats.queue_ids())),
            "CDRStatsV1.GetMetrics" => {
                let attrs: AttrGetMetrics = first_param(request)?;
                let metrics = self.stats.get_metrics(&attrs.stats_queue_id)?;
                Ok(json!(metrics))
            }
            "CDRStatsV1.ResetQueues" => {
                let attrs: AttrResetQueues = first_param(request)?;
                self.stats.reset_queues(&attrs.stats_queue_ids);
                Ok(json!(OK))
            }
            "ApierV1.LoadTariffPlanFromFolder" => {
                let attrs: AttrLoadTpFromFolder = first_param(request)?;
                let confs = self.data_db.load_tariff_plan(&attrs.folder_path).await?;
                if !confs.is_empty() {
                    self.stats.reload(confs);
                }
                Ok(json!(OK))
            }
            "CdrsV2.ProcessCdr" => {
                let ext: ExternalCdr = first_param(request)?;
                self.cdr_server.process_external(&ext).await?;
                Ok(json!(OK))
            }
            "ApierV2.GetCdrs" => {
                let filter: AttrGetCdrs = first_param_or_default(request)?;
                let cdrs = self.storage.get_cdrs(&filter).await?;
                let external: Vec<ExternalCdr> = cdrs.iter().map(|c| c.as_external()).collect();
                Ok(json!(external))
            }
            other => Err(EngineError::Internal(format!("unsupported method: {}", other))),
        }
    }
}

fn first_param<T: DeserializeOwned>(request: &JsonRpcRequest) -> Result<T, EngineError> {
    let value = request
        .params
        .first()
        .cloned()
        .ok_or_else(|| EngineError::Decode("missing params".to_string()))?;
    serde_json::from_value(value).map_err(|e| EngineError::Decode(e.to_string()))
}

fn first_param_or_default<T: DeserializeOwned + Default>(
    request: &JsonRpcRequest,
) -> Result<T, EngineError> {
    match request.params.first() {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| EngineError::Decode(e.to_string()))
        }
    }
}

fn error_response(id: u64, code: i32, message: &str) -> JsonRpcResponse<Value> {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_string(),
        }),
        id,
    }
}
