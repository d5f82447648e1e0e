// src/sessions/switch.rs
use crate::error::EngineError;
use crate::models::event::SwitchEvent;
use crate::sessions::manager::{SessionManager, SwitchConnection};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Write half of an accepted switch link.
pub struct TcpSwitchConnection {
    id: String,
    writer: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl SwitchConnection for TcpSwitchConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, payload: &str) -> Result<(), EngineError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Accepts switch connections and runs one reader task per link,
/// decoding blank-line-delimited key/value events and fanning them out
/// to the session manager.
pub struct SwitchListener {
    manager: Arc<SessionManager>,
}

impl SwitchListener {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub async fn start(&self, bind_address: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_address).await?;
        info!("<SessionManager> switch listener on {}", listener.local_addr()?);
        self.run(listener).await
    }

    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("<SessionManager> switch connected from {}", addr);
                    let (read_half, write_half) = socket.into_split();
                    let conn_id = Uuid::new_v4().to_string();
                    self.manager.register_connection(Arc::new(TcpSwitchConnection {
                        id: conn_id.clone(),
                        writer: Mutex::new(write_half),
                    }));
                    let manager = self.manager.clone();
                    tokio::spawn(async move {
                        if let Err(e) = read_events(&manager, read_half, &conn_id).await {
                            error!("<SessionManager> switch link {} failed: {}", conn_id, e);
                        }
                        manager.unregister_connection(&conn_id);
                    });
                }
                Err(e) => {
                    error!("<SessionManager> switch accept failed: {}", e);
                }
            }
        }
    }
}

// Reads header blocks until EOF; a malformed block is logged and
// dropped, it never tears down the link.
async fn read_events(
    manager: &Arc<SessionManager>,
    read_half: OwnedReadHalf,
    conn_id: &str,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let mut block = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        let at_eof = n == 0;
        if at_eof || line.trim().is_empty() {
            if !block.is_empty() {
                match SwitchEvent::parse(&block) {
                    Ok(ev) => manager.handle_event(&ev, conn_id).await,
                    Err(e) => warn!("<SessionManager> dropping malformed event: {}", e),
                }
                block.clear();
            }
            if at_eof {
                return Ok(());
            }
        } else {
            block.push_str(&line);
        }
    }
}
