//! Full-duplex text transport underneath the STOMP session.
//!
//! A [`Connector`] opens a link and hands back a pair of channels. Dropping
//! the outbound sender closes the link; the inbound receiver yielding `None`
//! means the peer went away.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use hd_core::error::{HdError, HdResult};

const LINK_BUFFER: usize = 256;

/// An open transport link.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

impl TransportLink {
    /// Build a link plus the peer-side ends, for in-memory transports.
    pub fn pair() -> (Self, mpsc::Receiver<String>, mpsc::Sender<String>) {
        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens transport links.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> HdResult<TransportLink>;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    max_frame_bytes: usize,
}

impl WsConnector {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> HdResult<TransportLink> {
        let parsed = url::Url::parse(url)
            .map_err(|e| HdError::Config(format!("invalid websocket url {url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(HdError::Config(format!(
                "websocket url must use ws:// or wss://, got {url}"
            )));
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_frame_bytes);
        ws_config.max_frame_size = Some(self.max_frame_bytes);

        let (stream, _response) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false)
                .await
                .map_err(classify_ws_error)?;
        debug!("websocket open: {url}");

        let (mut sink, mut source) = stream.split();
        let (link, mut out_rx, in_tx) = TransportLink::pair();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("websocket write failed: {e}");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("dropping non-utf8 binary websocket message");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("websocket closed by peer: {frame:?}");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("websocket read failed: {e}");
                        break;
                    }
                };
                if in_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        Ok(link)
    }
}

fn classify_ws_error(err: tungstenite::Error) -> HdError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                HdError::Unauthorized(format!("websocket upgrade rejected ({status})"))
            } else {
                HdError::Socket(format!("websocket upgrade failed with status {status}"))
            }
        }
        other => HdError::Socket(other.to_string()),
    }
}
