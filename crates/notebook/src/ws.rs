//! WebSocket connection to the kernel relay at `ws://{host}/ws/{kernel_id}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::TransportError;

#[async_trait]
pub trait KernelSocket: Send {
    fn is_open(&self) -> bool;

    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame. `None` once the socket is closed.
    async fn recv_text(&mut self) -> Option<String>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, kernel_id: &str) -> Result<Box<dyn KernelSocket>, TransportError>;
}

/// `ws://` for `http://` origins, `wss://` for `https://`.
pub fn socket_url(origin: &Url, kernel_id: &str) -> Result<Url, TransportError> {
    let scheme = match origin.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let host = origin
        .host_str()
        .ok_or_else(|| TransportError(format!("origin has no host: {origin}")))?;
    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(Url::parse(&format!("{scheme}://{authority}/ws/{kernel_id}"))?)
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    origin: Url,
}

impl WsConnector {
    pub fn new(origin: &str) -> Result<Self, TransportError> {
        Ok(Self {
            origin: Url::parse(origin)?,
        })
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, kernel_id: &str) -> Result<Box<dyn KernelSocket>, TransportError> {
        let url = socket_url(&self.origin, kernel_id)?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("[ws] Connected to {}", url);
        Ok(Box::new(WsSocket::spawn(stream)))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Split socket: a reader task forwards text frames, the writer stays here.
pub struct WsSocket {
    writer: SplitSink<WsStream, Message>,
    inbound: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl WsSocket {
    fn spawn(stream: WsStream) -> Self {
        let (writer, mut reader) = stream.split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = open.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("[ws] Closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("[ws] Read error: {}", e);
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
        });

        Self {
            writer,
            inbound,
            open,
            reader,
        }
    }
}

#[async_trait]
impl KernelSocket for WsSocket {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.writer.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            })))
            .await?;
        Ok(())
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
