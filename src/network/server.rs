//! FrameLink Server
//!
//! A local frame receiver. It accepts connections, decodes the first frame
//! on each and answers with a one-line acknowledgement.

use bytes::BytesMut;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::protocol::{CodecError, Frame, FrameDecoder, FRAME_SIZE};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Listener is accepting connections
    Started {
        bind_addr: SocketAddr,
    },
    /// A frame was decoded and acknowledged
    FrameReceived {
        addr: SocketAddr,
        frame: Frame,
    },
    /// A frame was rejected
    FrameRejected {
        addr: SocketAddr,
        error: String,
    },
    /// A client went away before sending a whole frame
    ClientDisconnected {
        addr: SocketAddr,
    },
    /// Server stopped
    Stopped,
    /// Error occurred
    Error {
        message: String,
    },
}

/// FrameLink Server
pub struct Server {
    /// Address to bind
    bind_addr: SocketAddr,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Server {
    /// Create a new server
    pub fn new(bind_addr: SocketAddr) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            bind_addr,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Start accepting connections; returns the bound address
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.shutdown_tx.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| ServerError::BindFailed(format!("{}: {}", self.bind_addr, e)))?;
        let bind_addr = listener.local_addr()?;

        tracing::info!("Frame server listening on {}", bind_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let event_tx = self.event_tx.clone();
        let _ = event_tx.send(ServerEvent::Started { bind_addr }).await;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                tracing::debug!("Accepted connection from {}", addr);
                                let event_tx = event_tx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, addr, &event_tx).await {
                                        tracing::warn!("Connection {} failed: {}", addr, e);
                                        let _ = event_tx.send(ServerEvent::Error {
                                            message: format!("{}: {}", addr, e),
                                        }).await;
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                let _ = event_tx.send(ServerEvent::Error {
                                    message: e.to_string(),
                                }).await;
                            }
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            tracing::info!("Frame server stopped");
            let _ = event_tx.send(ServerEvent::Stopped).await;
        });

        Ok(bind_addr)
    }

    /// Stop accepting connections
    pub async fn stop(&mut self) -> ServerResult<()> {
        match self.shutdown_tx.take() {
            Some(tx) => {
                let _ = tx.send(()).await;
                Ok(())
            }
            None => Err(ServerError::NotRunning),
        }
    }

    /// Check if the accept loop is running
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }
}

/// Read one frame from the client and answer it
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    event_tx: &mpsc::Sender<ServerEvent>,
) -> std::io::Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::with_capacity(FRAME_SIZE);

    let decoded = loop {
        match decoder.decode(&mut buf) {
            Ok(Some(frame)) => break Ok(frame),
            Ok(None) => {}
            Err(e) => break Err(e),
        }

        if stream.read_buf(&mut buf).await? == 0 {
            tracing::debug!("{} disconnected after {} bytes", addr, buf.len());
            let _ = event_tx.send(ServerEvent::ClientDisconnected { addr }).await;
            return Ok(());
        }
    };

    tracing::debug!("{} frame(s) decoded from {}", decoder.frames_decoded(), addr);
    let response = acknowledge(&decoded);
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;

    let event = match decoded {
        Ok(frame) => {
            tracing::info!(
                "{} sent {} (address={}, payload_length={})",
                addr,
                response.trim_end(),
                frame.ipv4(),
                frame.payload_length()
            );
            match frame.kind() {
                Ok(_) => ServerEvent::FrameReceived { addr, frame },
                Err(e) => ServerEvent::FrameRejected {
                    addr,
                    error: e.to_string(),
                },
            }
        }
        Err(e) => {
            tracing::warn!("Rejected data from {}: {}", addr, e);
            ServerEvent::FrameRejected {
                addr,
                error: e.to_string(),
            }
        }
    };
    let _ = event_tx.send(event).await;

    Ok(())
}

/// Build the one-line answer for a decode result
pub fn acknowledge(decoded: &Result<Frame, CodecError>) -> String {
    match decoded {
        Ok(frame) => match frame.kind() {
            Ok(kind) => format!("ACK {}\n", kind),
            Err(e) => format!("NAK {}\n", e),
        },
        Err(e) => format!("NAK {}\n", e),
    }
}
