//! FrameLink transport
//!
//! One request per connection: connect, write a single frame, read a
//! single reply. There is no retry; every failure ends the exchange.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::NetworkConfig;
use crate::protocol::{Frame, FRAME_SIZE};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(#[source] std::io::Error),

    #[error("Connection timeout after {0} ms")]
    ConnectTimeout(u64),

    #[error("Send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("No reply within {0} ms")]
    ReceiveTimeout(u64),

    #[error("Reply buffer size must be non-zero")]
    ZeroReplyBuffer,

    #[error("Invalid transport state: expected {expected}, found {actual}")]
    InvalidState {
        expected: TransportState,
        actual: TransportState,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Lifecycle of a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Sent,
    AwaitingReply,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of the reply read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bytes returned by the server, unstructured
    Data(Bytes),
    /// The server closed the connection without replying
    GracefulClose,
}

impl Reply {
    /// Reply bytes as text, if any were received
    pub fn text(&self) -> Option<String> {
        match self {
            Reply::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Reply::GracefulClose => None,
        }
    }
}

/// A one-shot exchange over a byte stream
pub struct Transport<S> {
    stream: S,
    peer: String,
    state: TransportState,
    config: NetworkConfig,
}

impl Transport<TcpStream> {
    /// Connect to the server at `addr`
    pub async fn connect(addr: SocketAddr, config: NetworkConfig) -> TransportResult<Self> {
        check_reply_buffer(&config)?;
        tracing::debug!("Transport {} -> {}", TransportState::Disconnected, TransportState::Connecting);
        tracing::info!("Connecting to {}", addr);

        let stream = within_connect_timeout(&config, TcpStream::connect(addr)).await?;

        tracing::info!("Connected to {}", addr);
        Ok(Self::from_stream(stream, addr.to_string(), config))
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream
    pub fn from_stream(stream: S, peer: impl Into<String>, config: NetworkConfig) -> Self {
        let mut transport = Self {
            stream,
            peer: peer.into(),
            state: TransportState::Connecting,
            config,
        };
        transport.transition(TransportState::Connected);
        transport
    }

    /// Get the current state
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Write exactly one frame
    pub async fn send_frame(&mut self, frame: &Frame) -> TransportResult<()> {
        self.expect_state(TransportState::Connected)?;

        let mut buf = BytesMut::with_capacity(FRAME_SIZE);
        frame.encode(&mut buf);
        let written = async {
            self.stream.write_all(&buf).await?;
            self.stream.flush().await
        }
        .await;

        if let Err(e) = written {
            self.transition(TransportState::Closed);
            return Err(TransportError::Send(e));
        }

        match frame.kind() {
            Ok(kind) => tracing::info!("Sent {} message to {}", kind, self.peer),
            Err(_) => tracing::info!("Sent message type {} to {}", frame.message_type(), self.peer),
        }
        tracing::debug!(
            "Frame address={} payload_length={}",
            frame.ipv4(),
            frame.payload_length()
        );
        self.transition(TransportState::Sent);
        Ok(())
    }

    /// Perform the single reply read
    pub async fn await_reply(&mut self) -> TransportResult<Reply> {
        self.expect_state(TransportState::Sent)?;
        check_reply_buffer(&self.config)?;
        self.transition(TransportState::AwaitingReply);

        let mut buf = vec![0u8; self.config.reply_buffer_size];
        let outcome = match self.config.read_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.stream.read(&mut buf)).await.ok(),
            None => Some(self.stream.read(&mut buf).await),
        };
        self.transition(TransportState::Closed);

        let result = match outcome {
            Some(result) => result,
            None => {
                return Err(TransportError::ReceiveTimeout(
                    self.config.read_timeout_ms.unwrap_or_default(),
                ))
            }
        };

        match result {
            Ok(0) => {
                tracing::debug!("{} closed the connection", self.peer);
                Ok(Reply::GracefulClose)
            }
            Ok(n) => {
                buf.truncate(n);
                tracing::debug!("Received {} bytes from {}", n, self.peer);
                Ok(Reply::Data(Bytes::from(buf)))
            }
            Err(e) => Err(TransportError::Receive(e)),
        }
    }

    /// Shut down the write half and drop the stream
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
        self.transition(TransportState::Closed);
    }

    fn expect_state(&self, expected: TransportState) -> TransportResult<()> {
        if self.state != expected {
            return Err(TransportError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: TransportState) {
        if self.state != next {
            tracing::debug!("Transport {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// A zero-sized read buffer would report every reply as a remote close
fn check_reply_buffer(config: &NetworkConfig) -> TransportResult<()> {
    if config.reply_buffer_size == 0 {
        return Err(TransportError::ZeroReplyBuffer);
    }
    Ok(())
}

async fn within_connect_timeout<S, F>(config: &NetworkConfig, connect: F) -> TransportResult<S>
where
    F: Future<Output = std::io::Result<S>>,
{
    match tokio::time::timeout(config.connect_timeout(), connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::Connection(e)),
        Err(_) => Err(TransportError::ConnectTimeout(config.connect_timeout_ms)),
    }
}

/// Run a full exchange against a resolved address
#[cfg(test)]
pub(crate) async fn exchange(addr: SocketAddr, frame: &Frame, config: NetworkConfig) -> TransportResult<Reply> {
    let mut transport = Transport::connect(addr, config).await?;
    transport.send_frame(frame).await?;
    let reply = transport.await_reply().await?;
    transport.close().await;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use std::io;
    use tokio::net::TcpListener;

    fn create_meeting() -> Frame {
        Frame::new(MessageKind::CreateMeeting)
    }

    #[tokio::test]
    async fn test_reply_data() {
        let frame = create_meeting();
        let mock = tokio_test::io::Builder::new()
            .write(&frame.to_bytes())
            .read(b"meeting created")
            .build();

        let mut transport = Transport::from_stream(mock, "mock", NetworkConfig::default());
        assert_eq!(transport.state(), TransportState::Connected);

        transport.send_frame(&frame).await.unwrap();
        assert_eq!(transport.state(), TransportState::Sent);

        let reply = transport.await_reply().await.unwrap();
        assert_eq!(reply.text().as_deref(), Some("meeting created"));
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_zero_length_read_is_graceful_close() {
        let frame = create_meeting();
        let mock = tokio_test::io::Builder::new().write(&frame.to_bytes()).build();

        let mut transport = Transport::from_stream(mock, "mock", NetworkConfig::default());
        transport.send_frame(&frame).await.unwrap();

        let reply = transport.await_reply().await.unwrap();
        assert_eq!(reply, Reply::GracefulClose);
        assert_eq!(reply.text(), None);
    }

    #[tokio::test]
    async fn test_send_failure() {
        let mock = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
            .build();

        let mut transport = Transport::from_stream(mock, "mock", NetworkConfig::default());
        let err = transport.send_frame(&create_meeting()).await.unwrap_err();
        assert!(matches!(err, TransportError::Send(_)));
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_receive_failure() {
        let frame = create_meeting();
        let mock = tokio_test::io::Builder::new()
            .write(&frame.to_bytes())
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let mut transport = Transport::from_stream(mock, "mock", NetworkConfig::default());
        transport.send_frame(&frame).await.unwrap();
        let err = transport.await_reply().await.unwrap_err();
        assert!(matches!(err, TransportError::Receive(_)));
    }

    #[tokio::test]
    async fn test_operations_are_one_shot() {
        let mock = tokio_test::io::Builder::new().build();
        let mut transport = Transport::from_stream(mock, "mock", NetworkConfig::default());

        let err = transport.await_reply().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::InvalidState {
                expected: TransportState::Sent,
                actual: TransportState::Connected,
            }
        ));
    }

    #[tokio::test]
    async fn test_reply_limited_to_buffer_size() {
        let frame = create_meeting();
        let mock = tokio_test::io::Builder::new()
            .write(&frame.to_bytes())
            .read(b"abcd")
            .read(b"efgh")
            .build();

        let config = NetworkConfig {
            reply_buffer_size: 4,
            ..Default::default()
        };
        let mut transport = Transport::from_stream(mock, "mock", config);
        transport.send_frame(&frame).await.unwrap();
        let reply = transport.await_reply().await.unwrap();
        assert_eq!(reply, Reply::Data(Bytes::from_static(b"abcd")));

        // Drain the unread part so the mock is satisfied on drop.
        let mut rest = [0u8; 4];
        transport.stream.read_exact(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_reply_buffer_rejected_before_read() {
        let frame = create_meeting();
        let mock = tokio_test::io::Builder::new().write(&frame.to_bytes()).build();

        let config = NetworkConfig {
            reply_buffer_size: 0,
            ..Default::default()
        };
        let mut transport = Transport::from_stream(mock, "mock", config);
        transport.send_frame(&frame).await.unwrap();
        let err = transport.await_reply().await.unwrap_err();
        assert!(matches!(err, TransportError::ZeroReplyBuffer));
        assert_eq!(transport.state(), TransportState::Sent);
    }

    #[tokio::test]
    async fn test_zero_reply_buffer_rejected_before_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = NetworkConfig {
            reply_buffer_size: 0,
            ..Default::default()
        };
        let err = exchange(addr, &create_meeting(), config).await.unwrap_err();
        assert!(matches!(err, TransportError::ZeroReplyBuffer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let config = NetworkConfig {
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let never = std::future::pending::<io::Result<TcpStream>>();

        let err = within_connect_timeout(&config, never).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectTimeout(200)));
    }

    #[tokio::test]
    async fn test_connect_error_passes_through() {
        let config = NetworkConfig::default();
        let failed = async { Err::<TcpStream, _>(io::Error::from(io::ErrorKind::ConnectionRefused)) };

        let err = within_connect_timeout(&config, failed).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[tokio::test]
    async fn test_exchange_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = [0u8; FRAME_SIZE];
            stream.read_exact(&mut frame).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
            frame
        });

        let reply = exchange(addr, &create_meeting(), NetworkConfig::default()).await.unwrap();
        assert_eq!(reply.text().as_deref(), Some("hello"));

        let received = server.await.unwrap();
        assert_eq!(received, [0x24, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0x23]);
    }

    #[tokio::test]
    async fn test_server_close_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = [0u8; FRAME_SIZE];
            stream.read_exact(&mut frame).await.unwrap();
        });

        let reply = exchange(addr, &create_meeting(), NetworkConfig::default()).await.unwrap();
        assert_eq!(reply, Reply::GracefulClose);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = exchange(addr, &create_meeting(), NetworkConfig::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            let _ = hold_rx.await;
        });

        let config = NetworkConfig::default().with_read_timeout(50);
        let err = exchange(addr, &create_meeting(), config).await.unwrap_err();
        assert!(matches!(err, TransportError::ReceiveTimeout(50)));
        let _ = hold_tx.send(());
    }
}
