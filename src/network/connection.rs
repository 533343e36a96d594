//! Connection handling
//!
//! One connection carries strictly alternating frames: every send is
//! matched by exactly one receive before the next send on the same side.

use bytes::BytesMut;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::NetworkConfig;
use crate::protocol::{CodecError, Decoder, Encoder, KO};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for exchanges
    Open,
    /// Shut down locally or by the remote side
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A connection to the remote side of a session
pub struct Connection {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The TCP stream
    stream: TcpStream,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl Connection {
    /// Wrap an established TCP stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            remote_addr,
            stream,
            encoder: Encoder::with_max_frame_size(config.max_frame_size),
            decoder: Decoder::with_max_frame_size(config.max_frame_size),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            state: ConnectionState::Open,
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Send one frame
    pub async fn send(&mut self, payload: &str) -> ConnectionResult<()> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }

        self.write_buf.clear();
        self.encoder.encode(payload, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        Ok(())
    }

    /// Receive one frame (returns None on a clean close).
    ///
    /// A close in the middle of a frame is an error.
    pub async fn recv(&mut self) -> ConnectionResult<Option<String>> {
        loop {
            if let Some(payload) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.frames_received += 1;
                return Ok(Some(payload));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                self.state = ConnectionState::Closed;
                if self.read_buf.is_empty() && !self.decoder.is_mid_frame() {
                    return Ok(None);
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Receive one frame, treating a close as an error
    async fn recv_expected(&mut self) -> ConnectionResult<String> {
        self.recv().await?.ok_or(ConnectionError::Closed)
    }

    /// Send a frame, then block for the reply on the same connection
    pub async fn exchange(&mut self, payload: &str) -> ConnectionResult<String> {
        self.send(payload).await?;
        let received = self.recv_expected().await?;

        tracing::debug!(
            peer = %self.remote_addr,
            sent = payload,
            received = %received,
            "exchange"
        );
        Ok(received)
    }

    /// Block for a frame, then answer it with `payload`
    pub async fn reply_after_receive(&mut self, payload: &str) -> ConnectionResult<String> {
        let received = self.recv_expected().await?;
        self.send(payload).await?;

        tracing::debug!(
            peer = %self.remote_addr,
            received = %received,
            sent = payload,
            "reply after receive"
        );
        Ok(received)
    }

    /// Block for a frame, then answer `answer` if it equals `keyword` and
    /// `KO` otherwise. Returns whether it matched.
    pub async fn reply_if_keyword(&mut self, keyword: &str, answer: &str) -> ConnectionResult<bool> {
        let received = self.recv_expected().await?;
        let matched = received == keyword;
        self.send(if matched { answer } else { KO }).await?;

        tracing::debug!(
            peer = %self.remote_addr,
            received = %received,
            keyword,
            matched,
            "reply if keyword"
        );
        Ok(matched)
    }

    /// Close the connection
    pub async fn close(&mut self) -> ConnectionResult<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;

        tracing::debug!(
            peer = %self.remote_addr,
            frames_sent = self.stats.frames_sent,
            frames_received = self.stats.frames_received,
            bytes_sent = self.stats.bytes_sent,
            bytes_received = self.stats.bytes_received,
            "closing connection"
        );

        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            // The remote side may already be gone at end of session
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
