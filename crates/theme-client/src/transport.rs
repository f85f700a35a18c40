//! Transport bindings over a [`Connection`].
//!
//! - [`StreamTransport`]: one outstanding request per connection
//! - [`CallTransport`]: up to `max_concurrent_calls` requests in flight,
//!   each completed by request id

use std::time::Duration;

use async_trait::async_trait;
use theme_config_and_utils::Config;
use theme_ipc::{Frame, ProtocolId};
use tokio::sync::{Mutex, Semaphore};

use crate::demux::Connection;
use crate::error::{ClientError, ClientResult};

/// Request/reply channel to the theme server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its reply frame.
    async fn call(&self, protocol: ProtocolId, opcode: u16, body: Vec<u8>) -> ClientResult<Frame>;

    /// Send a request the server does not answer.
    async fn post(&self, protocol: ProtocolId, opcode: u16, body: Vec<u8>) -> ClientResult<()>;

    fn is_connected(&self) -> bool;

    /// Epoch of the underlying connection.
    fn epoch(&self) -> u32;
}

/// Which binding a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Stream,
    Call,
}

impl TransportKind {
    pub fn build(self, connection: Connection, config: &Config) -> Box<dyn Transport> {
        let timeout = config.request_timeout();
        match self {
            Self::Stream => Box::new(StreamTransport::new(connection, timeout)),
            Self::Call => Box::new(CallTransport::new(
                connection,
                config.max_concurrent_calls,
                timeout,
            )),
        }
    }
}

/// Byte-stream binding: write, flush, await the reply.
pub struct StreamTransport {
    connection: Connection,
    call_lock: Mutex<()>,
    timeout: Option<Duration>,
}

impl StreamTransport {
    pub fn new(connection: Connection, timeout: Option<Duration>) -> Self {
        Self {
            connection,
            call_lock: Mutex::new(()),
            timeout,
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn call(&self, protocol: ProtocolId, opcode: u16, body: Vec<u8>) -> ClientResult<Frame> {
        let _outstanding = self.call_lock.lock().await;
        let frame = Frame::request(protocol, opcode, self.connection.next_request_id(), body);
        self.connection.call(frame, self.timeout).await
    }

    async fn post(&self, protocol: ProtocolId, opcode: u16, body: Vec<u8>) -> ClientResult<()> {
        let _outstanding = self.call_lock.lock().await;
        let frame = Frame::request(protocol, opcode, self.connection.next_request_id(), body);
        self.connection.send(&frame).await
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn epoch(&self) -> u32 {
        self.connection.epoch()
    }
}

/// Call-based binding with a bounded number of calls in flight.
pub struct CallTransport {
    connection: Connection,
    permits: Semaphore,
    timeout: Option<Duration>,
}

impl CallTransport {
    pub fn new(connection: Connection, max_concurrent_calls: usize, timeout: Option<Duration>) -> Self {
        Self {
            connection,
            permits: Semaphore::new(max_concurrent_calls.max(1)),
            timeout,
        }
    }
}

#[async_trait]
impl Transport for CallTransport {
    async fn call(&self, protocol: ProtocolId, opcode: u16, body: Vec<u8>) -> ClientResult<Frame> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClientError::NotConnected)?;
        let frame = Frame::request(protocol, opcode, self.connection.next_request_id(), body);
        self.connection.call(frame, self.timeout).await
    }

    async fn post(&self, protocol: ProtocolId, opcode: u16, body: Vec<u8>) -> ClientResult<()> {
        let frame = Frame::request(protocol, opcode, self.connection.next_request_id(), body);
        self.connection.send(&frame).await
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn epoch(&self) -> u32 {
        self.connection.epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use theme_ipc::{write_frame, CoreOpcode, FrameReader};
    use tokio::net::UnixStream;

    /// Echo server that holds each reply for `delay` and tracks the peak
    /// number of requests it has seen unanswered.
    fn spawn_echo(server: UnixStream, delay: Duration) -> Arc<AtomicUsize> {
        let peak = Arc::new(AtomicUsize::new(0));
        let peak_out = peak.clone();
        tokio::spawn(async move {
            let (read_half, write_half) = server.into_split();
            let writer = Arc::new(Mutex::new(write_half));
            let open = Arc::new(AtomicUsize::new(0));
            let mut reader = FrameReader::new(read_half);
            while let Ok(Some(req)) = reader.next_frame().await {
                let now = open.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let writer = writer.clone();
                let open = open.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    open.fetch_sub(1, Ordering::SeqCst);
                    let reply = Frame::reply_to(&req, req.request_id.to_le_bytes().to_vec());
                    let mut w = writer.lock().await;
                    let _ = write_frame(&mut *w, &reply).await;
                });
            }
        });
        peak_out
    }

    async fn run_concurrent(transport: Arc<dyn Transport>, calls: usize) {
        let mut handles = Vec::new();
        for _ in 0..calls {
            let t = transport.clone();
            handles.push(tokio::spawn(async move {
                let reply = t
                    .call(ProtocolId::Core, CoreOpcode::FreeSharedMemory.as_u16(), Vec::new())
                    .await
                    .unwrap();
                assert_eq!(reply.body, reply.request_id.to_le_bytes().to_vec());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stream_transport_single_outstanding() {
        let (client, server) = UnixStream::pair().unwrap();
        let peak = spawn_echo(server, Duration::from_millis(10));
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new(
            Connection::from_stream(client, EventQueue::new()),
            None,
        ));

        run_concurrent(transport, 5).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_transport_bounded_concurrency() {
        let (client, server) = UnixStream::pair().unwrap();
        let peak = spawn_echo(server, Duration::from_millis(30));
        let transport: Arc<dyn Transport> = Arc::new(CallTransport::new(
            Connection::from_stream(client, EventQueue::new()),
            2,
            None,
        ));

        run_concurrent(transport, 6).await;
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak {} exceeds limit", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_build_uses_request_timeout() {
        let (client, _server) = UnixStream::pair().unwrap();
        let mut config = Config::new();
        config.request_timeout_ms = Some(20);
        let transport = TransportKind::Call.build(
            Connection::from_stream(client, EventQueue::new()),
            &config,
        );

        let result = transport
            .call(ProtocolId::Core, CoreOpcode::FreeSharedMemory.as_u16(), Vec::new())
            .await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        assert!(transport.is_connected());
    }
}
