//! In-process connector with a scripted server side.
//!
//! Each `connect` consumes the next scripted outcome: accept (yielding a
//! [`MemoryPeer`] the caller drives), refuse, or hang forever. An empty script
//! refuses.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::transport::{Connector, Frame, Socket, TransportError};

enum Outcome {
    Accept(Socket),
    Refuse(String),
    Hang,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Outcome>,
    urls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accept the next connect; returns the server end of that socket.
    pub fn accept_next(&self) -> MemoryPeer {
        let (client_tx, server_rx) = mpsc::unbounded::<String>();
        let (server_tx, client_rx) = mpsc::unbounded::<Result<Frame, TransportError>>();

        let sink = client_tx.sink_map_err(|_| TransportError::Closed);
        let socket = Socket::new(Box::pin(sink), Box::pin(client_rx));
        self.lock().script.push_back(Outcome::Accept(socket));

        MemoryPeer {
            to_client: server_tx,
            from_client: server_rx,
        }
    }

    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.lock().script.push_back(Outcome::Refuse(reason.into()));
    }

    /// The next connect never completes.
    pub fn hang_next(&self) {
        self.lock().script.push_back(Outcome::Hang);
    }

    /// Number of connect calls so far.
    pub fn attempts(&self) -> usize {
        self.lock().urls.len()
    }

    /// URLs passed to each connect call, in order.
    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryConnector")
            .field("scripted", &inner.script.len())
            .field("attempts", &inner.urls.len())
            .finish()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError> {
        let outcome = {
            let mut inner = self.lock();
            inner.urls.push(url.to_string());
            inner.script.pop_front()
        };

        match outcome {
            Some(Outcome::Accept(socket)) => Ok(socket),
            Some(Outcome::Refuse(reason)) => Err(TransportError::Connect(reason)),
            Some(Outcome::Hang) => futures::future::pending().await,
            None => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

/// Server end of an accepted in-memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(Ok(Frame::Text(text.into())))
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    pub fn send_binary(&self, data: Vec<u8>) -> bool {
        self.push(Ok(Frame::Binary(data)))
    }

    /// Send a close frame.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.push(Ok(Frame::Close {
            code: Some(code),
            reason: reason.to_string(),
        }))
    }

    /// Deliver a socket error to the client.
    pub fn fail(&self, error: TransportError) -> bool {
        self.push(Err(error))
    }

    /// Next text frame the client sent; `None` once the client dropped its end.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// A frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.next().now_or_never().flatten()
    }

    /// Whether the client still holds its end of the socket.
    pub fn is_client_connected(&self) -> bool {
        !self.to_client.is_closed()
    }

    fn push(&self, frame: Result<Frame, TransportError>) -> bool {
        self.to_client.unbounded_send(frame).is_ok()
    }
}
