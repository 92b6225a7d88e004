//! Guards the one-time transition from a CONNECT tunnel to its TLS-terminated
//! stream.
//!
//! A CONNECT request's underlying `TcpStream` is handed off exactly once: the
//! engine writes `200 Connection Established`, then the same socket is
//! upgraded in place to carry the TLS handshake for the intercepted
//! connection. `OnceListener` makes that hand-off an explicit, checked
//! operation instead of a bare `Option::take` scattered through the engine,
//! so a bug that tries to reuse an already-upgraded socket fails loudly
//! instead of silently double-writing to it.
//!
//! Once the stream is taken, everything downstream — the TLS-terminated
//! connection included — follows ordinary HTTP/1.1 keep-alive semantics:
//! the tunnel is not limited to a single request/response pair, the same
//! resolution [`crate::server`] makes for plain connections.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnceListenerError {
    #[error("the underlying stream has already been taken for upgrade")]
    AlreadyAccepted,
}

/// Wraps a stream that must be handed off for upgrade exactly once.
pub struct OnceListener<S> {
    stream: Option<S>,
}

impl<S> OnceListener<S> {
    pub fn new(stream: S) -> Self {
        Self { stream: Some(stream) }
    }

    /// Takes the underlying stream, consuming this listener's hold on it.
    ///
    /// Returns [`OnceListenerError::AlreadyAccepted`] if called more than
    /// once.
    pub fn take(&mut self) -> Result<S, OnceListenerError> {
        self.stream.take().ok_or(OnceListenerError::AlreadyAccepted)
    }

    /// Returns `true` if the stream has already been taken.
    pub fn is_taken(&self) -> bool {
        self.stream.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_once_succeeds() {
        let mut listener = OnceListener::new(42);
        assert_eq!(listener.take().unwrap(), 42);
        assert!(listener.is_taken());
    }

    #[test]
    fn take_twice_errors() {
        let mut listener = OnceListener::new(42);
        listener.take().unwrap();
        assert!(matches!(listener.take(), Err(OnceListenerError::AlreadyAccepted)));
    }
}
