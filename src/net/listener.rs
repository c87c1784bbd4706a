//! TCP listener with admission control.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Decide admission for each one against `max_connections`
//!
//! Admission is a non-blocking `try_acquire` on a semaphore: the check and
//! the increment are one atomic step, and the permit's drop is the
//! decrement. Over-limit clients are accepted at the TCP level and handed
//! back without a permit so the caller can tell them the server is full.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// Shared count of admitted connections.
#[derive(Debug, Clone)]
pub struct Admission {
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Admission {
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Take a slot if one is free. Never waits.
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Connections currently holding a slot.
    pub fn active(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One admitted connection's slot. Dropping it frees the slot, including
/// when the worker holding it panics.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// A freshly accepted connection. `permit` is `None` when the server was
/// full at accept time.
#[derive(Debug)]
pub struct Incoming {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: Option<AdmissionPermit>,
}

/// A TCP listener that admits at most `max_connections` clients at once.
pub struct Listener {
    inner: TcpListener,
    admission: Admission,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::from_std(listener, config.max_connections)
    }

    /// Wrap an already bound listener.
    pub fn from_std(inner: TcpListener, max_connections: usize) -> Result<Self, ListenerError> {
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %local_addr, max_connections, "Listener bound");

        Ok(Self {
            inner,
            admission: Admission::new(max_connections),
        })
    }

    /// Accept the next connection and decide its admission.
    pub async fn accept(&self) -> Result<Incoming, ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let permit = self.admission.try_admit();

        tracing::debug!(
            peer_addr = %peer,
            admitted = permit.is_some(),
            active = self.admission.active(),
            "Connection accepted"
        );

        Ok(Incoming { stream, peer, permit })
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn max_connections(&self) -> usize {
        self.admission.max_connections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_is_bounded() {
        let admission = Admission::new(2);

        let a = admission.try_admit().unwrap();
        let b = admission.try_admit().unwrap();
        assert!(admission.try_admit().is_none());
        assert_eq!(admission.active(), 2);

        drop(a);
        assert_eq!(admission.active(), 1);
        let _c = admission.try_admit().unwrap();
        drop(b);
        assert_eq!(admission.active(), 1);
    }

    #[test]
    fn concurrent_admission_never_overshoots() {
        let admission = Admission::new(4);
        let admitted: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| admission.try_admit()))
                .collect();
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(admitted.len(), 4);
        assert_eq!(admission.active(), 4);
    }

    #[tokio::test]
    async fn over_limit_connections_have_no_permit() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_std(inner, 1).unwrap();
        let addr = listener.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        let admitted = listener.accept().await.unwrap();
        assert!(admitted.permit.is_some());

        let _second = TcpStream::connect(addr).await.unwrap();
        let rejected = listener.accept().await.unwrap();
        assert!(rejected.permit.is_none());
        assert_eq!(listener.admission().active(), 1);
    }
}
