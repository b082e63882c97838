//! Connection Registry (C2)
//!
//! Process-local map from document id to the set of locally-attached
//! sockets. Fan-out is snapshot-then-iterate so a send failure on one
//! socket (which triggers its own detach) can never invalidate a
//! broadcast in progress to its peers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::codec::Envelope;
use crate::types::DocumentId;

/// One locally-attached socket's outbound channel.
#[derive(Debug, Clone)]
pub struct SocketHandle {
	pub connection_id: Box<str>,
	sender: broadcast::Sender<Envelope>,
}

#[derive(Clone, Debug, Default)]
pub struct RegistryConfig {
	pub buffer_size: usize,
}

impl RegistryConfig {
	fn buffer_size_or_default(&self) -> usize {
		if self.buffer_size == 0 {
			256
		} else {
			self.buffer_size
		}
	}
}

type RegistryMap = HashMap<DocumentId, Vec<SocketHandle>>;

/// Registry of locally-attached sockets, keyed by document id.
#[derive(Debug)]
pub struct Registry {
	docs: Arc<RwLock<RegistryMap>>,
	config: RegistryConfig,
}

impl Registry {
	pub fn new() -> Self {
		Self::with_config(RegistryConfig::default())
	}

	pub fn with_config(config: RegistryConfig) -> Self {
		Self { docs: Arc::new(RwLock::new(HashMap::new())), config }
	}

	/// Register a new socket for `doc_id`, returning its inbound receiver and
	/// whether this was the first socket for the document (i.e. the caller
	/// should `Bridge::subscribe`).
	pub async fn attach(&self, doc_id: &DocumentId, connection_id: &str) -> (broadcast::Receiver<Envelope>, bool) {
		let (tx, rx) = broadcast::channel(self.config.buffer_size_or_default());
		let handle = SocketHandle { connection_id: connection_id.into(), sender: tx };

		let mut docs = self.docs.write().await;
		let sockets = docs.entry(doc_id.clone()).or_default();
		let was_empty = sockets.is_empty();
		sockets.push(handle);
		tracing::debug!(doc_id = %doc_id, connection_id, "socket attached");
		(rx, was_empty)
	}

	/// Remove a socket. Returns whether the document now has zero local
	/// sockets (i.e. the caller should `Bridge::unsubscribe`).
	pub async fn detach(&self, doc_id: &DocumentId, connection_id: &str) -> bool {
		let mut docs = self.docs.write().await;
		let now_empty = if let Some(sockets) = docs.get_mut(doc_id) {
			sockets.retain(|s| s.connection_id.as_ref() != connection_id);
			sockets.is_empty()
		} else {
			true
		};
		if now_empty {
			docs.remove(doc_id);
		}
		tracing::debug!(doc_id = %doc_id, connection_id, "socket detached");
		now_empty
	}

	/// Number of local sockets currently attached to `doc_id`.
	pub async fn count(&self, doc_id: &DocumentId) -> usize {
		self.docs.read().await.get(doc_id).map_or(0, Vec::len)
	}

	/// Send `envelope` to every socket attached to `doc_id`.
	pub async fn broadcast(&self, doc_id: &DocumentId, envelope: Envelope) {
		self.broadcast_except(doc_id, envelope, None).await;
	}

	/// Send `envelope` to every socket attached to `doc_id` except
	/// `exclude_connection_id`.
	pub async fn broadcast_except(
		&self,
		doc_id: &DocumentId,
		envelope: Envelope,
		exclude_connection_id: Option<&str>,
	) {
		// Snapshot the socket list before sending: a failed send below drops
		// that socket's receiver, but must not perturb this iteration.
		let sockets: Vec<SocketHandle> = {
			let docs = self.docs.read().await;
			match docs.get(doc_id) {
				Some(sockets) => sockets.clone(),
				None => return,
			}
		};

		for socket in &sockets {
			if exclude_connection_id == Some(socket.connection_id.as_ref()) {
				continue;
			}
			// A closed receiver here means the session's read loop has
			// already ended; its own cleanup path will call `detach`.
			let _ = socket.sender.send(envelope.clone());
		}
	}
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn doc(id: &str) -> DocumentId {
		DocumentId::new(id)
	}

	#[tokio::test]
	async fn attach_reports_first_socket() {
		let registry = Registry::new();
		let (_rx, was_first) = registry.attach(&doc("A"), "conn-1").await;
		assert!(was_first);
		assert_eq!(registry.count(&doc("A")).await, 1);
	}

	#[tokio::test]
	async fn second_attach_is_not_first() {
		let registry = Registry::new();
		let _ = registry.attach(&doc("A"), "conn-1").await;
		let (_rx, was_first) = registry.attach(&doc("A"), "conn-2").await;
		assert!(!was_first);
		assert_eq!(registry.count(&doc("A")).await, 2);
	}

	#[tokio::test]
	async fn detach_reports_when_doc_becomes_empty() {
		let registry = Registry::new();
		let _ = registry.attach(&doc("A"), "conn-1").await;
		let now_empty = registry.detach(&doc("A"), "conn-1").await;
		assert!(now_empty);
		assert_eq!(registry.count(&doc("A")).await, 0);
	}

	#[tokio::test]
	async fn broadcast_reaches_all_sockets_for_the_doc() {
		let registry = Registry::new();
		let (mut rx1, _) = registry.attach(&doc("A"), "conn-1").await;
		let (mut rx2, _) = registry.attach(&doc("A"), "conn-2").await;

		registry.broadcast(&doc("A"), Envelope::update_from_bytes(b"x")).await;

		assert!(matches!(rx1.recv().await.unwrap(), Envelope::Update { .. }));
		assert!(matches!(rx2.recv().await.unwrap(), Envelope::Update { .. }));
	}

	#[tokio::test]
	async fn broadcast_except_skips_the_sender() {
		let registry = Registry::new();
		let (mut rx1, _) = registry.attach(&doc("A"), "conn-1").await;
		let (mut rx2, _) = registry.attach(&doc("A"), "conn-2").await;

		registry
			.broadcast_except(&doc("A"), Envelope::update_from_bytes(b"x"), Some("conn-1"))
			.await;

		assert!(rx2.recv().await.is_ok());
		assert!(rx1.try_recv().is_err());
	}

	#[tokio::test]
	async fn documents_are_isolated() {
		let registry = Registry::new();
		let (mut rx_a, _) = registry.attach(&doc("A"), "conn-1").await;
		let (mut rx_b, _) = registry.attach(&doc("B"), "conn-2").await;

		registry.broadcast(&doc("A"), Envelope::update_from_bytes(b"x")).await;

		assert!(rx_a.recv().await.is_ok());
		assert!(rx_b.try_recv().is_err());
	}
}

// vim: ts=4
