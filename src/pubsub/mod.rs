//! Pub/Sub Bridge (C3)
//!
//! Owns the cross-replica fan-out substrate. The transport is abstracted
//! behind `PubSubTransport` (the same `Arc<dyn Trait>` adapter idiom used
//! for the external Auth/Metadata services) so a Redis-backed transport and
//! an in-memory one (single-replica deployments, tests) are interchangeable.

pub mod memory;
pub mod redis_transport;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::Envelope;
use crate::prelude::*;
use crate::registry::Registry;
use crate::types::DocumentId;

/// A transport capable of publishing to, and subscribing on, named channels.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
	async fn publish(&self, channel: &str, payload: &str) -> ClResult<()>;
	async fn subscribe(&self, channel: &str) -> ClResult<()>;
	async fn unsubscribe(&self, channel: &str) -> ClResult<()>;

	/// Runs the receive loop, invoking `on_message` for every payload
	/// delivered on any subscribed channel, until cancelled.
	async fn run(
		&self,
		on_message: mpsc::UnboundedSender<(String, String)>,
		cancel: CancellationToken,
	) -> ClResult<()>;
}

struct SubscriptionState {
	ref_count: usize,
	pending_unsubscribe: Option<JoinHandle<()>>,
}

/// Cross-replica fan-out bridge. One instance per process.
pub struct Bridge {
	transport: Arc<dyn PubSubTransport>,
	registry: Arc<Registry>,
	subscriptions: Arc<Mutex<HashMap<DocumentId, SubscriptionState>>>,
	linger: std::time::Duration,
	cancel: CancellationToken,
	receive_loop: RwLock<Option<JoinHandle<()>>>,
}

impl Bridge {
	pub fn new(transport: Arc<dyn PubSubTransport>, registry: Arc<Registry>, linger: std::time::Duration) -> Arc<Self> {
		Arc::new(Self {
			transport,
			registry,
			subscriptions: Arc::new(Mutex::new(HashMap::new())),
			linger,
			cancel: CancellationToken::new(),
			receive_loop: RwLock::new(None),
		})
	}

	/// Starts the background receive loop. Call once at startup.
	pub async fn start(self: &Arc<Self>) {
		let (tx, mut rx) = mpsc::unbounded_channel::<(String, String)>();
		let transport = self.transport.clone();
		let cancel = self.cancel.clone();
		let dispatch_cancel = self.cancel.clone();
		let registry = self.registry.clone();

		let dispatch_task = tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = dispatch_cancel.cancelled() => break,
					msg = rx.recv() => {
						match msg {
							Some((channel, payload)) => dispatch(&registry, &channel, &payload).await,
							None => break,
						}
					}
				}
			}
		});

		let run_task = tokio::spawn(async move {
			if let Err(e) = transport.run(tx, cancel).await {
				error!("pub/sub receive loop ended: {}", e);
			}
		});

		*self.receive_loop.write().await = Some(run_task);
		// dispatch_task is detached intentionally: it shares the same
		// cancellation token and exits when `stop` cancels it.
		drop(dispatch_task);
	}

	/// Idempotent; issues a real subscribe only on the 0 -> 1 transition.
	/// Cancels any pending linger-unsubscribe for this document.
	pub async fn subscribe(&self, doc_id: &DocumentId) -> ClResult<()> {
		let mut subs = self.subscriptions.lock().await;
		let entry = subs.entry(doc_id.clone()).or_insert(SubscriptionState {
			ref_count: 0,
			pending_unsubscribe: None,
		});
		entry.ref_count += 1;
		if let Some(handle) = entry.pending_unsubscribe.take() {
			handle.abort();
		}
		let first = entry.ref_count == 1;
		drop(subs);

		if first {
			self.transport.subscribe(&doc_id.channel()).await?;
			info!(doc_id = %doc_id, "subscribed to cross-replica channel");
		}
		Ok(())
	}

	/// Idempotent; issues a real unsubscribe only on the 1 -> 0 transition,
	/// after a short linger to absorb reconnect churn.
	pub async fn unsubscribe(&self, doc_id: &DocumentId) {
		let mut subs = self.subscriptions.lock().await;
		let Some(entry) = subs.get_mut(doc_id) else { return };
		entry.ref_count = entry.ref_count.saturating_sub(1);
		if entry.ref_count > 0 {
			return;
		}

		let transport = self.transport.clone();
		let doc_id = doc_id.clone();
		let subscriptions = self.subscriptions.clone();
		let linger = self.linger;
		let handle = tokio::spawn(async move {
			tokio::time::sleep(linger).await;
			let mut subs = subscriptions.lock().await;
			let still_zero = subs.get(&doc_id).is_some_and(|s| s.ref_count == 0);
			if still_zero {
				subs.remove(&doc_id);
				drop(subs);
				if let Err(e) = transport.unsubscribe(&doc_id.channel()).await {
					warn!(doc_id = %doc_id, "failed to unsubscribe: {}", e);
				} else {
					info!(doc_id = %doc_id, "unsubscribed from cross-replica channel");
				}
			}
		});
		entry.pending_unsubscribe = Some(handle);
	}

	pub async fn publish(&self, doc_id: &DocumentId, envelope: &Envelope) -> ClResult<()> {
		let payload = envelope.to_json()?;
		self.transport.publish(&doc_id.channel(), &payload).await
	}

	/// Cancels the receive loop and waits up to `drain` for it to exit.
	pub async fn stop(&self, drain: std::time::Duration) {
		self.cancel.cancel();
		if let Some(handle) = self.receive_loop.write().await.take() {
			let _ = tokio::time::timeout(drain, handle).await;
		}
	}
}

async fn dispatch(registry: &Arc<Registry>, channel: &str, payload: &str) {
	let Some(doc_id) = channel.strip_prefix("doc:") else {
		warn!(channel, "pub/sub message on unrecognized channel");
		return;
	};
	let envelope = match Envelope::from_json(payload) {
		Ok(env) => env,
		Err(e) => {
			// A single malformed message must never bring down the loop.
			warn!("dropping malformed cross-replica message: {}", e);
			return;
		}
	};
	registry.broadcast(&DocumentId::new(doc_id), envelope).await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pubsub::memory::MemoryHub;

	#[tokio::test]
	async fn second_subscribe_does_not_resubscribe_transport() {
		let hub = MemoryHub::new();
		let registry = Arc::new(Registry::new());
		let bridge = Bridge::new(hub.transport(), registry, std::time::Duration::from_millis(20));
		bridge.start().await;

		let doc_id = DocumentId::new("A");
		bridge.subscribe(&doc_id).await.unwrap();
		bridge.subscribe(&doc_id).await.unwrap();

		let subs = bridge.subscriptions.lock().await;
		assert_eq!(subs.get(&doc_id).unwrap().ref_count, 2);
	}

	#[tokio::test]
	async fn unsubscribe_only_fires_after_last_ref_and_linger() {
		let hub = MemoryHub::new();
		let registry = Arc::new(Registry::new());
		let bridge = Bridge::new(hub.transport(), registry, std::time::Duration::from_millis(20));
		bridge.start().await;

		let doc_id = DocumentId::new("A");
		bridge.subscribe(&doc_id).await.unwrap();
		bridge.subscribe(&doc_id).await.unwrap();

		bridge.unsubscribe(&doc_id).await;
		// one ref remains; entry must still exist
		assert!(bridge.subscriptions.lock().await.contains_key(&doc_id));

		bridge.unsubscribe(&doc_id).await;
		// zero refs: entry survives the linger window as a pending unsubscribe
		assert!(bridge.subscriptions.lock().await.contains_key(&doc_id));

		tokio::time::sleep(std::time::Duration::from_millis(60)).await;
		assert!(!bridge.subscriptions.lock().await.contains_key(&doc_id));
	}

	#[tokio::test]
	async fn resubscribe_during_linger_cancels_pending_unsubscribe() {
		let hub = MemoryHub::new();
		let registry = Arc::new(Registry::new());
		let bridge = Bridge::new(hub.transport(), registry, std::time::Duration::from_millis(30));
		bridge.start().await;

		let doc_id = DocumentId::new("A");
		bridge.subscribe(&doc_id).await.unwrap();
		bridge.unsubscribe(&doc_id).await;
		bridge.subscribe(&doc_id).await.unwrap();

		tokio::time::sleep(std::time::Duration::from_millis(60)).await;
		// the cancelled linger must not have removed the still-active subscription
		let subs = bridge.subscriptions.lock().await;
		assert_eq!(subs.get(&doc_id).unwrap().ref_count, 1);
	}

	#[tokio::test]
	async fn cross_replica_publish_reaches_the_other_replicas_registry() {
		let hub = MemoryHub::new();

		let registry_a = Arc::new(Registry::new());
		let bridge_a = Bridge::new(hub.transport(), registry_a.clone(), std::time::Duration::from_millis(10));
		bridge_a.start().await;

		let registry_b = Arc::new(Registry::new());
		let bridge_b = Bridge::new(hub.transport(), registry_b.clone(), std::time::Duration::from_millis(10));
		bridge_b.start().await;

		let doc_id = DocumentId::new("shared-doc");
		bridge_a.subscribe(&doc_id).await.unwrap();
		bridge_b.subscribe(&doc_id).await.unwrap();

		let (mut client_rx, _) = registry_b.attach(&doc_id, "client-on-b").await;

		let envelope = Envelope::update_from_bytes(b"hello");
		bridge_a.publish(&doc_id, &envelope).await.unwrap();

		let received = tokio::time::timeout(std::time::Duration::from_secs(1), client_rx.recv())
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(received, Envelope::Update { .. }));
	}
}

// vim: ts=4
