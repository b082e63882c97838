//! In-memory `PubSubTransport`, for tests and single-replica deployments
//! where a real distributed substrate would be pure overhead.
//!
//! `MemoryHub` stands in for the Redis server: every `MemoryTransport`
//! created from the same hub sees every publish, and filters to the
//! channels it has itself subscribed to — mirroring how a real Pub/Sub
//! broker delivers to every subscriber, not just the publisher's own
//! replica.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::PubSubTransport;
use crate::prelude::*;

#[derive(Clone)]
pub struct MemoryHub {
	bus: broadcast::Sender<(String, String)>,
}

impl MemoryHub {
	pub fn new() -> Self {
		let (bus, _) = broadcast::channel(1024);
		Self { bus }
	}

	pub fn transport(&self) -> Arc<MemoryTransport> {
		Arc::new(MemoryTransport { bus: self.bus.clone(), subscribed: RwLock::new(HashSet::new()) })
	}
}

impl Default for MemoryHub {
	fn default() -> Self {
		Self::new()
	}
}

pub struct MemoryTransport {
	bus: broadcast::Sender<(String, String)>,
	subscribed: RwLock<HashSet<String>>,
}

impl MemoryTransport {
	/// Standalone transport with its own private hub — equivalent to a
	/// lone replica with no peers, useful when a test only needs the
	/// receive-loop mechanics.
	pub fn standalone() -> Arc<Self> {
		MemoryHub::new().transport()
	}
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
	async fn publish(&self, channel: &str, payload: &str) -> ClResult<()> {
		// No subscribers is not an error, same as a real broker.
		let _ = self.bus.send((channel.to_string(), payload.to_string()));
		Ok(())
	}

	async fn subscribe(&self, channel: &str) -> ClResult<()> {
		self.subscribed.write().await.insert(channel.to_string());
		Ok(())
	}

	async fn unsubscribe(&self, channel: &str) -> ClResult<()> {
		self.subscribed.write().await.remove(channel);
		Ok(())
	}

	async fn run(
		&self,
		on_message: mpsc::UnboundedSender<(String, String)>,
		cancel: CancellationToken,
	) -> ClResult<()> {
		let mut rx = self.bus.subscribe();
		loop {
			tokio::select! {
				_ = cancel.cancelled() => return Ok(()),
				msg = rx.recv() => {
					match msg {
						Ok((channel, payload)) => {
							if self.subscribed.read().await.contains(&channel) {
								let _ = on_message.send((channel, payload));
							}
						}
						Err(broadcast::error::RecvError::Lagged(n)) => {
							warn!("memory pub/sub receiver lagged, skipped {} messages", n);
						}
						Err(broadcast::error::RecvError::Closed) => return Ok(()),
					}
				}
			}
		}
	}
}


// vim: ts=4
