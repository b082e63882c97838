//! Redis-backed `PubSubTransport`.
//!
//! redis-rs requires two separate connections for this pattern: a
//! dedicated `PubSub` connection, exclusively owned by the `run` loop, for
//! subscribing and reading messages; and a `ConnectionManager`
//! (auto-reconnecting, cheaply cloneable) for publish commands issued from
//! other tasks. Subscribe/unsubscribe requests reach the `run` loop's
//! owned connection over an internal command channel.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::PubSubTransport;
use crate::prelude::*;

enum Command {
	Subscribe(String),
	Unsubscribe(String),
}

pub struct RedisTransport {
	manager: ConnectionManager,
	url: String,
	commands: mpsc::UnboundedSender<Command>,
	commands_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl RedisTransport {
	pub async fn connect(url: &str) -> ClResult<Self> {
		let client = redis::Client::open(url)
			.map_err(|e| Error::ConfigError(format!("invalid redis url: {e}")))?;
		let manager = client.get_connection_manager().await?;
		let (tx, rx) = mpsc::unbounded_channel();
		Ok(Self { manager, url: url.to_string(), commands: tx, commands_rx: Mutex::new(Some(rx)) })
	}
}

#[async_trait]
impl PubSubTransport for RedisTransport {
	async fn publish(&self, channel: &str, payload: &str) -> ClResult<()> {
		let mut manager = self.manager.clone();
		manager.publish::<_, _, ()>(channel, payload).await?;
		Ok(())
	}

	async fn subscribe(&self, channel: &str) -> ClResult<()> {
		self.commands
			.send(Command::Subscribe(channel.to_string()))
			.map_err(|_| Error::SubstrateFatal("pub/sub receive loop is not running".into()))
	}

	async fn unsubscribe(&self, channel: &str) -> ClResult<()> {
		self.commands
			.send(Command::Unsubscribe(channel.to_string()))
			.map_err(|_| Error::SubstrateFatal("pub/sub receive loop is not running".into()))
	}

	async fn run(
		&self,
		on_message: mpsc::UnboundedSender<(String, String)>,
		cancel: CancellationToken,
	) -> ClResult<()> {
		let mut commands_rx = self
			.commands_rx
			.lock()
			.await
			.take()
			.ok_or_else(|| Error::Internal("redis transport run() called twice".into()))?;

		let mut subscribed: Vec<String> = Vec::new();

		loop {
			if cancel.is_cancelled() {
				return Ok(());
			}

			let client = redis::Client::open(self.url.as_str())
				.map_err(|e| Error::ConfigError(format!("invalid redis url: {e}")))?;
			let pubsub = match client.get_async_pubsub().await {
				Ok(conn) => conn,
				Err(e) => {
					warn!("redis pub/sub connect failed, retrying: {}", e);
					tokio::time::sleep(std::time::Duration::from_secs(1)).await;
					continue;
				}
			};

			match run_connection(pubsub, &mut subscribed, &mut commands_rx, &on_message, &cancel).await
			{
				Ok(()) => return Ok(()),
				Err(e) => {
					warn!("redis pub/sub connection error, reconnecting: {}", e);
					tokio::time::sleep(std::time::Duration::from_secs(1)).await;
				}
			}
		}
	}
}

/// Drives one physical connection until cancellation or a connection-level
/// error. Restores prior subscriptions on (re)connect. A malformed
/// individual message is logged and skipped; it never ends the loop.
async fn run_connection(
	mut pubsub: redis::aio::PubSub,
	subscribed: &mut Vec<String>,
	commands_rx: &mut mpsc::UnboundedReceiver<Command>,
	on_message: &mpsc::UnboundedSender<(String, String)>,
	cancel: &CancellationToken,
) -> ClResult<()> {
	for channel in subscribed.iter() {
		pubsub.subscribe(channel.as_str()).await?;
	}

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return Ok(()),
			cmd = commands_rx.recv() => {
				match cmd {
					Some(Command::Subscribe(channel)) => {
						pubsub.subscribe(channel.as_str()).await?;
						if !subscribed.contains(&channel) {
							subscribed.push(channel);
						}
					}
					Some(Command::Unsubscribe(channel)) => {
						pubsub.unsubscribe(channel.as_str()).await?;
						subscribed.retain(|c| c != &channel);
					}
					None => return Ok(()),
				}
			}
			msg = pubsub.on_message().next() => {
				match msg {
					Some(msg) => {
						let channel = msg.get_channel_name().to_string();
						match msg.get_payload::<String>() {
							Ok(payload) => { let _ = on_message.send((channel, payload)); }
							Err(e) => warn!("dropping non-utf8 redis payload on {}: {}", channel, e),
						}
					}
					None => return Err(Error::SubstrateError("redis pub/sub stream closed".into())),
				}
			}
		}
	}
}

// vim: ts=4
