//! Shared application state and its builder.

use std::sync::Arc;

use crate::config::Config;
use crate::persistence::PersistenceCoordinator;
use crate::prelude::*;
use crate::pubsub::Bridge;
use crate::registry::Registry;
use crate::services::auth::AuthService;
use crate::services::metadata::MetadataService;

pub struct AppState {
	pub config: Config,
	pub registry: Arc<Registry>,
	pub bridge: Arc<Bridge>,
	pub persistence: Arc<PersistenceCoordinator>,
	pub auth: Arc<dyn AuthService>,
	pub metadata: Arc<dyn MetadataService>,
}

pub type App = Arc<AppState>;

pub struct AppBuilder {
	config: Option<Config>,
	auth: Option<Arc<dyn AuthService>>,
	metadata: Option<Arc<dyn MetadataService>>,
	bridge: Option<Arc<Bridge>>,
}

impl AppBuilder {
	pub fn new() -> Self {
		// `try_init` rather than `init`: multiple `AppBuilder`s may be
		// constructed in the same process (integration tests), and a
		// second global-subscriber install would panic.
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.try_init();
		Self { config: None, auth: None, metadata: None, bridge: None }
	}

	pub fn config(&mut self, config: Config) -> &mut Self {
		self.config = Some(config);
		self
	}

	pub fn auth_service(&mut self, auth: Arc<dyn AuthService>) -> &mut Self {
		self.auth = Some(auth);
		self
	}

	pub fn metadata_service(&mut self, metadata: Arc<dyn MetadataService>) -> &mut Self {
		self.metadata = Some(metadata);
		self
	}

	/// Supplies a pre-built bridge (e.g. wired to a `MemoryTransport` in
	/// tests). If omitted, `build` constructs one over Redis using
	/// `config.redis_url`.
	pub fn bridge(&mut self, bridge: Arc<Bridge>) -> &mut Self {
		self.bridge = Some(bridge);
		self
	}

	pub async fn build(&mut self) -> ClResult<App> {
		let config = self.config.take().unwrap_or_else(Config::from_env);
		let Some(auth) = self.auth.take() else {
			error!("no auth service configured");
			return Err(Error::ConfigError("auth service not configured".into()));
		};
		let Some(metadata) = self.metadata.take() else {
			error!("no metadata service configured");
			return Err(Error::ConfigError("metadata service not configured".into()));
		};

		let registry = Arc::new(Registry::new());

		let bridge = match self.bridge.take() {
			Some(bridge) => bridge,
			None => {
				let transport =
					Arc::new(crate::pubsub::redis_transport::RedisTransport::connect(&config.redis_url).await?);
				Bridge::new(transport, registry.clone(), config.unsubscribe_linger)
			}
		};
		bridge.start().await;

		let persistence = Arc::new(PersistenceCoordinator::new(metadata.clone()));

		info!("quillsync starting, listening on {}", config.listen);

		Ok(Arc::new(AppState { config, registry, bridge, persistence, auth, metadata }))
	}
}

impl Default for AppBuilder {
	fn default() -> Self {
		Self::new()
	}
}

// vim: ts=4
