use std::sync::Arc;

use quillsync::config::Config;
use quillsync::prelude::*;
use quillsync::server::app::AppBuilder;
use quillsync::services::auth::InMemoryAuthService;
use quillsync::services::metadata::InMemoryMetadataService;

#[tokio::main]
async fn main() -> ClResult<()> {
	let config = Config::from_env();
	let listen = config.listen.clone();
	let shutdown_drain = config.shutdown_drain;

	// Real deployments provide adapters backed by the product's identity
	// provider and document store; these in-memory fakes exist so the
	// binary is runnable standalone.
	let app = AppBuilder::new()
		.config(config)
		.auth_service(Arc::new(InMemoryAuthService::new()))
		.metadata_service(Arc::new(InMemoryMetadataService::new()))
		.build()
		.await?;

	let router = quillsync::server::routes::init(app.clone());

	let listener = tokio::net::TcpListener::bind(&listen).await?;
	info!("listening on {}", listen);

	axum::serve(listener, router)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	app.bridge.stop(shutdown_drain).await;
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			sig.recv().await;
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {}
		() = terminate => {}
	}
	info!("shutdown signal received, draining");
}

// vim: ts=4
