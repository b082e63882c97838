//! Socket upgrade handler: `GET /documents/{docId}/sync?token=<jwt>`.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::prelude::*;
use crate::server::app::App;
use crate::session;
use crate::types::DocumentId;

#[derive(Debug, Deserialize, Default)]
pub struct SyncQuery {
	pub token: Option<String>,
}

pub async fn get_document_sync(
	ws: WebSocketUpgrade,
	Path(doc_id): Path<String>,
	Query(query): Query<SyncQuery>,
	State(app): State<App>,
) -> Response {
	let doc_id = DocumentId::new(doc_id);
	info!(doc_id = %doc_id, "sync socket request");

	let ws = ws.max_message_size(app.config.max_payload_bytes);

	match session::authenticate(&app, query.token.as_deref(), &doc_id).await {
		Ok((identity, access)) => {
			ws.on_upgrade(move |socket| session::run(socket, app, doc_id, identity, access))
		}
		Err(join_err) => {
			warn!(doc_id = %doc_id, "sync socket rejected: {}", join_err.reason());
			ws.on_upgrade(move |socket| session::reject(socket, join_err))
		}
	}
}

// vim: ts=4
