use axum::routing::get;
use axum::Router;

use crate::server::app::App;
use crate::server::ws;

pub fn init(app: App) -> Router {
	Router::new().route("/documents/{doc_id}/sync", get(ws::get_document_sync)).with_state(app)
}

// vim: ts=4
