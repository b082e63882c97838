//! Document Session (C4)
//!
//! Per-socket state machine: DIAL -> ACCEPTED -> JOINED (loop) -> CLEANUP
//! -> CLOSED. Pre-join failures close the socket with a specific code;
//! once joined, faults are logged and the session degrades gracefully
//! rather than disconnecting the client.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::codec::Envelope;
use crate::prelude::*;
use crate::server::app::App;
use crate::types::{AccessLevel, DocumentId};

/// Pre-join rejection reasons, mapped to the reserved close-code range.
pub enum JoinError {
	TokenAbsent,
	TokenInvalid,
	UserInactive,
	DocumentNotFound,
	AccessDenied,
}

impl JoinError {
	pub fn close_code(&self) -> u16 {
		match self {
			JoinError::TokenAbsent => 4001,
			JoinError::TokenInvalid => 4002,
			JoinError::UserInactive => 4003,
			JoinError::DocumentNotFound => 4004,
			JoinError::AccessDenied => 4005,
		}
	}

	pub fn reason(&self) -> &'static str {
		match self {
			JoinError::TokenAbsent => "token absent",
			JoinError::TokenInvalid => "token invalid",
			JoinError::UserInactive => "user inactive",
			JoinError::DocumentNotFound => "document not found",
			JoinError::AccessDenied => "access denied",
		}
	}
}

/// Closes a not-yet-joined socket with one of the reserved codes.
pub async fn reject(mut socket: WebSocket, err: JoinError) {
	let _ = socket
		.send(Message::Close(Some(CloseFrame { code: err.close_code(), reason: err.reason().into() })))
		.await;
	let _ = socket.close().await;
}

/// DIAL -> ACCEPTED: authenticate the token and resolve access. Returns
/// the caller's identity and access level, or the reason to reject.
pub async fn authenticate(
	app: &App,
	token: Option<&str>,
	doc_id: &DocumentId,
) -> Result<(UserIdentity, AccessLevel), JoinError> {
	let Some(token) = token else { return Err(JoinError::TokenAbsent) };

	// A malformed id can never resolve to a document; reject before any
	// store round trip, same as a genuinely-missing one.
	if !doc_id.is_well_formed() {
		return Err(JoinError::DocumentNotFound);
	}

	let user_id = app.auth.verify_token(token).await.map_err(|_| JoinError::TokenInvalid)?;
	let identity = app.auth.lookup_user(&user_id).await.map_err(|_| JoinError::TokenInvalid)?;

	if !identity.active {
		return Err(JoinError::UserInactive);
	}

	let exists = app.metadata.document_exists(doc_id).await.map_err(|_| JoinError::DocumentNotFound)?;
	if !exists {
		return Err(JoinError::DocumentNotFound);
	}

	let access = app
		.metadata
		.check_access(&identity.user_id, doc_id)
		.await
		.map_err(|_| JoinError::DocumentNotFound)?;

	if !access.can_read() {
		return Err(JoinError::AccessDenied);
	}

	Ok((identity, access))
}

/// Drives one joined session until disconnect. Registers/unregisters with
/// the Registry and Bridge, sends the initial snapshot, and multiplexes
/// inbound envelopes.
pub async fn run(socket: WebSocket, app: App, doc_id: DocumentId, identity: UserIdentity, access: AccessLevel) {
	let connection_id = Uuid::new_v4().to_string();
	info!(
		doc_id = %doc_id, user_id = %identity.user_id, connection_id = %connection_id,
		"session joined"
	);

	let (mut inbound_rx, is_first) = app.registry.attach(&doc_id, &connection_id).await;
	if let Err(e) = app.bridge.subscribe(&doc_id).await {
		warn!(doc_id = %doc_id, "cross-replica subscribe failed: {}", e);
	}
	let _ = is_first;

	let initial_state = load_snapshot(&app, &doc_id).await;

	let (ws_tx, mut ws_rx) = socket.split();
	let ws_tx = Arc::new(tokio::sync::Mutex::new(ws_tx));

	if let Err(e) = send(&ws_tx, &Envelope::sync_state(&initial_state, 0)).await {
		warn!(doc_id = %doc_id, "failed to send initial snapshot: {}", e);
		cleanup(&app, &doc_id, &connection_id).await;
		return;
	}

	let heartbeat_task = {
		let ws_tx = ws_tx.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
			loop {
				interval.tick().await;
				let mut tx = ws_tx.lock().await;
				if tx.send(Message::Ping(Vec::new().into())).await.is_err() {
					return;
				}
			}
		})
	};

	let recv_task = {
		let app = app.clone();
		let doc_id = doc_id.clone();
		let identity = identity.clone();
		let connection_id = connection_id.clone();
		let ws_tx = ws_tx.clone();
		tokio::spawn(async move {
			while let Some(msg) = ws_rx.next().await {
				let msg = match msg {
					Ok(m) => m,
					Err(e) => {
						debug!(doc_id = %doc_id, "socket error: {}", e);
						break;
					}
				};
				let Some(text) = as_text(&msg) else {
					if matches!(msg, Message::Close(_)) {
						break;
					}
					continue;
				};

				let envelope = match Envelope::from_json(&text) {
					Ok(e) => e,
					Err(e) => {
						debug!(doc_id = %doc_id, "dropping malformed envelope: {}", e);
						continue;
					}
				};

				handle_inbound(&app, &doc_id, &identity, access, &connection_id, envelope, &ws_tx).await;
			}
		})
	};

	let forward_task = {
		let ws_tx = ws_tx.clone();
		tokio::spawn(async move {
			loop {
				match inbound_rx.recv().await {
					Ok(envelope) => {
						if send(&ws_tx, &envelope).await.is_err() {
							return;
						}
					}
					Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
						warn!("session receiver lagged, skipped {} broadcasts", n);
					}
					Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
				}
			}
		})
	};

	tokio::select! {
		_ = recv_task => { debug!("recv task ended"); }
		_ = forward_task => { debug!("forward task ended"); }
	}
	heartbeat_task.abort();

	cleanup(&app, &doc_id, &connection_id).await;
	info!(doc_id = %doc_id, user_id = %identity.user_id, connection_id = %connection_id, "session closed");
}

async fn load_snapshot(app: &App, doc_id: &DocumentId) -> Vec<u8> {
	match app.metadata.load_state(doc_id).await {
		Ok(Some(state)) => state,
		Ok(None) => crate::crdt::Engine::new(None).map(|e| e.encode_state()).unwrap_or_default(),
		Err(e) => {
			warn!(doc_id = %doc_id, "failed to load document state, sending empty snapshot: {}", e);
			crate::crdt::Engine::new(None).map(|e| e.encode_state()).unwrap_or_default()
		}
	}
}

async fn handle_inbound(
	app: &App,
	doc_id: &DocumentId,
	identity: &UserIdentity,
	access: AccessLevel,
	connection_id: &str,
	envelope: Envelope,
	ws_tx: &Arc<tokio::sync::Mutex<futures::stream::SplitSink<WebSocket, Message>>>,
) {
	match envelope {
		Envelope::Update { update, .. } => {
			if !access.can_write() {
				debug!(doc_id = %doc_id, user_id = %identity.user_id, "update rejected: read-only access");
				return;
			}
			let bytes = match crate::codec::decode(&update) {
				Ok(b) => b,
				Err(e) => {
					debug!(doc_id = %doc_id, "dropping update with invalid base64: {}", e);
					return;
				}
			};

			match app.persistence.fold(doc_id, &bytes).await {
				Ok(()) => {
					let attributed = Envelope::attributed_update(&bytes, identity, Timestamp::now());
					app.registry.broadcast_except(doc_id, attributed.clone(), Some(connection_id)).await;
					if let Err(e) = app.bridge.publish(doc_id, &attributed).await {
						warn!(doc_id = %doc_id, "cross-replica publish failed: {}", e);
					}
				}
				Err(e) => {
					warn!(doc_id = %doc_id, "persistence failed, not publishing: {}", e);
					let _ = send(ws_tx, &Envelope::error("persist_failed", e.to_string())).await;
				}
			}
		}
		Envelope::Awareness { update } => {
			app.registry
				.broadcast_except(doc_id, Envelope::Awareness { update }, Some(connection_id))
				.await;
		}
		Envelope::Presence { pos, .. } => {
			let enriched = Envelope::Presence {
				user_id: identity.user_id.clone(),
				username: identity.username.clone(),
				avatar_ref: identity.avatar_ref.clone(),
				color_tag: identity.color_tag.clone(),
				pos,
			};
			if let Err(e) = app.bridge.publish(doc_id, &enriched).await {
				warn!(doc_id = %doc_id, "presence publish failed: {}", e);
			}
		}
		Envelope::SyncState { .. } | Envelope::Error { .. } => {
			debug!(doc_id = %doc_id, "ignoring server-originated envelope type from client");
		}
	}
}

async fn cleanup(app: &App, doc_id: &DocumentId, connection_id: &str) {
	let now_empty = app.registry.detach(doc_id, connection_id).await;
	if now_empty {
		app.bridge.unsubscribe(doc_id).await;
		app.persistence.reclaim(doc_id).await;
	}
}

fn as_text(msg: &Message) -> Option<String> {
	match msg {
		Message::Text(t) => Some(t.to_string()),
		_ => None,
	}
}

async fn send(
	ws_tx: &Arc<tokio::sync::Mutex<futures::stream::SplitSink<WebSocket, Message>>>,
	envelope: &Envelope,
) -> ClResult<()> {
	let json = envelope.to_json()?;
	let mut tx = ws_tx.lock().await;
	tx.send(Message::Text(json.into())).await.map_err(Error::from)
}

// vim: ts=4
