//! Tagged JSON envelope with base64-encoded binary payloads.
//!
//! Unknown fields are tolerated (clients may be newer than the server).
//! A message missing a required field is dropped and logged; it never
//! closes the session.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
	/// Server -> client, once per session, carries a full snapshot.
	SyncState {
		state: String,
		version: u64,
	},
	/// Either direction. Client -> server: a locally-authored update.
	/// Server -> client: the same update, attributed.
	Update {
		update: String,
		#[serde(default)]
		user_id: Option<Box<str>>,
		#[serde(default)]
		username: Option<Box<str>>,
		#[serde(default)]
		ts: Option<Box<str>>,
	},
	/// Ephemeral, never persisted.
	Awareness {
		update: Value,
	},
	/// Server-enriched presence broadcast.
	Presence {
		user_id: Box<str>,
		username: Box<str>,
		#[serde(default)]
		avatar_ref: Option<Box<str>>,
		#[serde(default)]
		color_tag: Option<Box<str>>,
		#[serde(default)]
		pos: Value,
	},
	/// Server -> client only.
	Error {
		code: Box<str>,
		message: Box<str>,
	},
}

impl Envelope {
	pub fn sync_state(state: &[u8], version: u64) -> Self {
		Envelope::SyncState { state: encode(state), version }
	}

	pub fn update_from_bytes(bytes: &[u8]) -> Self {
		Envelope::Update { update: encode(bytes), user_id: None, username: None, ts: None }
	}

	pub fn attributed_update(bytes: &[u8], identity: &UserIdentity, ts: Timestamp) -> Self {
		Envelope::Update {
			update: encode(bytes),
			user_id: Some(identity.user_id.clone()),
			username: Some(identity.username.clone()),
			ts: Some(ts.to_rfc3339().into()),
		}
	}

	pub fn error(code: &str, message: impl Into<Box<str>>) -> Self {
		Envelope::Error { code: code.into(), message: message.into() }
	}

	pub fn to_json(&self) -> ClResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	pub fn from_json(text: &str) -> ClResult<Self> {
		serde_json::from_str(text)
			.map_err(|e| Error::ProtocolError(format!("invalid envelope: {e}")))
	}
}

pub fn encode(bytes: &[u8]) -> String {
	base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode(s: &str) -> ClResult<Vec<u8>> {
	Ok(base64::engine::general_purpose::STANDARD.decode(s)?)
}


// vim: ts=4
