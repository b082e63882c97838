//! Small shared value types used across the synchronization pipeline.

use serde::{Deserialize, Serialize};

/// Opaque, globally-unique identifier for a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub Box<str>);

impl DocumentId {
	pub fn new(id: impl Into<Box<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Redis/Pub-Sub channel name for this document.
	pub fn channel(&self) -> String {
		format!("doc:{}", self.0)
	}

	/// Whether `self` has the lexical form the document store accepts: a
	/// 24-character lowercase hex id (a Mongo `ObjectId`). Ids of any other
	/// shape can never resolve to a document, so callers should reject
	/// them as not-found before making a store round trip.
	pub fn is_well_formed(&self) -> bool {
		Self::is_valid_form(&self.0)
	}

	fn is_valid_form(s: &str) -> bool {
		s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
	}
}

impl std::fmt::Display for DocumentId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<String> for DocumentId {
	fn from(s: String) -> Self {
		Self(s.into())
	}
}

impl From<&str> for DocumentId {
	fn from(s: &str) -> Self {
		Self(s.into())
	}
}

/// Identity captured once at session DIAL and held for the session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
	pub user_id: Box<str>,
	pub username: Box<str>,
	#[serde(default)]
	pub avatar_ref: Option<Box<str>>,
	#[serde(default)]
	pub color_tag: Option<Box<str>>,
	/// Whether the account is active. An inactive user is rejected at
	/// DIAL with close code 4003, mirroring `active` on the Auth Service
	/// contract.
	pub active: bool,
}

/// Access level returned by the Document Metadata Service's `checkAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
	None,
	Viewer,
	Editor,
	Owner,
}

impl AccessLevel {
	pub fn can_write(self) -> bool {
		matches!(self, AccessLevel::Editor | AccessLevel::Owner)
	}

	pub fn can_read(self) -> bool {
		!matches!(self, AccessLevel::None)
	}
}

/// Unix-second timestamp, matching the resolution the rest of the pipeline
/// attributes to updates and presence frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Self {
		Self(
			std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_secs() as i64)
				.unwrap_or(0),
		)
	}

	/// Renders as RFC3339/ISO8601, the wire format for the `ts` field.
	pub fn to_rfc3339(self) -> String {
		chrono::DateTime::<chrono::Utc>::from_timestamp(self.0, 0).unwrap_or_else(chrono::Utc::now).to_rfc3339()
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

// vim: ts=4
