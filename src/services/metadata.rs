//! Document Metadata Service adapter trait (external collaborator, out of
//! scope to implement — document CRUD, collaborator ACLs, and the actual
//! storage engine live outside this crate).

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use tokio::sync::RwLock;

use crate::prelude::*;
use crate::types::{AccessLevel, DocumentId};

#[async_trait]
pub trait MetadataService: Debug + Send + Sync {
	/// Whether `doc_id` is a document the store actually knows about,
	/// independent of whether it has any CRDT state yet. A freshly
	/// created, never-edited document exists but has no state; a
	/// nonexistent document has neither.
	async fn document_exists(&self, doc_id: &DocumentId) -> ClResult<bool>;

	/// Loads the current serialized CRDT state for a document, or `None`
	/// if the document has never been written.
	async fn load_state(&self, doc_id: &DocumentId) -> ClResult<Option<Vec<u8>>>;

	/// Atomically replaces the stored state and its derived plaintext.
	async fn persist_state(&self, doc_id: &DocumentId, state: &[u8], plaintext: &str) -> ClResult<()>;

	/// Resolves what `user_id` may do with `doc_id`.
	async fn check_access(&self, user_id: &str, doc_id: &DocumentId) -> ClResult<AccessLevel>;
}

#[derive(Debug, Default)]
struct DocRecord {
	state: Vec<u8>,
	plaintext: String,
}

/// In-memory fake for tests: every known user has editor access, unknown
/// users have none. `created` tracks which documents the store knows
/// about, separately from `docs` (which only holds ones with CRDT state) —
/// a document can exist with no edits yet.
#[derive(Debug, Default)]
pub struct InMemoryMetadataService {
	created: RwLock<HashSet<DocumentId>>,
	docs: RwLock<HashMap<DocumentId, DocRecord>>,
	access: RwLock<HashMap<(Box<str>, DocumentId), AccessLevel>>,
}

impl InMemoryMetadataService {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `doc_id` as existing, with no state yet.
	pub async fn create_document(&self, doc_id: &DocumentId) {
		self.created.write().await.insert(doc_id.clone());
	}

	pub async fn seed(&self, doc_id: &DocumentId, state: &[u8], plaintext: &str) {
		self.created.write().await.insert(doc_id.clone());
		self.docs
			.write()
			.await
			.insert(doc_id.clone(), DocRecord { state: state.to_vec(), plaintext: plaintext.to_string() });
	}

	pub async fn grant(&self, user_id: &str, doc_id: &DocumentId, level: AccessLevel) {
		self.access.write().await.insert((user_id.into(), doc_id.clone()), level);
	}

	pub async fn current(&self, doc_id: &DocumentId) -> Option<(Vec<u8>, String)> {
		self.docs.read().await.get(doc_id).map(|r| (r.state.clone(), r.plaintext.clone()))
	}
}

#[async_trait]
impl MetadataService for InMemoryMetadataService {
	async fn document_exists(&self, doc_id: &DocumentId) -> ClResult<bool> {
		Ok(self.created.read().await.contains(doc_id))
	}

	async fn load_state(&self, doc_id: &DocumentId) -> ClResult<Option<Vec<u8>>> {
		Ok(self.docs.read().await.get(doc_id).map(|r| r.state.clone()))
	}

	async fn persist_state(&self, doc_id: &DocumentId, state: &[u8], plaintext: &str) -> ClResult<()> {
		self.created.write().await.insert(doc_id.clone());
		self.docs
			.write()
			.await
			.insert(doc_id.clone(), DocRecord { state: state.to_vec(), plaintext: plaintext.to_string() });
		Ok(())
	}

	async fn check_access(&self, user_id: &str, doc_id: &DocumentId) -> ClResult<AccessLevel> {
		Ok(self
			.access
			.read()
			.await
			.get(&(user_id.into(), doc_id.clone()))
			.copied()
			.unwrap_or(AccessLevel::None))
	}
}

// vim: ts=4
