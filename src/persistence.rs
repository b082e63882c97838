//! Persistence Coordinator (C5)
//!
//! Serializes concurrent folds for a single document id on this replica
//! and writes the resulting state back through the Document Metadata
//! Service. Cross-replica concurrency is tolerated — updates commute —
//! but per-replica serialization keeps the local read-fold-write cycle
//! from racing itself against a store with no conditional-write support.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::crdt::Engine;
use crate::prelude::*;
use crate::services::metadata::MetadataService;
use crate::types::DocumentId;

/// Lazily-populated per-document mutex table. Entries are reclaimed once
/// no other handle references them (see `reclaim`).
pub struct PersistenceCoordinator {
	metadata: Arc<dyn MetadataService>,
	locks: Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl PersistenceCoordinator {
	pub fn new(metadata: Arc<dyn MetadataService>) -> Self {
		Self { metadata, locks: Mutex::new(HashMap::new()) }
	}

	async fn lock_for(&self, doc_id: &DocumentId) -> Arc<Mutex<()>> {
		let mut locks = self.locks.lock().await;
		locks.entry(doc_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
	}

	/// Read-fold-write: loads current state, applies `update_bytes`,
	/// persists the resulting state and derived plaintext.
	///
	/// On success, the update is safe to publish cross-replica. On
	/// failure, the caller MUST NOT publish (invariant: a failed
	/// persistence is never seen by peers).
	pub async fn fold(&self, doc_id: &DocumentId, update_bytes: &[u8]) -> ClResult<()> {
		let doc_lock = self.lock_for(doc_id).await;
		let _guard = doc_lock.lock().await;

		let current_state = self.metadata.load_state(doc_id).await?;
		let mut engine = Engine::new(current_state.as_deref())?;
		engine.apply_update(update_bytes)?;

		let new_state = engine.encode_state();
		let plaintext = engine.plaintext();
		self.metadata.persist_state(doc_id, &new_state, &plaintext).await?;
		Ok(())
	}

	/// Drops the per-document mutex entry if nothing else holds a
	/// reference to it. Call after a session detaches with zero
	/// remaining local sockets for the document.
	pub async fn reclaim(&self, doc_id: &DocumentId) {
		let mut locks = self.locks.lock().await;
		if let Some(lock) = locks.get(doc_id) {
			// Arc::strong_count == 1 means only this table holds it: no
			// fold is in flight and no other handle is pending.
			if Arc::strong_count(lock) == 1 {
				locks.remove(doc_id);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::services::metadata::InMemoryMetadataService;

	#[tokio::test]
	async fn fold_persists_the_merged_state() {
		let metadata = Arc::new(InMemoryMetadataService::new());
		let coordinator = PersistenceCoordinator::new(metadata.clone());
		let doc_id = DocumentId::new("doc-1");

		let seed = Engine::from_text("Hello").unwrap();
		metadata.seed(&doc_id, &seed.encode_state(), "Hello").await;

		let mut author = Engine::new(Some(&seed.encode_state())).unwrap();
		let sv = author.state_vector();
		let delta = author.insert(&sv, 5, " World");

		coordinator.fold(&doc_id, &delta).await.unwrap();

		let (state, plaintext) = metadata.current(&doc_id).await.unwrap();
		assert_eq!(plaintext, "Hello World");
		let restored = Engine::new(Some(&state)).unwrap();
		assert_eq!(restored.plaintext(), "Hello World");
	}

	#[tokio::test]
	async fn fold_is_idempotent_on_the_store() {
		let metadata = Arc::new(InMemoryMetadataService::new());
		let coordinator = PersistenceCoordinator::new(metadata.clone());
		let doc_id = DocumentId::new("doc-1");

		let mut author = Engine::from_text("Hello").unwrap();
		let sv = author.state_vector();
		let delta = author.insert(&sv, 5, " World");

		coordinator.fold(&doc_id, &delta).await.unwrap();
		let (_, plaintext_once) = metadata.current(&doc_id).await.unwrap();
		coordinator.fold(&doc_id, &delta).await.unwrap();
		let (_, plaintext_twice) = metadata.current(&doc_id).await.unwrap();

		assert_eq!(plaintext_once, plaintext_twice);
	}

	#[tokio::test]
	async fn concurrent_folds_for_the_same_doc_all_succeed_and_converge() {
		let metadata = Arc::new(InMemoryMetadataService::new());
		let coordinator = Arc::new(PersistenceCoordinator::new(metadata.clone()));
		let doc_id = DocumentId::new("doc-1");
		metadata.seed(&doc_id, &Engine::new(None).unwrap().encode_state(), "").await;

		let mut handles = Vec::new();
		for i in 0..8 {
			let coordinator = coordinator.clone();
			let doc_id = doc_id.clone();
			handles.push(tokio::spawn(async move {
				let mut engine = Engine::new(None).unwrap();
				let sv = engine.state_vector();
				let delta = engine.insert(&sv, 0, &format!("{i}"));
				coordinator.fold(&doc_id, &delta).await
			}));
		}

		for h in handles {
			h.await.unwrap().unwrap();
		}

		let (_, plaintext) = metadata.current(&doc_id).await.unwrap();
		assert_eq!(plaintext.len(), 8);
	}

	#[tokio::test]
	async fn reclaim_drops_unreferenced_lock_entries() {
		let metadata = Arc::new(InMemoryMetadataService::new());
		let coordinator = PersistenceCoordinator::new(metadata.clone());
		let doc_id = DocumentId::new("doc-1");
		metadata.seed(&doc_id, &Engine::new(None).unwrap().encode_state(), "").await;

		let mut engine = Engine::new(None).unwrap();
		let sv = engine.state_vector();
		let delta = engine.insert(&sv, 0, "x");
		coordinator.fold(&doc_id, &delta).await.unwrap();

		coordinator.reclaim(&doc_id).await;
		assert!(coordinator.locks.lock().await.get(&doc_id).is_none());
	}
}

// vim: ts=4
