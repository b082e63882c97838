//! CRDT Engine (C1)
//!
//! Wraps a Yjs-compatible sequence CRDT via `yrs`. This is the only module
//! permitted to know about a specific CRDT implementation; everything
//! downstream treats state and update bytes as opaque.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

use crate::prelude::*;

/// A single document's CRDT state.
pub struct Engine {
	doc: Doc,
}

const TEXT_NAME: &str = "content";

impl Engine {
	/// Fresh document, or replay from a prior snapshot.
	pub fn new(state: Option<&[u8]>) -> ClResult<Self> {
		let doc = Doc::new();
		if let Some(bytes) = state {
			let update = Update::decode_v1(bytes)
				.map_err(|e| Error::ProtocolError(format!("corrupt crdt snapshot: {e}")))?;
			let mut txn = doc.transact_mut();
			txn.apply_update(update)
				.map_err(|e| Error::ProtocolError(format!("cannot replay snapshot: {e}")))?;
		}
		Ok(Self { doc })
	}

	/// Bootstraps a new document seeded with plain text.
	pub fn from_text(text: &str) -> ClResult<Self> {
		let engine = Self::new(None)?;
		let shared_text = engine.doc.get_or_insert_text(TEXT_NAME);
		let mut txn = engine.doc.transact_mut();
		shared_text.insert(&mut txn, 0, text);
		Ok(engine)
	}

	/// Folds a binary update into the document. Idempotent: re-applying the
	/// same bytes is a no-op on the resulting state.
	pub fn apply_update(&mut self, bytes: &[u8]) -> ClResult<()> {
		let update =
			Update::decode_v1(bytes).map_err(|e| Error::ProtocolError(format!("malformed update: {e}")))?;
		let mut txn = self.doc.transact_mut();
		txn.apply_update(update)
			.map_err(|e| Error::ProtocolError(format!("update rejected: {e}")))?;
		Ok(())
	}

	/// Full-state snapshot suitable as the `state` argument of `new`.
	pub fn encode_state(&self) -> Vec<u8> {
		let txn = self.doc.transact();
		txn.encode_state_as_update_v1(&StateVector::default())
	}

	/// Linearized text content. Derived, never authoritative.
	pub fn plaintext(&self) -> String {
		let txn = self.doc.transact();
		let shared_text = self.doc.get_or_insert_text(TEXT_NAME);
		shared_text.get_string(&txn)
	}

	/// Current state vector, usable with `delta_since` to produce a minimal
	/// update instead of a full snapshot.
	pub fn state_vector(&self) -> StateVector {
		self.doc.transact().state_vector()
	}

	/// Encodes only the changes made since `sv`.
	pub fn delta_since(&self, sv: &StateVector) -> Vec<u8> {
		self.doc.transact().encode_state_as_update_v1(sv)
	}

	/// Applies a local text insertion and returns the resulting delta
	/// relative to `sv` (typically the state vector captured just before
	/// this call), ready to hand to `apply_update` on another replica.
	pub fn insert(&mut self, sv: &StateVector, index: u32, chunk: &str) -> Vec<u8> {
		let shared_text = self.doc.get_or_insert_text(TEXT_NAME);
		let mut txn = self.doc.transact_mut();
		shared_text.insert(&mut txn, index, chunk);
		txn.encode_state_as_update_v1(sv)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_text_round_trips_plaintext() {
		let engine = Engine::from_text("Hello").unwrap();
		assert_eq!(engine.plaintext(), "Hello");
	}

	#[test]
	fn encode_state_can_seed_a_fresh_engine() {
		let engine = Engine::from_text("Hello").unwrap();
		let snapshot = engine.encode_state();
		let restored = Engine::new(Some(&snapshot)).unwrap();
		assert_eq!(restored.plaintext(), "Hello");
	}

	#[test]
	fn apply_update_is_idempotent() {
		let mut author = Engine::from_text("Hello").unwrap();
		let base = author.encode_state();
		let sv = author.state_vector();
		let delta = author.insert(&sv, 5, " World");

		let mut peer = Engine::new(Some(&base)).unwrap();
		peer.apply_update(&delta).unwrap();
		peer.apply_update(&delta).unwrap();
		assert_eq!(peer.plaintext(), "Hello World");
	}

	#[test]
	fn apply_update_rejects_garbage() {
		let mut engine = Engine::new(None).unwrap();
		let result = engine.apply_update(b"not a valid yjs update");
		assert!(result.is_err());
	}

	#[test]
	fn updates_commute() {
		let base_engine = Engine::from_text("Hello").unwrap();
		let base = base_engine.encode_state();
		let sv = base_engine.state_vector();

		let mut author_a = Engine::new(Some(&base)).unwrap();
		let u1 = author_a.insert(&sv, 5, " World");

		let mut author_b = Engine::new(Some(&base)).unwrap();
		let u2 = author_b.insert(&sv, 0, ">> ");

		let mut order_ab = Engine::new(Some(&base)).unwrap();
		order_ab.apply_update(&u1).unwrap();
		order_ab.apply_update(&u2).unwrap();

		let mut order_ba = Engine::new(Some(&base)).unwrap();
		order_ba.apply_update(&u2).unwrap();
		order_ba.apply_update(&u1).unwrap();

		assert_eq!(order_ab.plaintext(), order_ba.plaintext());
	}
}

// vim: ts=4
