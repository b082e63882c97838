//! Auth Service adapter trait (external collaborator, out of scope to
//! implement — only the interface is owned by this crate).

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;
use crate::types::UserIdentity;

#[async_trait]
pub trait AuthService: Debug + Send + Sync {
	/// Verifies a bearer token from the socket handshake, returning the
	/// authenticated user id.
	async fn verify_token(&self, token: &str) -> ClResult<Box<str>>;

	/// Looks up profile fields for a previously-verified user id.
	async fn lookup_user(&self, user_id: &str) -> ClResult<UserIdentity>;
}

/// Fixed-roster fake for tests: tokens are the user id itself.
#[derive(Debug, Default)]
pub struct InMemoryAuthService {
	users: std::sync::RwLock<std::collections::HashMap<Box<str>, UserIdentity>>,
}

impl InMemoryAuthService {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_user(&self, identity: UserIdentity) {
		self.users.write().unwrap_or_else(|e| e.into_inner()).insert(identity.user_id.clone(), identity);
	}

	/// Flips a previously-added user's `active` flag, for exercising the
	/// 4003 rejection path in tests.
	pub fn deactivate(&self, user_id: &str) {
		if let Some(identity) = self.users.write().unwrap_or_else(|e| e.into_inner()).get_mut(user_id) {
			identity.active = false;
		}
	}
}

#[async_trait]
impl AuthService for InMemoryAuthService {
	async fn verify_token(&self, token: &str) -> ClResult<Box<str>> {
		let users = self.users.read().unwrap_or_else(|e| e.into_inner());
		if users.contains_key(token) {
			Ok(token.into())
		} else {
			Err(Error::Unauthorized)
		}
	}

	async fn lookup_user(&self, user_id: &str) -> ClResult<UserIdentity> {
		let users = self.users.read().unwrap_or_else(|e| e.into_inner());
		users.get(user_id).cloned().ok_or(Error::Unauthorized)
	}
}

// vim: ts=4
