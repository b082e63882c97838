//! External collaborators, modeled as traits. Neither is implemented here
//! beyond an in-memory fake for tests — a real deployment plugs in an
//! adapter backed by whatever identity provider and document store the
//! surrounding product already has, the same way the teacher's
//! `AuthAdapter`/`MetaAdapter`/`CrdtAdapter` traits are implemented outside
//! this crate and wired in as `Arc<dyn Trait>`.

pub mod auth;
pub mod metadata;
