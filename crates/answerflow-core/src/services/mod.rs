//! External collaborators, each behind a trait so stages can run against
//! real backends or in-memory fakes.

pub mod blob;
pub mod media;
pub mod store;
pub mod transcribe;
