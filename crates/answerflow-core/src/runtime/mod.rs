pub mod context;
pub mod continuation;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod storage;
pub mod submission;
pub mod types;
