//! Data model shared between the engine and its storage collaborators.

pub mod delta_token;
pub mod local_record;

pub use delta_token::{DeltaToken, SyncScope};
pub use local_record::LocalRecord;
