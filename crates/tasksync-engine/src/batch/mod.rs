//! # Batch Scheduling
//!
//! Groups logical operations into dependency-ordered batches executed as one
//! remote call:
//!
//! - [`OperationSpec`] / [`BatchBuilder`]: add and validate operations
//! - [`ordering`]: submission, dependency-aware, priority-aware and
//!   performance orderings
//! - [`BatchScheduler`]: governed execution, retry and demultiplexing
//! - [`BatchResponse`]: per-operation outcomes

mod builder;
mod operation;
pub mod ordering;
mod request;
mod response;
mod scheduler;

pub use builder::{validate_path, BatchBuilder};
pub use operation::{Dependency, Operation, OperationSpec, OperationStatus, DEFAULT_PRIORITY};
pub use request::{BatchRequest, BatchStatus};
pub use response::BatchResponse;
pub use scheduler::BatchScheduler;
