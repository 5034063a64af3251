//! Core of the pod-numbering coordinator.
//!
//! A [`Splitter`] assigns each running replica ("pod") of a fleet a unique,
//! contiguous ordinal in `[1..N]` by periodically reconciling against a
//! shared [`PodStore`]. See [`splitter`] for the reconciliation algorithm.

pub mod dto;
pub mod error;
pub mod health;
pub mod metrics;
pub mod splitter;
pub mod store;

pub use dto::PodRecord;
pub use error::StoreError;
pub use splitter::{Splitter, SplitterConfig};
pub use store::PodStore;
