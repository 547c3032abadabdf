//! Avalanche DAG consensus core.
//!
//! A probabilistic BFT agreement protocol over a DAG of vertices, where
//! each vertex batches transactions that may conflict over shared input
//! ids. The core couples two layers:
//!
//! - **Snowstorm**: transaction-level conflict resolution, one
//!   [`Snowball`] instance per conflict set
//! - **Avalanche**: vertex-level DAG consensus with transitive
//!   accept/reject cascades and frontier tracking
//!
//! The sampling layer collects `k` responses per round and feeds them to
//! [`Avalanche::record_poll`]; the core reports every newly accepted and
//! rejected id. Storage, networking, and identifier derivation live
//! behind the [`Vertex`], [`Tx`], and [`VertexGetter`] capability traits.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use avalanche_dag::{Avalanche, Parameters, Registry, Vertex};
//! use avalanche_dag::consensus::testing::{test_id, TestVertex, TestVertexGetter};
//!
//! let registry = Registry::new("avalanche");
//! let getter = TestVertexGetter::new();
//! let genesis: Arc<dyn Vertex> = TestVertex::genesis(test_id(0));
//! getter.insert(genesis.clone());
//!
//! let dag = Avalanche::new(Parameters::default(), &registry, vec![genesis], getter).unwrap();
//! assert!(dag.finalized());
//! ```
//!
//! [`Snowball`]: consensus::snowball::Snowball

mod bag;
mod error;
mod ids;
mod metrics;
mod parameters;

pub mod consensus;

pub use bag::{Bag, UniqueBag};
pub use consensus::avalanche::Avalanche;
pub use consensus::snowstorm::{PollUpdates, Snowstorm};
pub use consensus::{Outcome, Status, Tx, Vertex, VertexGetter};
pub use error::{ConsensusError, Result};
pub use ids::{Id, ID_LEN};
pub use metrics::{ConsensusMetrics, Counter, Gauge, Registry};
pub use parameters::Parameters;
