//! Consensus protocols.

pub mod avalanche;
pub mod snowball;
pub mod snowstorm;
pub mod testing;

use std::collections::HashSet;
use std::sync::Arc;

use crate::ids::Id;
use crate::Result;

/// Status of a decidable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Being processed
    Processing = 0,
    /// Accepted and finalized
    Accepted = 1,
    /// Rejected
    Rejected = 2,
    /// Unknown status
    Unknown = 3,
}

impl Status {
    /// Returns true if decided (accepted or rejected).
    pub fn decided(&self) -> bool {
        matches!(self, Status::Accepted | Status::Rejected)
    }

    /// Returns true if the item was accepted.
    pub fn accepted(&self) -> bool {
        matches!(self, Status::Accepted)
    }
}

/// A transaction consuming a set of input resources.
///
/// Two processing transactions conflict when they share an input id; the
/// conflict graph decides at most one of them. The `accept`/`reject`
/// effects persist the decision and must only mutate the status - never
/// the id or the input set.
pub trait Tx: Send + Sync {
    /// Returns the transaction's unique identifier.
    fn id(&self) -> Id;

    /// Returns the input resources this transaction consumes.
    fn input_ids(&self) -> &HashSet<Id>;

    /// Returns the status of this transaction.
    fn status(&self) -> Status;

    /// Checks whether the transaction is admissible.
    fn verify(&self) -> Result<()>;

    /// Persists this transaction as accepted.
    fn accept(&self) -> Result<()>;

    /// Persists this transaction as rejected.
    fn reject(&self) -> Result<()>;

    /// Transactions that must be decided before this one.
    ///
    /// Empty means no ordering constraints beyond input conflicts.
    fn dependencies(&self) -> Vec<Id> {
        Vec::new()
    }
}

/// A vertex batching transactions into the DAG.
///
/// Same id implies same parents, height, transactions, and bytes.
pub trait Vertex: Send + Sync {
    /// Returns the vertex's unique identifier.
    fn id(&self) -> Id;

    /// Returns the ids of the parent vertices, in order.
    fn parent_ids(&self) -> &[Id];

    /// Returns the vertex's height: one past the highest parent.
    fn height(&self) -> u64;

    /// Returns the transactions batched into this vertex.
    fn txs(&self) -> &[Arc<dyn Tx>];

    /// Returns the status of this vertex.
    fn status(&self) -> Status;

    /// Persists this vertex as accepted.
    fn accept(&self) -> Result<()>;

    /// Persists this vertex as rejected.
    fn reject(&self) -> Result<()>;

    /// Returns the serialized form of this vertex.
    fn bytes(&self) -> &[u8];
}

/// Resolves vertices by id, typically backed by storage.
pub trait VertexGetter: Send + Sync {
    /// Fetches the vertex with the given id.
    ///
    /// # Errors
    ///
    /// Resolution failures propagate unchanged to the consensus caller.
    fn get_vertex(&self, id: Id) -> Result<Arc<dyn Vertex>>;
}

/// The ids newly decided by a consensus operation.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Ids that transitioned to accepted.
    pub accepted: HashSet<Id>,
    /// Ids that transitioned to rejected.
    pub rejected: HashSet<Id>,
}

impl Outcome {
    /// Returns `true` if nothing was decided.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}
