//! Test doubles for exercising consensus implementations.
//!
//! The doubles record terminal decisions in-memory and can be primed to
//! fail their `accept`/`reject`/`verify` effects, standing in for the
//! storage-backed entities a chain engine would supply.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Status, Tx, Vertex, VertexGetter};
use crate::ids::Id;
use crate::{ConsensusError, Result};

/// Returns an id filled with `byte`.
pub fn test_id(byte: u8) -> Id {
    Id::from_bytes([byte; 32])
}

/// An in-memory transaction.
pub struct TestTx {
    id: Id,
    inputs: HashSet<Id>,
    status: RwLock<Status>,
    fail_verify: bool,
    fail_accept: bool,
    fail_reject: bool,
}

impl TestTx {
    fn build(id: Id, inputs: &[Id]) -> Self {
        Self {
            id,
            inputs: inputs.iter().copied().collect(),
            status: RwLock::new(Status::Processing),
            fail_verify: false,
            fail_accept: false,
            fail_reject: false,
        }
    }

    /// Creates a processing transaction consuming `inputs`.
    pub fn new(id: Id, inputs: &[Id]) -> Arc<Self> {
        Arc::new(Self::build(id, inputs))
    }

    /// Creates a transaction with the given initial status.
    pub fn with_status(id: Id, inputs: &[Id], status: Status) -> Arc<Self> {
        let tx = Self::build(id, inputs);
        *tx.status.write() = status;
        Arc::new(tx)
    }

    /// Creates a transaction whose `verify` fails.
    pub fn failing_verify(id: Id, inputs: &[Id]) -> Arc<Self> {
        let mut tx = Self::build(id, inputs);
        tx.fail_verify = true;
        Arc::new(tx)
    }

    /// Creates a transaction whose `accept` fails.
    pub fn failing_accept(id: Id, inputs: &[Id]) -> Arc<Self> {
        let mut tx = Self::build(id, inputs);
        tx.fail_accept = true;
        Arc::new(tx)
    }

    /// Creates a transaction whose `reject` fails.
    pub fn failing_reject(id: Id, inputs: &[Id]) -> Arc<Self> {
        let mut tx = Self::build(id, inputs);
        tx.fail_reject = true;
        Arc::new(tx)
    }
}

impl Tx for TestTx {
    fn id(&self) -> Id {
        self.id
    }

    fn input_ids(&self) -> &HashSet<Id> {
        &self.inputs
    }

    fn status(&self) -> Status {
        *self.status.read()
    }

    fn verify(&self) -> Result<()> {
        if self.fail_verify {
            return Err(ConsensusError::Internal(format!(
                "tx {} failed verification",
                self.id
            )));
        }
        Ok(())
    }

    fn accept(&self) -> Result<()> {
        if self.fail_accept {
            return Err(ConsensusError::Storage(format!(
                "tx {} accept failed",
                self.id
            )));
        }
        *self.status.write() = Status::Accepted;
        Ok(())
    }

    fn reject(&self) -> Result<()> {
        if self.fail_reject {
            return Err(ConsensusError::Storage(format!(
                "tx {} reject failed",
                self.id
            )));
        }
        *self.status.write() = Status::Rejected;
        Ok(())
    }
}

/// An in-memory vertex.
pub struct TestVertex {
    id: Id,
    parents: Vec<Id>,
    height: u64,
    txs: Vec<Arc<dyn Tx>>,
    bytes: Vec<u8>,
    status: RwLock<Status>,
    fail_accept: bool,
    fail_reject: bool,
}

impl TestVertex {
    fn build(id: Id, parents: &[Id], height: u64, txs: Vec<Arc<dyn Tx>>) -> Self {
        Self {
            id,
            parents: parents.to_vec(),
            height,
            txs,
            bytes: id.as_bytes().to_vec(),
            status: RwLock::new(Status::Processing),
            fail_accept: false,
            fail_reject: false,
        }
    }

    /// Creates a processing vertex.
    pub fn new(id: Id, parents: &[Id], height: u64, txs: Vec<Arc<dyn Tx>>) -> Arc<Self> {
        Arc::new(Self::build(id, parents, height, txs))
    }

    /// Creates an accepted genesis-tier vertex.
    pub fn genesis(id: Id) -> Arc<Self> {
        let vtx = Self::build(id, &[], 0, Vec::new());
        *vtx.status.write() = Status::Accepted;
        Arc::new(vtx)
    }

    /// Creates a vertex whose `accept` fails.
    pub fn failing_accept(id: Id, parents: &[Id], height: u64, txs: Vec<Arc<dyn Tx>>) -> Arc<Self> {
        let mut vtx = Self::build(id, parents, height, txs);
        vtx.fail_accept = true;
        Arc::new(vtx)
    }

    /// Creates a vertex whose `reject` fails.
    pub fn failing_reject(id: Id, parents: &[Id], height: u64, txs: Vec<Arc<dyn Tx>>) -> Arc<Self> {
        let mut vtx = Self::build(id, parents, height, txs);
        vtx.fail_reject = true;
        Arc::new(vtx)
    }
}

impl Vertex for TestVertex {
    fn id(&self) -> Id {
        self.id
    }

    fn parent_ids(&self) -> &[Id] {
        &self.parents
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn txs(&self) -> &[Arc<dyn Tx>] {
        &self.txs
    }

    fn status(&self) -> Status {
        *self.status.read()
    }

    fn accept(&self) -> Result<()> {
        if self.fail_accept {
            return Err(ConsensusError::Storage(format!(
                "vertex {} accept failed",
                self.id
            )));
        }
        *self.status.write() = Status::Accepted;
        Ok(())
    }

    fn reject(&self) -> Result<()> {
        if self.fail_reject {
            return Err(ConsensusError::Storage(format!(
                "vertex {} reject failed",
                self.id
            )));
        }
        *self.status.write() = Status::Rejected;
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A [`VertexGetter`] over an in-memory map.
#[derive(Default)]
pub struct TestVertexGetter {
    vertices: RwLock<HashMap<Id, Arc<dyn Vertex>>>,
}

impl TestVertexGetter {
    /// Creates an empty getter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `vertex` resolvable.
    pub fn insert(&self, vertex: Arc<dyn Vertex>) {
        self.vertices.write().insert(vertex.id(), vertex);
    }
}

impl VertexGetter for TestVertexGetter {
    fn get_vertex(&self, id: Id) -> Result<Arc<dyn Vertex>> {
        self.vertices
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ConsensusError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_lifecycle() {
        let tx = TestTx::new(test_id(1), &[test_id(100)]);
        assert_eq!(tx.status(), Status::Processing);
        tx.accept().unwrap();
        assert_eq!(tx.status(), Status::Accepted);
    }

    #[test]
    fn test_failing_effects() {
        let tx = TestTx::failing_accept(test_id(1), &[test_id(100)]);
        assert!(tx.accept().is_err());
        assert_eq!(tx.status(), Status::Processing);

        let tx = TestTx::failing_reject(test_id(2), &[test_id(100)]);
        assert!(tx.reject().is_err());
    }

    #[test]
    fn test_getter() {
        let getter = TestVertexGetter::new();
        let vtx = TestVertex::genesis(test_id(1));
        getter.insert(vtx.clone());

        assert_eq!(getter.get_vertex(test_id(1)).unwrap().id(), test_id(1));
        assert!(getter.get_vertex(test_id(2)).is_err());
    }
}
