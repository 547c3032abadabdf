//! Vertex-level consensus (Avalanche).
//!
//! Maintains the processing DAG of vertices over the transaction-level
//! conflict graph. Votes propagate from voted vertices to all processing
//! ancestors; settlement flows the other way: a vertex is accepted once
//! its parents are accepted and every one of its transactions has won its
//! conflict set, and rejection cascades to all processing descendants.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use super::snowstorm::Snowstorm;
use super::{Outcome, Status, Tx, Vertex, VertexGetter};
use crate::bag::UniqueBag;
use crate::ids::Id;
use crate::metrics::{ConsensusMetrics, Registry};
use crate::{ConsensusError, Parameters, Result};

struct VertexNode {
    vtx: Arc<dyn Vertex>,
    /// Issuance sequence for deterministic commit ordering
    seq: u64,
    /// Processing children
    children: HashSet<Id>,
    /// Cumulative successful-poll credits
    chits: usize,
    /// Consecutive polls granting a chit
    confidence: usize,
}

/// Avalanche DAG consensus.
pub struct Avalanche {
    params: Parameters,
    metrics: ConsensusMetrics,
    cg: Snowstorm,
    getter: Arc<dyn VertexGetter>,
    /// Processing vertices
    nodes: HashMap<Id, VertexNode>,
    /// Decided vertices kept for parent traversal
    resolved: HashMap<Id, Arc<dyn Vertex>>,
    /// Processing vertices carrying each undecided tx
    tx_holders: HashMap<Id, HashSet<Id>>,
    /// Conflict-set winners awaiting acceptance through their vertices
    ready_txs: HashSet<Id>,
    /// Tips: vertices with no processing children
    frontier: HashMap<Id, Arc<dyn Vertex>>,
    preferred: HashSet<Id>,
    virtuous: HashSet<Id>,
    orphans: HashSet<Id>,
    next_seq: u64,
}

impl std::fmt::Debug for Avalanche {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Avalanche")
            .field("params", &self.params)
            .field("nodes", &self.nodes.len())
            .field("resolved", &self.resolved.len())
            .field("tx_holders", &self.tx_holders.len())
            .field("ready_txs", &self.ready_txs.len())
            .field("frontier", &self.frontier.len())
            .field("preferred", &self.preferred.len())
            .field("virtuous", &self.virtuous.len())
            .field("orphans", &self.orphans.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl Avalanche {
    /// Creates a consensus instance seeded with the accepted frontier.
    ///
    /// # Errors
    ///
    /// Fails on invalid parameters, on metric registration conflicts, or
    /// if any genesis vertex is not accepted.
    pub fn new(
        params: Parameters,
        registry: &Registry,
        genesis: Vec<Arc<dyn Vertex>>,
        getter: Arc<dyn VertexGetter>,
    ) -> Result<Self> {
        params
            .validate()
            .map_err(ConsensusError::InvalidParameters)?;
        let metrics = ConsensusMetrics::new(registry)?;
        let cg = Snowstorm::new(params.clone())?;

        let mut dag = Self {
            params,
            metrics,
            cg,
            getter,
            nodes: HashMap::new(),
            resolved: HashMap::new(),
            tx_holders: HashMap::new(),
            ready_txs: HashSet::new(),
            frontier: HashMap::new(),
            preferred: HashSet::new(),
            virtuous: HashSet::new(),
            orphans: HashSet::new(),
            next_seq: 0,
        };

        for vtx in genesis {
            let id = vtx.id();
            if vtx.status() != Status::Accepted {
                return Err(ConsensusError::InvalidGenesis(id.to_string()));
            }
            dag.resolved.insert(id, vtx.clone());
            dag.frontier.insert(id, vtx);
        }
        dag.update_frontiers()?;
        Ok(dag)
    }

    /// Returns the parameters this instance was built with.
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Returns the current preferred frontier.
    pub fn preferences(&self) -> &HashSet<Id> {
        &self.preferred
    }

    /// Returns the current virtuous frontier.
    pub fn virtuous(&self) -> &HashSet<Id> {
        &self.virtuous
    }

    /// Returns the preferred transactions unreachable through any
    /// preferred processing vertex.
    pub fn orphans(&self) -> &HashSet<Id> {
        &self.orphans
    }

    /// Returns true if `tx` would be the only spender of its inputs.
    pub fn is_virtuous(&self, tx: &dyn Tx) -> bool {
        self.cg.is_virtuous(tx)
    }

    /// Returns true when the sampling layer may stop polling: no
    /// virtuous transaction still needs votes.
    pub fn quiesce(&self) -> bool {
        self.cg.quiesce()
    }

    /// Returns true when the processing DAG is empty.
    pub fn finalized(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of processing vertices.
    pub fn num_processing(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the vertex was issued into consensus or decided.
    pub fn vertex_issued(&self, vtx: &dyn Vertex) -> bool {
        vtx.status().decided() || self.nodes.contains_key(&vtx.id())
    }

    /// Returns true if the transaction was issued into consensus or
    /// decided.
    pub fn tx_issued(&self, tx: &dyn Tx) -> bool {
        tx.status().decided() || self.cg.issued(&tx.id())
    }

    /// Issues a vertex into consensus.
    ///
    /// Decided or already-processing vertices are absorbed silently. A
    /// vertex with a rejected parent, a transaction failing `verify`, or
    /// a conflict-graph registration failure is rejected and reported;
    /// admission by itself never accepts anything.
    ///
    /// # Errors
    ///
    /// Fails on a tx count outside `1..=batch_size`, on parent
    /// resolution errors, and on `reject()` commit failures.
    pub fn add(&mut self, vtx: Arc<dyn Vertex>) -> Result<Outcome> {
        let vtx_id = vtx.id();
        let mut outcome = Outcome::default();
        if vtx.status().decided() || self.nodes.contains_key(&vtx_id) {
            return Ok(outcome);
        }

        let txs: Vec<Arc<dyn Tx>> = vtx.txs().to_vec();
        if txs.is_empty() || txs.len() > self.params.batch_size {
            return Err(ConsensusError::BadVertex {
                id: vtx_id.to_string(),
                reason: format!(
                    "carries {} transactions, batch size is {}",
                    txs.len(),
                    self.params.batch_size
                ),
            });
        }
        if vtx.parent_ids().len() > self.params.parents {
            return Err(ConsensusError::BadVertex {
                id: vtx_id.to_string(),
                reason: format!(
                    "references {} parents, limit is {}",
                    vtx.parent_ids().len(),
                    self.params.parents
                ),
            });
        }

        let parent_ids: Vec<Id> = vtx.parent_ids().to_vec();
        let mut rejected_parent = false;
        for pid in &parent_ids {
            if self.nodes.contains_key(pid) {
                continue;
            }
            let parent = self.resolve(*pid)?;
            match parent.status() {
                Status::Accepted => {}
                Status::Rejected => rejected_parent = true,
                _ => {
                    return Err(ConsensusError::Internal(format!(
                        "parent {pid} of vertex {vtx_id} is not issued"
                    )))
                }
            }
        }
        if rejected_parent {
            warn!(vertex = %vtx_id, "rejecting vertex with rejected parent");
            self.reject_unissued(&vtx, &txs, &mut outcome)?;
            self.update_frontiers()?;
            return Ok(outcome);
        }

        let mut admissible = true;
        for tx in &txs {
            if let Err(err) = tx.verify() {
                warn!(tx = %tx.id(), %err, "transaction failed verification");
                admissible = false;
                break;
            }
        }
        if admissible {
            for tx in &txs {
                if tx.status().decided() || self.cg.issued(&tx.id()) {
                    continue;
                }
                if let Err(err) = self.cg.add(tx.clone()) {
                    warn!(tx = %tx.id(), %err, "transaction failed registration");
                    admissible = false;
                    break;
                }
                self.metrics.tx_processing.inc();
            }
        }
        if !admissible {
            self.reject_unissued(&vtx, &txs, &mut outcome)?;
            self.update_frontiers()?;
            return Ok(outcome);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        for pid in &parent_ids {
            if let Some(parent) = self.nodes.get_mut(pid) {
                parent.children.insert(vtx_id);
            }
        }
        for tx in &txs {
            if !tx.status().decided() {
                self.tx_holders.entry(tx.id()).or_default().insert(vtx_id);
            }
        }
        self.nodes.insert(
            vtx_id,
            VertexNode {
                vtx: vtx.clone(),
                seq,
                children: HashSet::new(),
                chits: 0,
                confidence: 0,
            },
        );
        self.metrics.vtx_processing.inc();
        self.frontier.insert(vtx_id, vtx);
        debug!(vertex = %vtx_id, txs = txs.len(), "issued vertex");

        self.update_frontiers()?;
        Ok(outcome)
    }

    /// Rejects a vertex that never reached the arena, cascading to each
    /// of its transactions that no other processing vertex carries.
    fn reject_unissued(
        &mut self,
        vtx: &Arc<dyn Vertex>,
        txs: &[Arc<dyn Tx>],
        outcome: &mut Outcome,
    ) -> Result<()> {
        vtx.reject()?;
        self.metrics.vtx_rejected.inc();
        outcome.rejected.insert(vtx.id());

        for tx in txs {
            if tx.status().decided() {
                continue;
            }
            let tx_id = tx.id();
            let held = self
                .tx_holders
                .get(&tx_id)
                .is_some_and(|holders| !holders.is_empty());
            if held {
                continue;
            }
            if self.cg.issued(&tx_id) {
                self.cg.remove(&tx_id);
                self.metrics.tx_processing.dec();
            }
            tx.reject()?;
            self.metrics.tx_rejected.inc();
        }
        Ok(())
    }

    /// Applies a round of poll responses.
    ///
    /// Responders naming more than one vertex are discarded; an empty
    /// poll is a no-op. Votes propagate to processing ancestors, the
    /// conflict graph settles, and newly decidable vertices commit:
    /// accepts in topological order first, then rejections.
    ///
    /// # Errors
    ///
    /// Fails on parent resolution errors during propagation and on
    /// `accept()`/`reject()` commit failures; commit failures leave the
    /// state partially advanced and the caller is expected to halt.
    pub fn record_poll(&mut self, responses: UniqueBag<Id>) -> Result<Outcome> {
        let mut outcome = Outcome::default();
        let responses = responses.discard_split_voters();
        if responses.is_empty() {
            return Ok(outcome);
        }
        self.metrics.poll_rounds.inc();

        let tx_votes = self.push_votes(&responses)?;
        let updates = self.cg.record_poll(tx_votes.bag())?;
        for tx in &updates.accepting {
            self.ready_txs.insert(tx.id());
        }
        let mut rejecting = updates.rejecting;

        // Reverse reachability from every vertex carrying a losing tx.
        let mut rejectable = HashSet::new();
        for tx in &rejecting {
            self.extend_rejectable(&tx.id(), &mut rejectable);
        }

        // Accept fixpoint, parents necessarily before children.
        loop {
            let mut best: Option<(u64, Id)> = None;
            for (id, node) in &self.nodes {
                if rejectable.contains(id) {
                    continue;
                }
                if node
                    .vtx
                    .parent_ids()
                    .iter()
                    .any(|pid| self.nodes.contains_key(pid))
                {
                    continue;
                }
                let txs_ok = node.vtx.txs().iter().all(|tx| {
                    tx.status() == Status::Accepted || self.ready_txs.contains(&tx.id())
                });
                if !txs_ok {
                    continue;
                }
                if best.is_none() || Some((node.seq, *id)) < best {
                    best = Some((node.seq, *id));
                }
            }
            let Some((_, id)) = best else { break };

            let late_losers = self.accept_vertex(id, &mut outcome)?;
            for tx in late_losers {
                self.extend_rejectable(&tx.id(), &mut rejectable);
                rejecting.push(tx);
            }
        }

        // Rejections run after all accepts.
        let mut order: Vec<(u64, u64, Id)> = rejectable
            .iter()
            .filter_map(|id| {
                self.nodes
                    .get(id)
                    .map(|node| (node.vtx.height(), node.seq, *id))
            })
            .collect();
        order.sort_unstable();
        for (_, _, id) in order {
            self.reject_vertex(id, &mut outcome)?;
        }
        for tx in rejecting {
            if tx.status() == Status::Processing {
                tx.reject()?;
                self.metrics.tx_processing.dec();
                self.metrics.tx_rejected.inc();
                debug!(tx = %tx.id(), "rejected transaction");
            }
        }

        self.update_frontiers()?;
        Ok(outcome)
    }

    /// Propagates responder sets from voted vertices to all processing
    /// ancestors and collects per-transaction votes.
    ///
    /// Each vertex merges its own responders with those of its voted
    /// descendants, so one responder counts at most once per vertex. A
    /// vertex whose merged set reaches alpha records a chit.
    fn push_votes(&mut self, responses: &UniqueBag<Id>) -> Result<UniqueBag<Id>> {
        let mut votes_of: HashMap<Id, HashSet<u32>> = HashMap::new();
        let mut in_degree: HashMap<Id, usize> = HashMap::new();
        let mut seen = HashSet::new();
        let mut walk = Vec::new();

        for vtx_id in responses.list() {
            if !self.nodes.contains_key(&vtx_id) {
                // Vote for a decided or unknown vertex; dropped.
                continue;
            }
            votes_of
                .entry(vtx_id)
                .or_default()
                .extend(responses.get_set(&vtx_id).expect("listed id has a set"));
            if seen.insert(vtx_id) {
                in_degree.entry(vtx_id).or_insert(0);
                walk.push(vtx_id);
            }
        }

        while let Some(id) = walk.pop() {
            let parent_ids: Vec<Id> = self.nodes[&id].vtx.parent_ids().to_vec();
            for pid in parent_ids {
                if self.nodes.contains_key(&pid) {
                    *in_degree.entry(pid).or_insert(0) += 1;
                    if seen.insert(pid) {
                        walk.push(pid);
                    }
                } else {
                    let parent = self.resolve(pid)?;
                    if parent.status() != Status::Accepted {
                        return Err(ConsensusError::Internal(format!(
                            "processing vertex {id} has undecided parent {pid}"
                        )));
                    }
                }
            }
        }

        let mut tx_votes = UniqueBag::new();
        let mut chit_round = HashSet::new();
        let mut ready: Vec<Id> = seen
            .iter()
            .copied()
            .filter(|id| in_degree[id] == 0)
            .collect();
        while let Some(id) = ready.pop() {
            let set = votes_of.remove(&id).unwrap_or_default();
            if set.len() >= self.params.alpha {
                chit_round.insert(id);
            }
            let node = &self.nodes[&id];
            for tx in node.vtx.txs() {
                if !tx.status().decided() {
                    tx_votes.union_set(tx.id(), &set);
                }
            }
            for pid in node.vtx.parent_ids() {
                if let Some(degree) = in_degree.get_mut(pid) {
                    votes_of.entry(*pid).or_default().extend(&set);
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(*pid);
                    }
                }
            }
        }

        for (id, node) in self.nodes.iter_mut() {
            if chit_round.contains(id) {
                node.chits += 1;
                node.confidence += 1;
                debug!(
                    vertex = %id,
                    chits = node.chits,
                    confidence = node.confidence,
                    "vertex earned a chit"
                );
            } else {
                node.confidence = 0;
            }
        }
        Ok(tx_votes)
    }

    /// Adds every processing vertex carrying `tx_id`, and the processing
    /// descendants of each, to `rejectable`.
    fn extend_rejectable(&self, tx_id: &Id, rejectable: &mut HashSet<Id>) {
        let mut queue: VecDeque<Id> = self
            .tx_holders
            .get(tx_id)
            .map(|holders| holders.iter().copied().collect())
            .unwrap_or_default();
        while let Some(id) = queue.pop_front() {
            if rejectable.insert(id) {
                if let Some(node) = self.nodes.get(&id) {
                    queue.extend(node.children.iter().copied());
                }
            }
        }
    }

    /// Commits a vertex as accepted and settles its winning transactions
    /// once no other processing vertex carries them.
    ///
    /// Returns transactions that joined the winner's conflict set after
    /// finalization; they can no longer win and must be rejected.
    fn accept_vertex(&mut self, id: Id, outcome: &mut Outcome) -> Result<Vec<Arc<dyn Tx>>> {
        let vtx = self.nodes[&id].vtx.clone();
        vtx.accept()?;
        let node = self.nodes.remove(&id).expect("accepted vertex was issued");
        self.metrics.vtx_processing.dec();
        self.metrics.vtx_accepted.inc();
        outcome.accepted.insert(id);
        self.resolved.insert(id, vtx.clone());
        for pid in vtx.parent_ids() {
            if let Some(parent) = self.nodes.get_mut(pid) {
                parent.children.remove(&id);
            }
        }
        debug!(vertex = %id, height = vtx.height(), chits = node.chits, "accepted vertex");

        let mut late_losers = Vec::new();
        for tx in vtx.txs() {
            let tx_id = tx.id();
            let Some(holders) = self.tx_holders.get_mut(&tx_id) else {
                continue;
            };
            holders.remove(&id);
            if !holders.is_empty() {
                continue;
            }
            self.tx_holders.remove(&tx_id);
            if self.ready_txs.remove(&tx_id) && tx.status() == Status::Processing {
                tx.accept()?;
                late_losers.extend(self.cg.mark_accepted(&tx_id));
                self.metrics.tx_processing.dec();
                self.metrics.tx_accepted.inc();
                debug!(tx = %tx_id, "accepted transaction");
            }
        }
        Ok(late_losers)
    }

    /// Commits a vertex as rejected. Its undecided non-conflicted
    /// transactions stay in the conflict graph as orphan candidates.
    fn reject_vertex(&mut self, id: Id, outcome: &mut Outcome) -> Result<()> {
        let Some(node) = self.nodes.remove(&id) else {
            return Ok(());
        };
        node.vtx.reject()?;
        self.metrics.vtx_processing.dec();
        self.metrics.vtx_rejected.inc();
        outcome.rejected.insert(id);
        for pid in node.vtx.parent_ids() {
            if let Some(parent) = self.nodes.get_mut(pid) {
                parent.children.remove(&id);
            }
        }
        for tx in node.vtx.txs() {
            if let Some(holders) = self.tx_holders.get_mut(&tx.id()) {
                holders.remove(&id);
                if holders.is_empty() {
                    self.tx_holders.remove(&tx.id());
                }
            }
        }
        debug!(vertex = %id, "rejected vertex");
        Ok(())
    }

    /// Resolves a vertex through the arena, the decided cache, or the
    /// getter (then cached). Getter failures propagate.
    fn resolve(&mut self, id: Id) -> Result<Arc<dyn Vertex>> {
        if let Some(node) = self.nodes.get(&id) {
            return Ok(node.vtx.clone());
        }
        if let Some(vtx) = self.resolved.get(&id) {
            return Ok(vtx.clone());
        }
        let vtx = self.getter.get_vertex(id)?;
        self.resolved.insert(id, vtx.clone());
        Ok(vtx)
    }

    /// Recomputes the frontier, preferred, virtuous, and orphan sets by
    /// walking the previous frontier toward the accepted boundary.
    fn update_frontiers(&mut self) -> Result<()> {
        let mut previous: Vec<Arc<dyn Vertex>> = self.frontier.values().cloned().collect();
        previous.sort_by_key(|vtx| vtx.id());

        let cg_preferences = self.cg.preferences();
        let cg_virtuous = self.cg.virtuous();

        self.frontier.clear();
        self.preferred.clear();
        self.virtuous.clear();
        self.orphans = cg_preferences.clone();
        let mut pref_cache = HashMap::new();
        let mut virt_cache = HashMap::new();
        for vtx in previous {
            self.refresh(
                vtx,
                &cg_preferences,
                &cg_virtuous,
                &mut pref_cache,
                &mut virt_cache,
            )?;
        }
        Ok(())
    }

    /// Classifies one vertex (and, transitively, its ancestry) into the
    /// frontier sets.
    ///
    /// A preferred or virtuous vertex displaces its parents from the
    /// matching set, so each set holds the deepest vertices with the
    /// property; the frontier itself always recedes to the tips.
    fn refresh(
        &mut self,
        vtx: Arc<dyn Vertex>,
        cg_preferences: &HashSet<Id>,
        cg_virtuous: &HashSet<Id>,
        pref_cache: &mut HashMap<Id, bool>,
        virt_cache: &mut HashMap<Id, bool>,
    ) -> Result<()> {
        let id = vtx.id();
        if pref_cache.contains_key(&id) {
            return Ok(());
        }
        match vtx.status() {
            Status::Accepted => {
                self.preferred.insert(id);
                self.virtuous.insert(id);
                self.frontier.insert(id, vtx);
                pref_cache.insert(id, true);
                virt_cache.insert(id, true);
                return Ok(());
            }
            Status::Rejected => {
                pref_cache.insert(id, false);
                virt_cache.insert(id, false);
                return Ok(());
            }
            _ => {}
        }

        let mut preferred = true;
        let mut virtuous = true;
        for tx in vtx.txs() {
            match tx.status() {
                Status::Accepted => {}
                Status::Rejected => {
                    preferred = false;
                    virtuous = false;
                }
                _ => {
                    let tx_id = tx.id();
                    if !cg_preferences.contains(&tx_id) {
                        preferred = false;
                    }
                    if !cg_virtuous.contains(&tx_id) {
                        virtuous = false;
                    }
                }
            }
        }

        let parent_ids: Vec<Id> = vtx.parent_ids().to_vec();
        for pid in &parent_ids {
            let parent = self.resolve(*pid)?;
            self.refresh(parent, cg_preferences, cg_virtuous, pref_cache, virt_cache)?;
            preferred &= pref_cache[pid];
            virtuous &= virt_cache[pid];
        }

        if preferred {
            self.preferred.insert(id);
            for pid in &parent_ids {
                self.preferred.remove(pid);
            }
            for tx in vtx.txs() {
                if !tx.status().decided() {
                    self.orphans.remove(&tx.id());
                }
            }
        }
        if virtuous {
            self.virtuous.insert(id);
            for pid in &parent_ids {
                self.virtuous.remove(pid);
            }
        }
        self.frontier.insert(id, vtx);
        for pid in &parent_ids {
            self.frontier.remove(pid);
        }
        pref_cache.insert(id, preferred);
        virt_cache.insert(id, virtuous);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::testing::{test_id, TestTx, TestVertex, TestVertexGetter};

    fn params(k: usize, alpha: usize, bv: usize, br: usize) -> Parameters {
        Parameters {
            k,
            alpha,
            beta_virtuous: bv,
            beta_rogue: br,
            concurrent_repolls: 1,
            parents: 2,
            batch_size: 1,
        }
    }

    fn setup(
        params: Parameters,
    ) -> (Avalanche, Vec<Arc<dyn Vertex>>, Arc<TestVertexGetter>) {
        let getter = TestVertexGetter::new();
        let g0: Arc<dyn Vertex> = TestVertex::genesis(test_id(250));
        let g1: Arc<dyn Vertex> = TestVertex::genesis(test_id(251));
        getter.insert(g0.clone());
        getter.insert(g1.clone());
        let registry = Registry::new("avalanche");
        let dag = Avalanche::new(
            params,
            &registry,
            vec![g0.clone(), g1.clone()],
            getter.clone(),
        )
        .unwrap();
        (dag, vec![g0, g1], getter)
    }

    #[test]
    fn test_genesis_must_be_accepted() {
        let getter = TestVertexGetter::new();
        let registry = Registry::new("avalanche");
        let bad: Arc<dyn Vertex> = TestVertex::new(test_id(1), &[], 1, Vec::new());
        let err = Avalanche::new(params(2, 2, 1, 2), &registry, vec![bad], getter).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidGenesis(_)));
    }

    #[test]
    fn test_invalid_parameters() {
        let getter = TestVertexGetter::new();
        let registry = Registry::new("avalanche");
        let err = Avalanche::new(
            Parameters {
                k: 0,
                ..Default::default()
            },
            &registry,
            Vec::new(),
            getter,
        )
        .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidParameters(_)));
    }

    #[test]
    fn test_metric_conflict_is_fatal() {
        let getter = TestVertexGetter::new();
        let registry = Registry::new("avalanche");
        registry.register_gauge("vtx_processing", "claimed").unwrap();
        let err =
            Avalanche::new(params(2, 2, 1, 2), &registry, Vec::new(), getter).unwrap_err();
        assert!(matches!(err, ConsensusError::Metrics(_)));
    }

    #[test]
    fn test_add_is_idempotent() {
        let (mut dag, genesis, getter) = setup(params(2, 2, 1, 2));
        let parents = [genesis[0].id(), genesis[1].id()];
        let tx0 = TestTx::new(test_id(10), &[test_id(100)]);
        let vtx0 = TestVertex::new(test_id(1), &parents, 1, vec![tx0 as Arc<dyn Tx>]);
        getter.insert(vtx0.clone());

        assert!(dag.finalized());
        assert!(dag.add(vtx0.clone()).unwrap().is_empty());
        assert!(!dag.finalized());
        assert_eq!(dag.num_processing(), 1);

        // Second add is silently absorbed, as is re-adding genesis.
        assert!(dag.add(vtx0).unwrap().is_empty());
        assert!(dag.add(genesis[0].clone()).unwrap().is_empty());
        assert_eq!(dag.num_processing(), 1);
    }

    #[test]
    fn test_add_refuses_empty_vertex() {
        let (mut dag, genesis, _getter) = setup(params(2, 2, 1, 2));
        let parents = [genesis[0].id(), genesis[1].id()];
        let vtx = TestVertex::new(test_id(1), &parents, 1, Vec::new());
        assert!(matches!(
            dag.add(vtx),
            Err(ConsensusError::BadVertex { .. })
        ));
    }

    #[test]
    fn test_add_refuses_oversized_batch() {
        let (mut dag, genesis, _getter) = setup(params(2, 2, 1, 2));
        let parents = [genesis[0].id(), genesis[1].id()];
        let txs: Vec<Arc<dyn Tx>> = vec![
            TestTx::new(test_id(10), &[test_id(100)]),
            TestTx::new(test_id(11), &[test_id(101)]),
        ];
        let vtx = TestVertex::new(test_id(1), &parents, 1, txs);
        assert!(matches!(
            dag.add(vtx),
            Err(ConsensusError::BadVertex { .. })
        ));
    }

    #[test]
    fn test_add_rejects_on_failed_verify() {
        let (mut dag, genesis, _getter) = setup(params(2, 2, 1, 2));
        let parents = [genesis[0].id(), genesis[1].id()];
        let tx0 = TestTx::failing_verify(test_id(10), &[test_id(100)]);
        let vtx0 = TestVertex::new(test_id(1), &parents, 1, vec![tx0.clone() as Arc<dyn Tx>]);

        let outcome = dag.add(vtx0.clone()).unwrap();
        assert_eq!(outcome.rejected, HashSet::from([test_id(1)]));
        assert_eq!(vtx0.status(), Status::Rejected);
        assert_eq!(tx0.status(), Status::Rejected);
        assert!(dag.finalized());
    }

    #[test]
    fn test_voting_decides_conflict() {
        let (mut dag, genesis, _getter) = setup(params(2, 2, 1, 2));
        let parents = [genesis[0].id(), genesis[1].id()];
        let u0 = test_id(100);
        let tx0 = TestTx::new(test_id(10), &[u0]);
        let tx1 = TestTx::new(test_id(11), &[u0]);
        let vtx0 = TestVertex::new(test_id(1), &parents, 1, vec![tx0.clone() as Arc<dyn Tx>]);
        let vtx1 = TestVertex::new(test_id(2), &parents, 1, vec![tx1.clone() as Arc<dyn Tx>]);

        dag.add(vtx0.clone()).unwrap();
        dag.add(vtx1.clone()).unwrap();

        let mut votes = UniqueBag::new();
        votes.add(0, test_id(2));
        votes.add(1, test_id(2));

        let outcome = dag.record_poll(votes.clone()).unwrap();
        assert!(outcome.is_empty());
        assert!(!dag.finalized());
        assert_eq!(dag.preferences(), &HashSet::from([test_id(2)]));

        let outcome = dag.record_poll(votes).unwrap();
        assert_eq!(outcome.accepted, HashSet::from([test_id(2)]));
        assert_eq!(outcome.rejected, HashSet::from([test_id(1)]));
        assert!(dag.finalized());
        assert_eq!(vtx1.status(), Status::Accepted);
        assert_eq!(vtx0.status(), Status::Rejected);
        assert_eq!(tx1.status(), Status::Accepted);
        assert_eq!(tx0.status(), Status::Rejected);
    }

    #[test]
    fn test_split_vote_is_discarded() {
        let (mut dag, genesis, _getter) = setup(Parameters {
            k: 3,
            alpha: 2,
            beta_virtuous: 1,
            beta_rogue: 1,
            concurrent_repolls: 1,
            parents: 2,
            batch_size: 1,
        });
        let parents = [genesis[0].id(), genesis[1].id()];
        let u0 = test_id(100);
        let vtx0 = TestVertex::new(test_id(1), &parents, 1, vec![TestTx::new(test_id(10), &[u0]) as Arc<dyn Tx>]);
        let vtx1 = TestVertex::new(test_id(2), &parents, 1, vec![TestTx::new(test_id(11), &[u0]) as Arc<dyn Tx>]);
        dag.add(vtx0).unwrap();
        dag.add(vtx1).unwrap();

        let mut votes = UniqueBag::new();
        votes.add(0, test_id(1));
        votes.add(1, test_id(2));
        // Responder 2 casts an illegal split vote.
        votes.add(2, test_id(1));
        votes.add(2, test_id(2));

        let outcome = dag.record_poll(votes).unwrap();
        assert!(outcome.is_empty());
        assert!(!dag.finalized());
    }

    #[test]
    fn test_empty_poll_is_noop() {
        let (mut dag, genesis, _getter) = setup(params(2, 2, 1, 2));
        let parents = [genesis[0].id(), genesis[1].id()];
        let vtx0 = TestVertex::new(
            test_id(1),
            &parents,
            1,
            vec![TestTx::new(test_id(10), &[test_id(100)]) as Arc<dyn Tx>],
        );
        dag.add(vtx0).unwrap();

        let before = dag.virtuous().clone();
        let outcome = dag.record_poll(UniqueBag::new()).unwrap();
        assert!(outcome.is_empty());
        assert_eq!(dag.virtuous(), &before);
    }

    #[test]
    fn test_parameters_roundtrip() {
        let (dag, _genesis, _getter) = setup(params(2, 2, 1, 2));
        let p = dag.parameters();
        assert_eq!(p.k, 2);
        assert_eq!(p.alpha, 2);
        assert_eq!(p.beta_virtuous, 1);
        assert_eq!(p.beta_rogue, 2);
        assert_eq!(p.parents, 2);
    }
}
