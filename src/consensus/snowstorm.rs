//! Transaction-level consensus (Snowstorm).
//!
//! The conflict graph partitions processing transactions into conflict
//! sets keyed by shared input ids, and drives a [`Snowball`] instance per
//! set. Settlement is reported upward: the DAG layer performs every
//! external `accept`/`reject` effect so commit ordering has one owner.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::snowball::Snowball;
use super::Tx;
use crate::bag::Bag;
use crate::ids::Id;
use crate::{ConsensusError, Parameters, Result};

struct TxNode {
    tx: Arc<dyn Tx>,
    /// Issuance sequence, used for first-added ordering
    seq: u64,
}

struct ConflictSet {
    /// Members in first-added order
    members: Vec<Id>,
    /// Union of the members' input ids
    inputs: HashSet<Id>,
    sb: Snowball,
    /// One-way flag: set once the set has ever held two members
    rogue: bool,
    /// Last round in which this set saw a successful poll
    last_round: u64,
}

/// Transactions newly settled by a poll.
///
/// `accepting` txs won their conflict set and await acceptance through
/// their containing vertices; `rejecting` txs lost theirs and are no
/// longer tracked here - the caller must apply `reject()` to them.
#[derive(Default)]
pub struct PollUpdates {
    /// Winners, in first-added order.
    pub accepting: Vec<Arc<dyn Tx>>,
    /// Losers, pending external rejection.
    pub rejecting: Vec<Arc<dyn Tx>>,
}

/// The transaction-level conflict graph.
pub struct Snowstorm {
    params: Parameters,
    txs: HashMap<Id, TxNode>,
    /// input id -> conflict set
    inputs: HashMap<Id, u64>,
    /// tx id -> conflict set
    set_ids: HashMap<Id, u64>,
    sets: HashMap<u64, ConflictSet>,
    next_set: u64,
    next_seq: u64,
    current_round: u64,
}

impl Snowstorm {
    /// Creates a conflict graph with the given parameters.
    ///
    /// # Errors
    ///
    /// Fails if the parameters are invalid.
    pub fn new(params: Parameters) -> Result<Self> {
        params
            .validate()
            .map_err(ConsensusError::InvalidParameters)?;
        Ok(Self {
            params,
            txs: HashMap::new(),
            inputs: HashMap::new(),
            set_ids: HashMap::new(),
            sets: HashMap::new(),
            next_set: 0,
            next_seq: 0,
            current_round: 0,
        })
    }

    /// Returns true if the transaction is currently tracked.
    pub fn issued(&self, tx_id: &Id) -> bool {
        self.txs.contains_key(tx_id)
    }

    /// Returns the number of processing transactions.
    pub fn num_processing(&self) -> usize {
        self.txs.len()
    }

    /// Registers a transaction into its conflict set.
    ///
    /// Overlapping conflict sets are unioned; a set that grows past one
    /// member becomes rogue for the rest of its lifetime. Re-adding an
    /// issued transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NoInputs` for a transaction with an empty input set.
    pub fn add(&mut self, tx: Arc<dyn Tx>) -> Result<()> {
        let tx_id = tx.id();
        if self.txs.contains_key(&tx_id) {
            return Ok(());
        }
        let tx_inputs = tx.input_ids();
        if tx_inputs.is_empty() {
            return Err(ConsensusError::NoInputs(tx_id.to_string()));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let mut touched: Vec<u64> = tx_inputs
            .iter()
            .filter_map(|input| self.inputs.get(input).copied())
            .collect();
        touched.sort_unstable();
        touched.dedup();

        let target = match touched.first().copied() {
            None => {
                let sid = self.next_set;
                self.next_set += 1;
                self.sets.insert(
                    sid,
                    ConflictSet {
                        members: Vec::new(),
                        inputs: HashSet::new(),
                        sb: Snowball::new(tx_id),
                        rogue: false,
                        last_round: 0,
                    },
                );
                sid
            }
            Some(first) => {
                for sid in touched.iter().skip(1) {
                    self.merge_sets(first, *sid);
                }
                first
            }
        };

        let set = self.sets.get_mut(&target).expect("target set exists");
        set.members.push(tx_id);
        set.inputs.extend(tx_inputs.iter().copied());
        if set.members.len() > 1 {
            set.rogue = true;
        }
        for input in tx_inputs {
            self.inputs.insert(*input, target);
        }
        self.set_ids.insert(tx_id, target);
        self.txs.insert(tx_id, TxNode { tx, seq });

        debug!(tx = %tx_id, set = target, "registered transaction");
        Ok(())
    }

    /// Folds `src` into `dst`, rebuilding the merged snowball state.
    fn merge_sets(&mut self, dst: u64, src: u64) {
        let src_set = self.sets.remove(&src).expect("source set exists");
        for input in &src_set.inputs {
            self.inputs.insert(*input, dst);
        }
        for member in &src_set.members {
            self.set_ids.insert(*member, dst);
        }

        let dst_set = self.sets.get_mut(&dst).expect("destination set exists");
        dst_set.members.extend(src_set.members);
        dst_set.inputs.extend(src_set.inputs);
        dst_set.rogue = true;
        dst_set.last_round = dst_set.last_round.max(src_set.last_round);

        // Members stay in first-added order; the merged set restarts its
        // confidence run from the earliest member.
        let mut ordered = dst_set.members.clone();
        ordered.sort_by_key(|m| self.txs.get(m).map(|n| n.seq).unwrap_or(u64::MAX));
        let pref = ordered[0];
        let dst_set = self.sets.get_mut(&dst).expect("destination set exists");
        dst_set.members = ordered;
        dst_set.sb.reprefer(pref);
    }

    /// Returns true if the transaction would be the only spender of all
    /// of its inputs.
    ///
    /// Works for both issued and un-issued transactions.
    pub fn is_virtuous(&self, tx: &dyn Tx) -> bool {
        let tx_id = tx.id();
        for input in tx.input_ids() {
            if let Some(sid) = self.inputs.get(input) {
                let set = &self.sets[sid];
                if set.members.iter().any(|m| *m != tx_id) {
                    return false;
                }
            }
        }
        true
    }

    /// Returns the processing transactions sharing any input with `tx`.
    pub fn conflicts(&self, tx: &dyn Tx) -> HashSet<Id> {
        let tx_id = tx.id();
        let mut out = HashSet::new();
        for input in tx.input_ids() {
            if let Some(sid) = self.inputs.get(input) {
                out.extend(self.sets[sid].members.iter().copied());
            }
        }
        out.remove(&tx_id);
        out
    }

    /// Returns the preferred transaction of every conflict set.
    pub fn preferences(&self) -> HashSet<Id> {
        self.sets.values().map(|s| s.sb.preference()).collect()
    }

    /// Returns the transactions in singleton conflict sets.
    pub fn virtuous(&self) -> HashSet<Id> {
        self.sets
            .values()
            .filter(|s| !s.rogue)
            .flat_map(|s| s.members.iter().copied())
            .collect()
    }

    /// Returns true when no virtuous transaction still needs polling.
    pub fn quiesce(&self) -> bool {
        !self
            .sets
            .values()
            .any(|s| !s.rogue && !s.sb.finalized())
    }

    /// Returns true when no processing transactions remain.
    pub fn finalized(&self) -> bool {
        self.txs.is_empty()
    }

    /// Applies a round of votes.
    ///
    /// Transactions tallying at least `alpha` votes record a successful
    /// poll on their conflict set; sets skipped by a round lose their
    /// confidence run. Newly finalized sets report their winner in
    /// `accepting` and drop their losers into `rejecting`.
    pub fn record_poll(&mut self, mut votes: Bag<Id>) -> Result<PollUpdates> {
        self.current_round += 1;
        votes.set_threshold(self.params.alpha);

        let mut hits: Vec<(u64, Id)> = votes
            .threshold()
            .iter()
            .filter_map(|id| self.txs.get(id).map(|n| (n.seq, *id)))
            .collect();
        hits.sort_unstable();

        let mut finalized_sets = Vec::new();
        for (_, tx_id) in hits {
            let sid = self.set_ids[&tx_id];
            let set = self.sets.get_mut(&sid).expect("set exists for issued tx");
            if set.sb.finalized() {
                continue;
            }
            if set.last_round + 1 != self.current_round {
                set.sb.record_unsuccessful_poll();
            }
            set.last_round = self.current_round;

            let beta = if set.rogue {
                self.params.beta_rogue
            } else {
                self.params.beta_virtuous
            };
            if set.sb.record_successful_poll(tx_id, beta) {
                finalized_sets.push(sid);
            }
        }

        let mut updates = PollUpdates::default();
        for sid in finalized_sets {
            let set = self.sets.get_mut(&sid).expect("finalized set exists");
            let winner = set.sb.preference();
            let losers: Vec<Id> = set
                .members
                .iter()
                .copied()
                .filter(|m| *m != winner)
                .collect();
            set.members.retain(|m| *m == winner);

            debug!(winner = %winner, losers = losers.len(), "conflict set finalized");
            updates
                .accepting
                .push(self.txs[&winner].tx.clone());
            for loser in losers {
                self.set_ids.remove(&loser);
                let node = self.txs.remove(&loser).expect("loser was issued");
                updates.rejecting.push(node.tx);
            }
        }

        updates
            .accepting
            .sort_by_key(|tx| self.txs[&tx.id()].seq);
        Ok(updates)
    }

    /// Retires a winner that the caller has externally accepted.
    ///
    /// Destroys its conflict set; any member that joined after
    /// finalization is returned for external rejection.
    pub fn mark_accepted(&mut self, tx_id: &Id) -> Vec<Arc<dyn Tx>> {
        let Some(sid) = self.set_ids.remove(tx_id) else {
            return Vec::new();
        };
        self.txs.remove(tx_id);
        let set = self.sets.remove(&sid).expect("set exists for issued tx");
        for input in &set.inputs {
            if self.inputs.get(input) == Some(&sid) {
                self.inputs.remove(input);
            }
        }

        let mut late_losers = Vec::new();
        for member in set.members {
            if member == *tx_id {
                continue;
            }
            self.set_ids.remove(&member);
            if let Some(node) = self.txs.remove(&member) {
                late_losers.push(node.tx);
            }
        }
        late_losers
    }

    /// Removes a transaction the DAG found unreachable, with no external
    /// effects.
    pub fn remove(&mut self, tx_id: &Id) {
        let Some(sid) = self.set_ids.remove(tx_id) else {
            return;
        };
        self.txs.remove(tx_id);

        let set = self.sets.get_mut(&sid).expect("set exists for issued tx");
        set.members.retain(|m| m != tx_id);

        if set.members.is_empty() {
            let set = self.sets.remove(&sid).expect("set exists");
            for input in &set.inputs {
                if self.inputs.get(input) == Some(&sid) {
                    self.inputs.remove(input);
                }
            }
            return;
        }

        // Shrink the input footprint to the remaining members.
        let mut remaining_inputs = HashSet::new();
        for member in &set.members {
            remaining_inputs.extend(self.txs[member].tx.input_ids().iter().copied());
        }
        for gone in set.inputs.difference(&remaining_inputs) {
            if self.inputs.get(gone) == Some(&sid) {
                self.inputs.remove(gone);
            }
        }
        set.inputs = remaining_inputs;

        if set.sb.preference() == *tx_id && !set.sb.finalized() {
            let new_pref = set
                .members
                .iter()
                .min_by_key(|m| self.txs[*m].seq)
                .copied()
                .expect("set is non-empty");
            set.sb.reprefer(new_pref);
        }
    }
}
