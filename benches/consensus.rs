//! Consensus benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use avalanche_dag::consensus::testing::{TestTx, TestVertex, TestVertexGetter};
use avalanche_dag::{Avalanche, Id, Parameters, Registry, Tx, UniqueBag, Vertex};

fn id_of(n: u64) -> Id {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_be_bytes());
    bytes[31] = 1;
    Id::from_bytes(bytes)
}

const GENESIS: u64 = u64::MAX;

fn new_dag(params: Parameters) -> Avalanche {
    let getter = TestVertexGetter::new();
    let genesis: Arc<dyn Vertex> = TestVertex::genesis(id_of(GENESIS));
    getter.insert(genesis.clone());
    let registry = Registry::new("bench");
    Avalanche::new(params, &registry, vec![genesis], getter).unwrap()
}

fn chain_params(beta_virtuous: usize) -> Parameters {
    Parameters {
        k: 20,
        alpha: 15,
        beta_virtuous,
        beta_rogue: beta_virtuous + 1,
        concurrent_repolls: 1,
        parents: 5,
        batch_size: 30,
    }
}

/// Builds a chain of `depth` single-tx vertices on top of genesis and
/// returns the tip id.
fn build_chain(dag: &mut Avalanche, depth: u64) -> Id {
    let mut tip = id_of(GENESIS);
    for i in 0..depth {
        let tx = TestTx::new(id_of(1_000_000 + i), &[id_of(2_000_000 + i)]);
        let vtx_id = id_of(1 + i);
        let vtx = TestVertex::new(vtx_id, &[tip], i + 1, vec![tx as Arc<dyn Tx>]);
        dag.add(vtx).unwrap();
        tip = vtx_id;
    }
    tip
}

fn tip_votes(tip: Id) -> UniqueBag<Id> {
    let mut votes = UniqueBag::new();
    for responder in 0..15 {
        votes.add(responder, tip);
    }
    votes
}

fn bench_chain_finalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_finalization");

    for depth in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let mut dag = new_dag(chain_params(1));
                let tip = build_chain(&mut dag, depth);
                let outcome = dag.record_poll(tip_votes(tip)).unwrap();
                black_box(outcome.accepted.len())
            });
        });
    }

    group.finish();
}

fn bench_vote_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("vote_propagation");

    for depth in [10u64, 100, 1000] {
        // A beta far out of reach keeps every round undecided, so each
        // iteration measures pure vote propagation over the chain.
        let mut dag = new_dag(chain_params(1_000_000));
        let tip = build_chain(&mut dag, depth);
        let votes = tip_votes(tip);

        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                let outcome = dag.record_poll(votes.clone()).unwrap();
                black_box(outcome.is_empty())
            });
        });
    }

    group.finish();
}

fn bench_conflict_resolution(c: &mut Criterion) {
    c.bench_function("conflict_resolution", |b| {
        b.iter(|| {
            let mut dag = new_dag(chain_params(1));
            let genesis = [id_of(GENESIS)];
            let input = id_of(3_000_000);
            let tx0 = TestTx::new(id_of(1_000_000), &[input]);
            let tx1 = TestTx::new(id_of(1_000_001), &[input]);
            let vtx0 = TestVertex::new(id_of(1), &genesis, 1, vec![tx0 as Arc<dyn Tx>]);
            let vtx1 = TestVertex::new(id_of(2), &genesis, 1, vec![tx1 as Arc<dyn Tx>]);
            dag.add(vtx0).unwrap();
            dag.add(vtx1).unwrap();

            // beta_rogue rounds settle the conflicted pair.
            dag.record_poll(tip_votes(id_of(2))).unwrap();
            let outcome = dag.record_poll(tip_votes(id_of(2))).unwrap();
            black_box(outcome.rejected.len())
        });
    });
}

criterion_group!(
    benches,
    bench_chain_finalization,
    bench_vote_propagation,
    bench_conflict_resolution,
);

criterion_main!(benches);
