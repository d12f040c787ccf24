//! Benchmarks for graph evaluation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strand_core::{
    Affected, ComputeNode, ContentHasher, Evaluation, Graph, PlugId, PlugSpec, Result, Value,
    ValueType,
};

/// out = in + 1.
struct Increment;

impl ComputeNode for Increment {
    fn type_name(&self) -> &'static str {
        "Increment"
    }

    fn affects(&self, graph: &Graph, input: PlugId) -> Affected {
        let mut affected = Affected::new();
        if let Some(node) = graph.owning_node(input) {
            if let Ok(Some(out)) = graph.plug_child(node, "out") {
                affected.push(out);
            }
        }
        affected
    }

    fn hash(
        &self,
        output: PlugId,
        eval: &Evaluation<'_>,
        hasher: &mut ContentHasher,
    ) -> Result<()> {
        let node = eval.graph().owning_node(output).expect("owned output");
        let input = eval.graph().plug_child(node, "in")?.expect("in plug");
        hasher.append_hash(eval.hash(input)?);
        Ok(())
    }

    fn compute(&self, output: PlugId, eval: &Evaluation<'_>) -> Result<Value> {
        let node = eval.graph().owning_node(output).expect("owned output");
        let input = eval.graph().plug_child(node, "in")?.expect("in plug");
        Ok(Value::Int(eval.value(input)?.as_int()? + 1))
    }
}

/// A linear chain of `length` increment nodes; returns the graph plus the
/// first input and final output.
fn chain(length: usize) -> (Graph, PlugId, PlugId) {
    let mut graph = Graph::new();
    let mut first = None;
    let mut previous = None;
    let mut last = None;
    for i in 0..length {
        let node = graph
            .add_node(&format!("inc{i}"), Box::new(Increment))
            .unwrap();
        let input = graph
            .add_plug(node, "in", PlugSpec::input(ValueType::Int))
            .unwrap();
        let out = graph
            .add_plug(node, "out", PlugSpec::output(ValueType::Int))
            .unwrap();
        if let Some(previous) = previous {
            graph.set_input(input, Some(previous)).unwrap();
        } else {
            first = Some(input);
        }
        previous = Some(out);
        last = Some(out);
    }
    (graph, first.unwrap(), last.unwrap())
}

fn bench_cold_evaluation(c: &mut Criterion) {
    for length in [10, 100] {
        c.bench_function(&format!("cold_chain_{length}"), |b| {
            let (mut graph, first, last) = chain(length);
            let mut i = 0i64;
            b.iter(|| {
                // A fresh input value defeats both caches.
                i += 1;
                graph.set_value(first, Value::Int(i)).unwrap();
                black_box(graph.value(black_box(last)).unwrap())
            })
        });
    }
}

fn bench_cached_evaluation(c: &mut Criterion) {
    for length in [10, 100] {
        c.bench_function(&format!("cached_chain_{length}"), |b| {
            let (mut graph, first, last) = chain(length);
            graph.set_value(first, Value::Int(1)).unwrap();
            graph.value(last).unwrap();
            b.iter(|| black_box(graph.value(black_box(last)).unwrap()))
        });
    }
}

fn bench_hash_only(c: &mut Criterion) {
    c.bench_function("hash_chain_100", |b| {
        let (mut graph, first, last) = chain(100);
        graph.set_value(first, Value::Int(1)).unwrap();
        graph.value_hash(last).unwrap();
        b.iter(|| black_box(graph.value_hash(black_box(last)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_cold_evaluation,
    bench_cached_evaluation,
    bench_hash_only
);
criterion_main!(benches);
