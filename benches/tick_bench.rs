use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use infra_sim::config::EngineSettings;
use infra_sim::live::LiveEngine;
use infra_sim::models::{ComponentConfig, ComponentType, Edge, Graph, Node};

const TICKS: usize = 100;
const RATES: &[f64] = &[100.0, 2_000.0, 20_000.0];

fn build_graph(rps: f64) -> Graph {
    let mut client = Node::of_type("client", ComponentType::Client);
    if let ComponentConfig::Client(cfg) = &mut client.config {
        cfg.requests_per_second = Some(rps);
    }
    Graph::new(
        vec![
            client,
            Node::of_type("lb", ComponentType::LoadBalancer),
            Node::of_type("app-a", ComponentType::AppServer),
            Node::of_type("app-b", ComponentType::AppServer),
            Node::of_type("queue", ComponentType::MessageQueue),
            Node::of_type("worker", ComponentType::AppServer),
            Node::of_type("db", ComponentType::DatabaseSql),
        ],
        vec![
            Edge::new("e1", "client", "lb"),
            Edge::new("e2", "lb", "app-a"),
            Edge::new("e3", "lb", "app-b"),
            Edge::new("e4", "app-a", "db"),
            Edge::new("e5", "app-b", "queue"),
            Edge::new("e6", "queue", "worker"),
            Edge::new("e7", "worker", "db"),
        ],
    )
}

fn bench_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("live");
    let settings = EngineSettings::default();

    for &rps in RATES {
        group.bench_with_input(BenchmarkId::new("step", rps as u64), &rps, |b, &rps| {
            b.iter_batched(
                || {
                    let mut engine = LiveEngine::new(&settings);
                    engine
                        .init(build_graph(rps), 1.0, 1.0)
                        .expect("graph should be valid");
                    engine
                },
                |mut engine| {
                    for _ in 0..TICKS {
                        black_box(engine.step().expect("engine is initialized"));
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ticks);
criterion_main!(benches);
