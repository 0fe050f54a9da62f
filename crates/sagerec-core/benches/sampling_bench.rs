use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
use sagerec_core::{ItemAttrs, RatingGraph, UserAttrs};

fn bench_sampling(c: &mut Criterion) {
    // 1000 users x 500 items, each user rating 20 items
    let mut graph = RatingGraph::with_capacity(1500, 20_000);
    for u in 0..1000u32 {
        graph
            .add_user(UserAttrs {
                age: u % 7,
                gender: u % 2,
                occupation: u % 21,
                zip: u % 10,
            })
            .unwrap();
    }
    for m in 0..500u32 {
        graph
            .add_item(ItemAttrs {
                year: m % 30,
                genres: (0..19)
                    .map(|g| f32::from(u8::from((m + g) % 5 == 0)))
                    .collect(),
            })
            .unwrap();
    }
    for u in 0..1000usize {
        for j in 0..20usize {
            let item = 1000 + (u * 7 + j * 31) % 500;
            graph
                .add_interaction(u, item, ((u + j) % 5 + 1) as f32, 0, false)
                .unwrap();
        }
    }

    let seeds: Vec<usize> = (0..256).map(|i| i * 5).collect();
    let config = SamplerConfig::new(10, 2);

    c.bench_function("build_flow_256_seeds", |b| {
        let mut sampler = NeighborSampler::seeded(&graph, config, 42);
        b.iter(|| sampler.build_flow(black_box(&seeds)))
    });

    c.bench_function("build_flow_par_256_seeds", |b| {
        let mut sampler = NeighborSampler::seeded(&graph, config, 42);
        b.iter(|| sampler.build_flow_par(black_box(&seeds)))
    });
}

criterion_group!(benches, bench_sampling);
criterion_main!(benches);
