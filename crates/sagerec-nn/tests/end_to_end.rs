//! Sampling, aggregation and scoring on a small rating graph.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
use sagerec_core::{ItemAttrs, NodeType, RatingGraph, UserAttrs};
use sagerec_nn::{
    EncoderConfig, LayeredAggregator, SageEncoder, Scorer, Trainer, TrainingConfig, TypedUpdate,
};
use std::cell::RefCell;
use std::collections::HashSet;

/// Forwards to the encoder's update weights, keeping every input it sees.
struct Recording<'a, U> {
    inner: &'a U,
    inputs: RefCell<Vec<(usize, NodeType, Vec<Vec<f32>>)>>,
}

impl<U: TypedUpdate> TypedUpdate for Recording<'_, U> {
    fn depth(&self) -> usize {
        self.inner.depth()
    }

    fn update(
        &self,
        layer: usize,
        node_type: NodeType,
        input: &Tensor,
    ) -> sagerec_nn::Result<Tensor> {
        self.inputs
            .borrow_mut()
            .push((layer, node_type, input.to_vec2::<f32>()?));
        self.inner.update(layer, node_type, input)
    }
}

struct Toy {
    graph: RatingGraph,
    u1: usize,
    u2: usize,
    u3: usize,
    m1: usize,
    m2: usize,
}

/// Users u1, u2, u3 and items m1, m2 with ratings u1-m1 (5), u1-m2 (3), u2-m1 (4).
fn toy() -> Toy {
    let mut graph = RatingGraph::new();
    let user = |age| UserAttrs {
        age,
        gender: 0,
        occupation: 0,
        zip: 0,
    };
    let u1 = graph.add_user(user(1)).unwrap();
    let u2 = graph.add_user(user(2)).unwrap();
    let u3 = graph.add_user(user(3)).unwrap();
    let m1 = graph
        .add_item(ItemAttrs {
            year: 0,
            genres: vec![1.0, 0.0],
        })
        .unwrap();
    let m2 = graph
        .add_item(ItemAttrs {
            year: 1,
            genres: vec![0.0, 1.0],
        })
        .unwrap();
    graph.add_interaction(u1, m1, 5.0, 0, false).unwrap();
    graph.add_interaction(u1, m2, 3.0, 1, false).unwrap();
    graph.add_interaction(u2, m1, 4.0, 2, false).unwrap();
    Toy {
        graph,
        u1,
        u2,
        u3,
        m1,
        m2,
    }
}

#[test]
fn block_for_u1_holds_both_items_and_itself() {
    let t = toy();
    let mut sampler = NeighborSampler::seeded(&t.graph, SamplerConfig::new(2, 1), 17);
    let flow = sampler.build_flow(&[t.u1]).unwrap();

    let feeds: HashSet<usize> = flow.in_neighbors(0, t.u1).unwrap().into_iter().collect();
    assert_eq!(feeds, HashSet::from([t.m1, t.m2, t.u1]));
    assert_eq!(flow.block(0).unwrap().row(0).len(), 3);
}

#[test]
fn scorer_returns_dot_plus_biases() {
    let t = toy();
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = EncoderConfig {
        hidden_dim: 6,
        depth: 1,
        ..Default::default()
    };
    let encoder = SageEncoder::new(&t.graph, config, vb.pp("encoder")).unwrap();
    let scorer = Scorer::new(t.graph.num_nodes(), vb.pp("scorer")).unwrap();

    let mut sampler = NeighborSampler::seeded(&t.graph, SamplerConfig::new(2, 1), 17);
    let flow = sampler.build_flow(&[t.u1, t.m1]).unwrap();
    let emb = encoder.encode(&flow, &t.graph).unwrap();

    let hu = emb.get(t.u1).unwrap().unwrap();
    let hm = emb.get(t.m1).unwrap().unwrap();
    let score = scorer.score_one(&hu, &hm, t.u1, t.m1).unwrap();
    assert!(score.is_finite());

    let dot: f32 = hu.iter().zip(&hm).map(|(a, b)| a * b).sum();
    let expected = dot + scorer.bias(t.u1).unwrap() + scorer.bias(t.m1).unwrap();
    assert!((score - expected).abs() < 1e-6);

    // batched form agrees with the scalar form
    let batched = scorer
        .score(
            &emb.rows(&[t.u1]).unwrap(),
            &emb.rows(&[t.m1]).unwrap(),
            &[t.u1],
            &[t.m1],
        )
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    assert!((batched[0] - score).abs() < 1e-5);
}

#[test]
fn isolated_user_gets_zero_message() {
    let t = toy();
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let hidden = 4;
    let config = EncoderConfig {
        hidden_dim: hidden,
        depth: 2,
        ..Default::default()
    };
    let encoder = SageEncoder::new(&t.graph, config, vb).unwrap();

    let mut sampler = NeighborSampler::seeded(&t.graph, SamplerConfig::new(2, 2), 1);
    let flow = sampler.build_flow(&[t.u3, t.u2]).unwrap();
    assert_eq!(flow.in_neighbors(0, t.u3), Some(vec![t.u3]));

    let update = Recording {
        inner: encoder.update(),
        inputs: RefCell::new(Vec::new()),
    };
    let emb = LayeredAggregator::new(config.epsilon)
        .compute_embeddings(&flow, &t.graph, encoder.input(), &update)
        .unwrap();
    assert_eq!(emb.nodes(), &[t.u3, t.u2]);
    for row in emb.tensor().to_vec2::<f32>().unwrap() {
        assert!(row.iter().all(|x| x.is_finite()));
    }

    // the mean half of u3's update input is exactly zero at every layer
    let mut checked = 0;
    for (layer, node_type, rows) in update.inputs.borrow().iter() {
        if *node_type != NodeType::User {
            continue;
        }
        let users: Vec<usize> = flow
            .layer(*layer)
            .iter()
            .copied()
            .filter(|&v| t.graph.node_type(v).unwrap() == NodeType::User)
            .collect();
        if let Some(p) = users.iter().position(|&v| v == t.u3) {
            assert!(rows[p][..hidden].iter().any(|&x| x != 0.0));
            assert!(rows[p][hidden..].iter().all(|&x| x == 0.0));
            checked += 1;
        }
    }
    assert_eq!(checked, 2);

    // the encoder's own entry point agrees
    let direct = encoder.encode(&flow, &t.graph).unwrap();
    assert_eq!(
        direct.tensor().to_vec2::<f32>().unwrap(),
        emb.tensor().to_vec2::<f32>().unwrap()
    );
}

#[test]
fn training_on_toy_graph_lowers_loss() {
    let t = toy();
    let config = TrainingConfig::default()
        .with_hidden_dim(4)
        .with_fanout(2)
        .with_depth(1)
        .with_batch_size(1)
        .with_learning_rate(0.05)
        .with_epochs(10);
    let mut trainer = Trainer::new(&t.graph, config).unwrap();
    let report = trainer.fit().unwrap();

    let first = report.epochs[0].train_mse;
    let last = report.final_train_mse().unwrap();
    assert!(first.is_finite() && last.is_finite());
    assert!(last < first);
    assert!(trainer.predict(t.u1, t.m2).unwrap().is_finite());
}
