//! Property-based tests: random operation sequences against a model map.

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rouletteset::RouletteSet;
use std::collections::HashMap;

const MIN_W: f64 = 1.0;
const MAX_W: f64 = 100.0;

#[derive(Debug, Clone)]
enum Op {
    Insert(u32, f64),
    SetWeight(u32, f64),
    Erase(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = 0u32..30;
    let weight = MIN_W..MAX_W;
    prop_oneof![
        (key.clone(), weight.clone()).prop_map(|(k, w)| Op::Insert(k, w)),
        (key.clone(), weight).prop_map(|(k, w)| Op::SetWeight(k, w)),
        key.prop_map(Op::Erase),
    ]
}

fn apply(set: &mut RouletteSet<u32>, model: &mut HashMap<u32, f64>, op: &Op) {
    match *op {
        Op::Insert(k, w) => {
            let inserted = set.insert(&k, w).unwrap();
            assert_eq!(inserted, !model.contains_key(&k));
            model.entry(k).or_insert(w);
        }
        Op::SetWeight(k, w) => {
            set.set_weight(&k, w).unwrap();
            model.insert(k, w);
        }
        Op::Erase(k) => {
            let erased = set.erase(&k);
            assert_eq!(erased, model.remove(&k).is_some());
        }
    }
}

proptest! {
    /// After any operation sequence, the set agrees with a model map on
    /// membership, weights, size, and (within drift tolerance) total weight.
    #[test]
    fn prop_set_agrees_with_model(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut set = RouletteSet::new(MIN_W, MAX_W).unwrap();
        let mut model = HashMap::new();

        for op in &ops {
            apply(&mut set, &mut model, op);
            prop_assert_eq!(set.size(), model.len());
        }

        let tolerance = 1e-9 * MAX_W * ops.len() as f64;
        let model_total: f64 = model.values().sum();
        prop_assert!((set.total_weight() - model_total).abs() <= tolerance);

        for (k, &w) in &model {
            prop_assert_eq!(set.count(k), 1);
            prop_assert_eq!(set.get_weight(k).unwrap(), w);
        }
    }

    /// Iteration visits every element exactly once with its stored weight.
    #[test]
    fn prop_iteration_is_exhaustive(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut set = RouletteSet::new(MIN_W, MAX_W).unwrap();
        let mut model = HashMap::new();
        for op in &ops {
            apply(&mut set, &mut model, op);
        }

        let mut visited = HashMap::new();
        for (k, w) in &set {
            prop_assert!(visited.insert(*k, w).is_none(), "element visited twice");
        }
        prop_assert_eq!(visited, model);
    }

    /// The stateful cursor and the borrowing iterator agree.
    #[test]
    fn prop_cursor_matches_iterator(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut set = RouletteSet::new(MIN_W, MAX_W).unwrap();
        let mut model = HashMap::new();
        for op in &ops {
            apply(&mut set, &mut model, op);
        }

        let items: Vec<(u32, f64)> = set.iter().map(|(k, w)| (*k, w)).collect();
        set.iter_begin();
        for (k, w) in items {
            prop_assert_eq!(set.get_at_iter().unwrap(), (k, w));
            set.iter_next().unwrap();
        }
        prop_assert!(set.get_at_iter().is_err());
    }

    /// Every sampled element is a member and reports its stored weight.
    #[test]
    fn prop_samples_are_members(
        ops in prop::collection::vec(op_strategy(), 1..60),
        seed in any::<u64>(),
    ) {
        let mut set = RouletteSet::new(MIN_W, MAX_W).unwrap();
        let mut model = HashMap::new();
        for op in &ops {
            apply(&mut set, &mut model, op);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for _ in 0..50 {
            match set.sample_with(&mut rng) {
                Ok((element, weight)) => {
                    prop_assert_eq!(model.get(&element).copied(), Some(weight));
                }
                Err(_) => prop_assert!(set.is_empty()),
            }
        }
    }
}
