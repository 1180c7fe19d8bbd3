use std::sync::Arc;
use std::time::Instant;
use wartlern_core::{ActionId, StateKey};
use wartlern_policy::{KnowledgeStore, PolicyConfig, QLearningPolicy};

/// Number of distinct technician actions per state in the fill phase.
const CANDIDATES: usize = 50;

fn main() {
    let store = Arc::new(KnowledgeStore::new());
    let policy = QLearningPolicy::new(Arc::clone(&store), PolicyConfig::default());
    let state = StateKey::from_raw("cat_ELEC_type_correctivo_pri_100");
    let next = state.completed();
    let action = ActionId::technician("1");

    let iterations: u32 = 1_000_000;

    // Warmup
    for _ in 0..1000 {
        let _ = policy.update(&state, &action, 10.0, &next);
    }

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = policy.update(&state, &action, 10.0, &next);
    }
    let duration = start.elapsed();
    println!("Update of an EXISTING pair took: {:?}", duration);
    println!("Average per call: {:?}", duration / iterations);

    let candidates: Vec<ActionId> = (0..CANDIDATES)
        .map(|i| ActionId::technician(&i.to_string()))
        .collect();
    for (i, c) in candidates.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let value = i as f64;
        store.set(&state, c, value);
    }

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = policy.select_action(&state, &candidates);
    }
    let duration = start.elapsed();
    println!(
        "Selection among {} candidates took: {:?}",
        CANDIDATES, duration
    );
    println!("Average per call: {:?}", duration / iterations);
}
