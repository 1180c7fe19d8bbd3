use std::io::{self, Read};
use std::sync::Arc;

use serde::Serialize;
use wartlern_core::{encode, ActionId, Priority, StateKey, WorkContext};
use wartlern_policy::{KnowledgeStore, PolicyConfig, QLearningPolicy, Selection};

#[derive(Serialize)]
struct SelectionRecord {
    state: StateKey,
    candidates: Vec<ActionId>,
    selection: Selection,
}

/// Reads a work context as JSON from stdin (empty input means an empty
/// context) and prints which priority action an empty policy would pick.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    let ctx: WorkContext = if input.trim().is_empty() {
        WorkContext::default()
    } else {
        serde_json::from_str(&input)?
    };

    let policy = QLearningPolicy::new(Arc::new(KnowledgeStore::new()), PolicyConfig::default());
    let state = encode(&ctx);
    let candidates: Vec<ActionId> = Priority::ALL.iter().map(|p| p.action_id()).collect();
    let selection = policy.select_action(&state, &candidates)?;

    let record = SelectionRecord {
        state,
        candidates,
        selection,
    };
    serde_json::to_writer_pretty(io::stdout(), &record)?;
    println!();

    Ok(())
}
