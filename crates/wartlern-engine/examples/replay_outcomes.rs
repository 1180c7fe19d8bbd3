//! Replays a small history of work outcomes and shows how assignments shift.
//!
//! Technician "2" has the better static rating, but technician "1" keeps
//! closing the electrical work fast and under budget. After the replay the
//! engine prefers "1" for that context.
//!
//! Run with: cargo run -p wartlern-engine --example replay_outcomes

use std::error::Error;
use std::sync::Arc;
use wartlern_core::{OutcomeRecord, Priority, Technician, WorkItem};
use wartlern_engine::{DecisionEngine, EngineConfig};
use wartlern_policy::MemoryBackend;

fn technician(id: &str, name: &str, rating: f64) -> Technician {
    Technician {
        id: id.to_string(),
        name: Some(name.to_string()),
        specialty: Some("ELEC".to_string()),
        rating,
    }
}

fn work_order(id: usize, assigned: &str) -> WorkItem {
    WorkItem {
        id: format!("OT-{id:03}"),
        category: Some("ELEC".to_string()),
        work_type: Some("correctivo".to_string()),
        priority: Some(Priority::High),
        description: Some("Tablero con falla, motor detenido".to_string()),
        assigned_technician: Some(assigned.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let engine = DecisionEngine::open(&EngineConfig::default(), Arc::new(MemoryBackend::new())).await?;
    let pool = [technician("1", "Ana", 3.5), technician("2", "Luis", 4.8)];
    let probe = work_order(0, "1");

    let before = engine.decide_technician(&probe, &pool)?;
    println!(
        "before: {} ({:?}, confidence {:.2})",
        before.technician.id, before.source, before.confidence
    );

    for i in 1..=20 {
        let (assigned, outcome) = if i % 2 == 0 {
            (
                "1",
                OutcomeRecord {
                    was_successful: true,
                    resolution_days: 2,
                    expected_cost: 800.0,
                    actual_cost: 500.0,
                },
            )
        } else {
            (
                "2",
                OutcomeRecord {
                    was_successful: false,
                    resolution_days: 40,
                    expected_cost: 800.0,
                    actual_cost: 1_500.0,
                },
            )
        };
        let result = engine.learn_from_outcome(&work_order(i, assigned), &outcome)?;
        println!(
            "OT-{i:03} tech {assigned}: reward {:+.1}, value {:.3} -> {:.3}",
            result.reward, result.previous_value, result.new_value
        );
    }

    let after = engine.decide_technician(&probe, &pool)?;
    println!(
        "after:  {} ({:?}, confidence {:.2})",
        after.technician.id, after.source, after.confidence
    );
    println!("{}", serde_json::to_string_pretty(&engine.statistics())?);

    engine.shutdown().await?;
    Ok(())
}
