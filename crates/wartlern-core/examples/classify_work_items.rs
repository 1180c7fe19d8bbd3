use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use wartlern_core::{encode, KeywordScorer, WorkItem};

/// Reads work items as JSON lines (file argument or stdin) and prints the
/// lexical priority and state key of each.
fn main() -> Result<(), Box<dyn Error>> {
    let path = std::env::args().nth(1);
    let reader: Box<dyn BufRead> = match path {
        Some(p) => Box::new(BufReader::new(File::open(p)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let scorer = KeywordScorer::default();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let item: WorkItem = serde_json::from_str(&line)?;
        let text = item.description.as_deref().unwrap_or_default();
        let score = scorer.score(text);

        println!(
            "{}\t{}\thigh={} medium={}\t{}",
            item.id,
            scorer.classify_priority(text),
            score.high,
            score.medium,
            encode(&item.context())
        );
    }

    Ok(())
}
