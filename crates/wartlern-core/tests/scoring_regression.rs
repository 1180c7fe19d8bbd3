use serde::Deserialize;
use std::fs;
use wartlern_core::{KeywordScorer, Priority};

#[derive(Deserialize, Debug)]
struct ScoringCase {
    text: String,
    expected: Priority,
    high: u32,
    medium: u32,
}

#[test]
fn default_tables_match_recorded_cases() {
    let content = fs::read_to_string("../../tests/fixtures/priority/cases.ok.json")
        .expect("Failed to read fixture file");
    let cases: Vec<ScoringCase> =
        serde_json::from_str(&content).expect("Failed to deserialize scoring fixture");
    assert!(!cases.is_empty());

    let scorer = KeywordScorer::default();
    for case in cases {
        let score = scorer.score(&case.text);
        assert_eq!(score.high, case.high, "high score for {:?}", case.text);
        assert_eq!(score.medium, case.medium, "medium score for {:?}", case.text);
        assert_eq!(
            scorer.classify_priority(&case.text),
            case.expected,
            "priority for {:?}",
            case.text
        );
    }
}

#[test]
fn keyword_tables_can_be_overridden_from_json() {
    let scorer: KeywordScorer = serde_json::from_str(
        r#"{
            "high": [{"keyword": "smoke", "weight": 60}],
            "medium": [{"keyword": "squeak", "weight": 25}]
        }"#,
    )
    .expect("Failed to deserialize scorer");

    // Thresholds keep their defaults when omitted.
    assert_eq!(scorer.threshold_high, 30);
    assert_eq!(scorer.classify_priority("Smoke from panel"), Priority::High);
    assert_eq!(scorer.classify_priority("door squeak"), Priority::Medium);
    assert_eq!(scorer.classify_priority("urgente"), Priority::Low);
}
