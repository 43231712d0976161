mod helpers;

use helpers::default_system;
use mnema::memory::types::{MemoryKind, MemoryLevel};
use mnema::system::{RecallLimits, StoreContext};

#[test]
fn store_then_recall_by_partial_query() {
    let t = default_system();
    let receipt = t
        .system
        .store(
            "transformer attention heads learn positional structure",
            StoreContext::default(),
        )
        .unwrap();
    t.system
        .store("the cafeteria closes at three", StoreContext::default())
        .unwrap();

    let response = t
        .system
        .recall("attention positional", RecallLimits::default(), None)
        .unwrap();

    assert!(!response.core.is_empty());
    assert_eq!(response.core[0].id, receipt.memory_id, "stored memory at rank 1");
    assert!(response.core[0].score > 0.3);
}

#[test]
fn identical_text_recalls_with_near_perfect_score() {
    let t = default_system();
    let text = "exactly this sentence and nothing else";
    let receipt = t.system.store(text, StoreContext::default()).unwrap();

    let response = t
        .system
        .recall(text, RecallLimits::default(), None)
        .unwrap();
    assert_eq!(response.core[0].id, receipt.memory_id);
    assert!(
        response.core[0].score >= 0.95,
        "identical text scores near 1.0, got {}",
        response.core[0].score
    );
}

#[test]
fn async_programming_scenario_excludes_unconnected_outlier() {
    let t = default_system();
    let a = t
        .system
        .store(
            "async programming with javascript promises chained via then",
            StoreContext::default(),
        )
        .unwrap();
    let b = t
        .system
        .store(
            "async programming in python coroutines using await",
            StoreContext::default(),
        )
        .unwrap();
    let c = t
        .system
        .store("ocean tides follow the moon", StoreContext::default())
        .unwrap();

    let response = t
        .system
        .recall("async programming", RecallLimits::default(), None)
        .unwrap();

    let activated: Vec<&str> = response
        .core
        .iter()
        .chain(response.peripheral.iter())
        .map(|r| r.id.as_str())
        .collect();
    assert!(activated.contains(&a.memory_id.as_str()));
    assert!(activated.contains(&b.memory_id.as_str()));
    assert!(!activated.contains(&c.memory_id.as_str()), "tides are unrelated");

    // High novelty but zero connection potential: not a bridge either
    let bridge_ids: Vec<&str> = response.bridges.iter().map(|r| r.id.as_str()).collect();
    assert!(!bridge_ids.contains(&c.memory_id.as_str()));
}

#[test]
fn result_count_is_bounded_by_activation_cap() {
    let mut config = helpers::test_config();
    config.retrieval.max_activations = 12;
    let t = helpers::build_system(config);

    for i in 0..40 {
        t.system
            .store(
                &format!("shared topic variation number {i}"),
                StoreContext::default(),
            )
            .unwrap();
    }

    let response = t
        .system
        .recall("shared topic variation", RecallLimits::default(), None)
        .unwrap();
    assert!(response.core.len() + response.peripheral.len() <= 12);
}

#[test]
fn recall_filters_by_memory_type() {
    let t = default_system();
    t.system
        .store("deployment checklist review", StoreContext::default())
        .unwrap();
    t.system
        .store(
            "deployment checklist canonical version",
            StoreContext {
                kind: Some(MemoryKind::Semantic),
                ..Default::default()
            },
        )
        .unwrap();

    let response = t
        .system
        .recall(
            "deployment checklist",
            RecallLimits {
                kinds: Some(vec![MemoryKind::Semantic]),
                ..Default::default()
            },
            None,
        )
        .unwrap();

    assert!(!response.core.is_empty());
    for item in response.core.iter().chain(response.peripheral.iter()) {
        assert_eq!(item.kind, MemoryKind::Semantic);
    }
}

#[test]
fn recall_spreads_to_graph_neighbors() {
    let t = default_system();
    let seed = t
        .system
        .store("the release pipeline steps", StoreContext::default())
        .unwrap();
    // Lexically unrelated; reachable only through the graph
    let neighbor = t
        .system
        .store("quarterly budget spreadsheet", StoreContext::default())
        .unwrap();
    t.meta
        .connect(
            &seed.memory_id,
            &neighbor.memory_id,
            mnema::memory::types::ConnectionKind::Associative,
            0.9,
        )
        .unwrap();

    let response = t
        .system
        .recall("the release pipeline steps", RecallLimits::default(), None)
        .unwrap();

    let all: Vec<(&str, &str)> = response
        .core
        .iter()
        .chain(response.peripheral.iter())
        .map(|r| (r.id.as_str(), r.why.as_str()))
        .collect();
    let spread = all
        .iter()
        .find(|(id, _)| *id == neighbor.memory_id)
        .expect("neighbor reached via spreading");
    assert!(spread.1.starts_with("spread"), "why = {}", spread.1);
}

#[test]
fn every_level_participates_in_seeding() {
    let t = default_system();
    let concept = t
        .system
        .store(
            "database engineering",
            StoreContext {
                level_hint: Some(MemoryLevel::Concept),
                kind: Some(MemoryKind::Semantic),
                ..Default::default()
            },
        )
        .unwrap();
    let context = t
        .system
        .store(
            "database engineering postgres notes",
            StoreContext {
                level_hint: Some(MemoryLevel::Context),
                ..Default::default()
            },
        )
        .unwrap();
    let episode = t
        .system
        .store(
            "database engineering index tuning session",
            StoreContext::default(),
        )
        .unwrap();

    let response = t
        .system
        .recall("database engineering", RecallLimits::default(), None)
        .unwrap();
    let ids: Vec<&str> = response
        .core
        .iter()
        .chain(response.peripheral.iter())
        .map(|r| r.id.as_str())
        .collect();
    assert!(ids.contains(&concept.memory_id.as_str()));
    assert!(ids.contains(&context.memory_id.as_str()));
    assert!(ids.contains(&episode.memory_id.as_str()));
}
