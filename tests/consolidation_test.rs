mod helpers;

use helpers::{days_ago, default_system};
use mnema::memory::types::{ConnectionKind, MemoryKind, MemoryLevel};
use mnema::memory::vector::VectorStore;
use mnema::system::{RecallLimits, StoreContext};

#[test]
fn hot_episodic_memory_is_promoted_to_semantic() {
    let t = default_system();
    let hot = t
        .system
        .store("the retry budget is three attempts", StoreContext::default())
        .unwrap();
    let peer_a = t
        .system
        .store("unrelated peer alpha", StoreContext::default())
        .unwrap();
    let peer_b = t
        .system
        .store("unrelated peer beta", StoreContext::default())
        .unwrap();

    // Five recalls within the recency window
    for _ in 0..5 {
        t.system
            .recall(
                "the retry budget is three attempts",
                RecallLimits::default(),
                None,
            )
            .unwrap();
    }
    // Two reinforced outgoing edges above the strength bar
    t.meta
        .connect(&hot.memory_id, &peer_a.memory_id, ConnectionKind::Associative, 0.6)
        .unwrap();
    t.meta
        .connect(&hot.memory_id, &peer_b.memory_id, ConnectionKind::Associative, 0.6)
        .unwrap();

    let report = t.system.consolidate().unwrap();
    assert_eq!(report.promoted, 1);

    let promoted = t.meta.get_memory(&hot.memory_id).unwrap();
    assert_eq!(promoted.kind, MemoryKind::Semantic);
    assert_eq!(promoted.decay_rate, 0.01);
}

#[test]
fn idle_episodic_memories_are_evicted_from_both_stores() {
    let t = default_system();
    let mut ids = Vec::new();
    for i in 0..10 {
        let receipt = t
            .system
            .store(
                &format!("forgettable fragment {i}"),
                StoreContext {
                    created_at: Some(days_ago(31)),
                    ..Default::default()
                },
            )
            .unwrap();
        ids.push(receipt.memory_id);
    }

    let report = t.system.consolidate().unwrap();
    assert_eq!(report.evicted, 10);

    for id in &ids {
        assert!(t.meta.find_memory(id).unwrap().is_none());
        assert!(t
            .vectors
            .fetch(MemoryLevel::Episode, id)
            .unwrap()
            .is_none());
    }
    assert_eq!(t.system.stats().unwrap().memory_total, 0);
}

#[test]
fn accessed_or_recent_memories_survive_consolidation() {
    let t = default_system();
    let recent = t
        .system
        .store("fresh thought", StoreContext::default())
        .unwrap();
    let old_but_used = t
        .system
        .store(
            "old favorite fact",
            StoreContext {
                created_at: Some(days_ago(60)),
                ..Default::default()
            },
        )
        .unwrap();
    t.system
        .recall("old favorite fact", RecallLimits::default(), None)
        .unwrap();

    let report = t.system.consolidate().unwrap();
    assert_eq!(report.evicted, 0);
    assert!(t.meta.find_memory(&recent.memory_id).unwrap().is_some());
    assert!(t.meta.find_memory(&old_but_used.memory_id).unwrap().is_some());
}

#[test]
fn semantic_memories_never_revert_or_evict() {
    let t = default_system();
    let semantic = t
        .system
        .store(
            "a durable semantic fact",
            StoreContext {
                kind: Some(MemoryKind::Semantic),
                created_at: Some(days_ago(365)),
                ..Default::default()
            },
        )
        .unwrap();

    t.system.consolidate().unwrap();
    let still_there = t.meta.get_memory(&semantic.memory_id).unwrap();
    assert_eq!(still_there.kind, MemoryKind::Semantic);

    // Kind transitions are one-way: an extra promotion attempt is a no-op
    assert!(!t.meta.promote_memory(&semantic.memory_id).unwrap());
    assert_eq!(
        t.meta.get_memory(&semantic.memory_id).unwrap().kind,
        MemoryKind::Semantic
    );
}

#[test]
fn access_counts_are_monotone_across_operations() {
    let t = default_system();
    let receipt = t
        .system
        .store("watched counter memory", StoreContext::default())
        .unwrap();

    let mut last = 0;
    for _ in 0..4 {
        t.system
            .recall("watched counter memory", RecallLimits::default(), None)
            .unwrap();
        t.system.consolidate().unwrap();
        let count = t.meta.get_memory(&receipt.memory_id).unwrap().access_count;
        assert!(count > last, "access_count never decreases");
        last = count;
    }
}

#[test]
fn promotion_does_not_fire_without_edges() {
    let t = default_system();
    t.system
        .store("popular but isolated note", StoreContext::default())
        .unwrap();
    for _ in 0..6 {
        t.system
            .recall("popular but isolated note", RecallLimits::default(), None)
            .unwrap();
    }

    let report = t.system.consolidate().unwrap();
    assert_eq!(report.promoted, 0);
}
