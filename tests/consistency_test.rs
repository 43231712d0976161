mod helpers;

use std::sync::Arc;

use helpers::{default_system, HashEmbedding};
use mnema::encoding::FUSED_DIM;
use mnema::memory::store::verify_consistency;
use mnema::memory::types::MemoryLevel;
use mnema::memory::vector::VectorStore;
use mnema::system::{CognitiveSystem, StoreContext};

/// Shared trait-object handle to the fixture's vector store.
fn shared_vectors(t: &helpers::TestSystem) -> Arc<dyn VectorStore> {
    t.vectors.clone() as Arc<dyn VectorStore>
}

#[test]
fn every_memory_has_exactly_one_vector_at_its_level() {
    let t = default_system();
    t.system
        .store("an episode memory", StoreContext::default())
        .unwrap();
    t.system
        .store(
            "a context memory",
            StoreContext {
                level_hint: Some(MemoryLevel::Context),
                ..Default::default()
            },
        )
        .unwrap();
    t.system
        .store(
            "a concept memory",
            StoreContext {
                level_hint: Some(MemoryLevel::Concept),
                ..Default::default()
            },
        )
        .unwrap();

    verify_consistency(t.vectors.as_ref(), &t.meta).unwrap();
    for (count, level) in t
        .meta
        .count_by_level()
        .unwrap()
        .iter()
        .zip(MemoryLevel::ALL)
    {
        assert_eq!(*count as usize, t.vectors.list_refs(level).unwrap().len());
    }
}

#[test]
fn crash_between_vector_and_metadata_insert_is_repaired_on_restart() {
    let t = default_system();
    t.system
        .store("a healthy memory", StoreContext::default())
        .unwrap();

    // Simulate the crash: a vector landed but its metadata row never did
    let orphan = vec![1.0f32; FUSED_DIM];
    t.vectors
        .insert(MemoryLevel::Episode, "half-written", &orphan, None)
        .unwrap();
    assert!(verify_consistency(t.vectors.as_ref(), &t.meta).is_err());

    // "Restart": a new system over the same stores reconciles on startup
    let restarted = CognitiveSystem::with_parts(
        helpers::test_config(),
        Box::new(HashEmbedding),
        shared_vectors(&t),
        Arc::clone(&t.meta),
    )
    .unwrap();

    verify_consistency(t.vectors.as_ref(), &t.meta).unwrap();
    let stats = restarted.stats().unwrap();
    assert_eq!(stats.memory_total, 1);
    assert_eq!(
        t.vectors.list_refs(MemoryLevel::Episode).unwrap().len(),
        1,
        "orphan vector was reaped"
    );
}

#[test]
fn missing_vector_is_reembedded_on_restart() {
    let t = default_system();
    let receipt = t
        .system
        .store("content that can be re-embedded", StoreContext::default())
        .unwrap();

    // Simulate vector-side data loss
    t.vectors
        .delete(MemoryLevel::Episode, &receipt.memory_id)
        .unwrap();
    assert!(verify_consistency(t.vectors.as_ref(), &t.meta).is_err());

    CognitiveSystem::with_parts(
        helpers::test_config(),
        Box::new(HashEmbedding),
        shared_vectors(&t),
        Arc::clone(&t.meta),
    )
    .unwrap();

    verify_consistency(t.vectors.as_ref(), &t.meta).unwrap();
    assert!(t
        .vectors
        .fetch(MemoryLevel::Episode, &receipt.memory_id)
        .unwrap()
        .is_some());
}

#[test]
fn delete_by_source_removes_all_and_only_matching_memories() {
    let t = default_system();
    let mut kept = Vec::new();
    for i in 0..3 {
        kept.push(
            t.system
                .store(
                    &format!("keeper {i}"),
                    StoreContext {
                        source_path: Some("keep.md".into()),
                        ..Default::default()
                    },
                )
                .unwrap()
                .memory_id,
        );
    }
    let mut doomed = Vec::new();
    for i in 0..4 {
        doomed.push(
            t.system
                .store(
                    &format!("doomed {i}"),
                    StoreContext {
                        source_path: Some("doomed.md".into()),
                        ..Default::default()
                    },
                )
                .unwrap()
                .memory_id,
        );
    }

    assert_eq!(t.system.delete_by_source("doomed.md").unwrap(), 4);

    for id in &doomed {
        assert!(t.meta.find_memory(id).unwrap().is_none());
    }
    for id in &kept {
        assert!(t.meta.find_memory(id).unwrap().is_some());
    }
    verify_consistency(t.vectors.as_ref(), &t.meta).unwrap();
}

#[test]
fn duplicate_store_attempt_leaves_stores_consistent() {
    let t = default_system();
    let receipt = t
        .system
        .store("original memory", StoreContext::default())
        .unwrap();

    // Recovery restores the vector that the compensating delete removed
    // after a conflicting insert attempt.
    let memory = t.meta.get_memory(&receipt.memory_id).unwrap();
    let encoded = vec![0.5f32; FUSED_DIM];
    let err = mnema::memory::store::persist_memory(
        t.vectors.as_ref(),
        &t.meta,
        &memory,
        &encoded,
    )
    .unwrap_err();
    assert!(matches!(err, mnema::error::Error::Validation(_)));

    CognitiveSystem::with_parts(
        helpers::test_config(),
        Box::new(HashEmbedding),
        shared_vectors(&t),
        Arc::clone(&t.meta),
    )
    .unwrap();
    verify_consistency(t.vectors.as_ref(), &t.meta).unwrap();
}
