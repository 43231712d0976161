mod helpers;

use std::fs;
use std::sync::Arc;

use helpers::{default_system, TestSystem};
use mnema::config::SyncConfig;
use mnema::sync::{DirectoryWatcher, SyncEngine};
use mnema::system::RecallLimits;

struct SyncFixture {
    t: TestSystem,
    engine: Arc<SyncEngine>,
    watcher: DirectoryWatcher,
    dir: tempfile::TempDir,
}

fn fixture() -> SyncFixture {
    let dir = tempfile::tempdir().unwrap();
    let t = default_system();
    let config = SyncConfig {
        watch_root: Some(dir.path().to_string_lossy().into_owned()),
        ..SyncConfig::default()
    };
    let watcher = DirectoryWatcher::new(dir.path(), &config.extensions);
    let engine = SyncEngine::new(Arc::clone(&t.system), config);
    SyncFixture {
        t,
        engine,
        watcher,
        dir,
    }
}

#[test]
fn full_file_lifecycle_add_modify_delete() {
    let mut f = fixture();
    let file = f.dir.path().join("notes.md");
    let source = file.to_string_lossy().into_owned();

    // Add
    fs::write(&file, "content X").unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();
    let memories = f.t.meta.memories_by_source(&source).unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].content, "content X");

    // Modify: exactly one memory with the new content, none with the old
    fs::write(&file, "content Y").unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();
    let memories = f.t.meta.memories_by_source(&source).unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].content, "content Y");

    // Delete: no memories for that source remain
    fs::remove_file(&file).unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();
    assert!(f.t.meta.memories_by_source(&source).unwrap().is_empty());
    assert_eq!(f.t.system.stats().unwrap().memory_total, 0);
}

#[test]
fn synced_content_is_recallable() {
    let mut f = fixture();
    fs::write(
        f.dir.path().join("recipes.md"),
        "sourdough needs a mature starter",
    )
    .unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();

    let response = f
        .t
        .system
        .recall("sourdough needs a mature starter", RecallLimits::default(), None)
        .unwrap();
    assert_eq!(response.core[0].content, "sourdough needs a mature starter");
}

#[test]
fn structured_document_syncs_as_hierarchy() {
    let mut f = fixture();
    let file = f.dir.path().join("design.md");
    fs::write(
        &file,
        "# Memory Engine\n\n## Encoding\nfusion details\n\n## Retrieval\nspreading details\n",
    )
    .unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();

    let source = file.to_string_lossy().into_owned();
    let memories = f.t.meta.memories_by_source(&source).unwrap();
    assert_eq!(memories.len(), 4, "one context + three sections");

    let context: Vec<_> = memories
        .iter()
        .filter(|m| m.level == mnema::memory::types::MemoryLevel::Context)
        .collect();
    assert_eq!(context.len(), 1);
    let children: Vec<_> = memories
        .iter()
        .filter(|m| m.parent_id.as_deref() == Some(context[0].id.as_str()))
        .collect();
    assert_eq!(children.len(), 3);

    // Re-sync after an edit rebuilds the hierarchy without duplicates
    fs::write(&file, "# Memory Engine\n\n## Only Section\nbody\n").unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();
    let memories = f.t.meta.memories_by_source(&source).unwrap();
    assert_eq!(memories.len(), 3);
}

#[test]
fn untracked_extensions_never_become_memories() {
    let mut f = fixture();
    fs::write(f.dir.path().join("binary.png"), [0u8, 1, 2]).unwrap();
    fs::write(f.dir.path().join("notes.txt"), "text but untracked").unwrap();

    let processed = f.engine.run_once(&mut f.watcher).unwrap();
    assert_eq!(processed, 0);
    assert_eq!(f.t.system.stats().unwrap().memory_total, 0);
}

#[test]
fn sync_health_reflects_progress() {
    let mut f = fixture();
    fs::write(f.dir.path().join("a.md"), "alpha").unwrap();
    fs::write(f.dir.path().join("b.md"), "beta").unwrap();

    f.engine.run_once(&mut f.watcher).unwrap();

    let health = f.engine.health();
    assert_eq!(health.events_processed, 2);
    assert_eq!(health.events_failed, 0);
    assert!(!health.degraded);
    assert!(health.dirty_paths.is_empty());

    // Health is also visible through the façade stats
    let stats = f.t.system.stats().unwrap();
    let sync = stats.sync.expect("sync health attached");
    assert_eq!(sync.events_processed, 2);
}

#[test]
fn deleting_one_file_leaves_others_untouched() {
    let mut f = fixture();
    let keep = f.dir.path().join("keep.md");
    let gone = f.dir.path().join("gone.md");
    fs::write(&keep, "keep this").unwrap();
    fs::write(&gone, "drop this").unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();
    assert_eq!(f.t.system.stats().unwrap().memory_total, 2);

    fs::remove_file(&gone).unwrap();
    f.engine.run_once(&mut f.watcher).unwrap();

    assert_eq!(f.t.system.stats().unwrap().memory_total, 1);
    let kept = f
        .t
        .meta
        .memories_by_source(&keep.to_string_lossy())
        .unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].content, "keep this");
}
