//! Change Detection Tests
//!
//! Tests for:
//! - Plan partitioning: create / update / delete are disjoint
//! - Steady-state no-op frames
//! - Lazy versioning: clean while the version has not advanced
//! - Export ordering: tiers and data-before-instance ranks

mod common;

use common::FakeScene;
use scenelink::cache::{CacheEntry, SceneCache};
use scenelink::collect;
use scenelink::detect;
use scenelink::interner;
use scenelink::key::{DataKind, EntityKey, ParticleStyle};
use scenelink::memory::MemorySink;
use scenelink::settings::SyncOptions;
use scenelink::sink::{NodeKind, SceneSink};
use scenelink::source::{ParticleDesc, ParticleRender};

fn options() -> SyncOptions {
    SyncOptions { motion_blur: false, motion_segments: 2, lazy_export: true }
}

/// Runs collect + plan against an empty default cache.
fn plan_fresh(scene: &FakeScene) -> detect::SyncPlan {
    let cache = SceneCache::new();
    let collected = collect::collect(scene, scene, &cache, &options());
    detect::plan(&collected, &cache, scene, &options())
}

/// Pretends every currently-visible key was already exported at the
/// owning entity's current version.
fn cache_everything(scene: &FakeScene, sink: &mut MemorySink) -> SceneCache {
    let mut cache = SceneCache::new();
    let collected = collect::collect(scene, scene, &cache, &options());
    for key in collected.current_keys() {
        let handle = sink.create_node(NodeKind::Group, &key.to_string());
        cache.put(CacheEntry::new(key, handle, NodeKind::Group));
        let owner = collected
            .blocks
            .get(&key)
            .map(|b| b.owner)
            .or_else(|| key.owner())
            .or(match key {
                EntityKey::Data { name, .. }
                | EntityKey::Light { name }
                | EntityKey::LightFilter { name } => Some(name),
                _ => None,
            });
        if let Some(owner) = owner {
            cache.set_stamp(&key, scenelink::source::DirtyOracle::version(scene, owner));
        }
    }
    cache
}

// ============================================================================
// Partitioning
// ============================================================================

#[test]
fn new_entities_land_in_to_create() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Box", "BoxData");

    let plan = plan_fresh(&scene);
    assert!(plan.to_update.is_empty());
    assert!(plan.to_delete.is_empty());
    assert_eq!(plan.to_create.len(), 2); // data block + instance
}

#[test]
fn cached_clean_scene_is_a_noop() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Box", "BoxData");
    let mut sink = MemorySink::new();
    let cache = cache_everything(&scene, &mut sink);

    let collected = collect::collect(&scene, &scene, &cache, &options());
    let plan = detect::plan(&collected, &cache, &scene, &options());
    assert!(plan.is_noop(), "unchanged scene must plan nothing: {plan:?}");
}

#[test]
fn version_bump_lands_in_to_update() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Box", "BoxData");
    let mut sink = MemorySink::new();
    let cache = cache_everything(&scene, &mut sink);

    scene.touch("Box");
    let collected = collect::collect(&scene, &scene, &cache, &options());
    let plan = detect::plan(&collected, &cache, &scene, &options());

    assert!(plan.to_create.is_empty());
    assert!(plan.to_delete.is_empty());
    assert!(plan
        .to_update
        .contains(&EntityKey::Instance { object: interner::name("Box") }));
}

#[test]
fn vanished_entities_land_in_to_delete() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Box", "BoxData");
    let mut sink = MemorySink::new();
    let cache = cache_everything(&scene, &mut sink);

    scene.remove("Box");
    let collected = collect::collect(&scene, &scene, &cache, &options());
    let plan = detect::plan(&collected, &cache, &scene, &options());

    assert!(plan.to_create.is_empty());
    assert!(plan.to_update.is_empty());
    assert_eq!(plan.to_delete.len(), 2);
}

#[test]
fn plan_sets_are_disjoint() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Keep", "KeepData");
    scene.add_mesh("Drop", "DropData");
    let mut sink = MemorySink::new();
    let cache = cache_everything(&scene, &mut sink);

    scene.remove("Drop");
    scene.touch("Keep");
    scene.add_mesh("Fresh", "FreshData");

    let collected = collect::collect(&scene, &scene, &cache, &options());
    let plan = detect::plan(&collected, &cache, &scene, &options());

    for key in &plan.to_create {
        assert!(!plan.to_update.contains(key));
        assert!(!plan.to_delete.contains(key));
    }
    for key in &plan.to_update {
        assert!(!plan.to_delete.contains(key));
    }
}

// ============================================================================
// Lazy Versioning
// ============================================================================

#[test]
fn eager_mode_follows_the_dirty_flag() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Box", "BoxData");
    let mut sink = MemorySink::new();
    let cache = cache_everything(&scene, &mut sink);

    let eager = SyncOptions { lazy_export: false, ..options() };
    // dirty flag set but version untouched
    scene.dirty.insert(interner::name("Box"));

    let collected = collect::collect(&scene, &scene, &cache, &eager);
    let plan = detect::plan(&collected, &cache, &scene, &eager);
    assert!(!plan.to_update.is_empty());
}

#[test]
fn lazy_mode_ignores_the_flag_when_version_is_stale() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Box", "BoxData");
    let mut sink = MemorySink::new();
    let cache = cache_everything(&scene, &mut sink);

    // flag set, version NOT bumped: still clean under lazy stamps
    scene.dirty.insert(interner::name("Box"));

    let collected = collect::collect(&scene, &scene, &cache, &options());
    let plan = detect::plan(&collected, &cache, &scene, &options());
    assert!(plan.is_noop());
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn plan_orders_geometry_before_particles() {
    let mut scene = FakeScene::new();
    scene.add_mesh_with("Emitter", "EmitterMesh", |desc| {
        desc.particles.push(ParticleDesc {
            system: interner::name("Spray"),
            style: ParticleStyle::Emitter,
            render_as: ParticleRender::Native,
            material: None,
            animated: false,
        });
    });

    let plan = plan_fresh(&scene);
    let mesh_pos = plan
        .to_create
        .iter()
        .position(|k| matches!(k, EntityKey::Data { kind: DataKind::Mesh, .. }))
        .expect("mesh planned");
    let psys_pos = plan
        .to_create
        .iter()
        .position(|k| matches!(k, EntityKey::Particles { .. }))
        .expect("particles planned");
    assert!(mesh_pos < psys_pos, "mesh must export before its particle system");
}

#[test]
fn plan_orders_data_before_instances() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Box", "BoxData");
    let plan = plan_fresh(&scene);

    let data_pos = plan
        .to_create
        .iter()
        .position(|k| matches!(k, EntityKey::Data { .. }))
        .unwrap();
    let inst_pos = plan
        .to_create
        .iter()
        .position(|k| matches!(k, EntityKey::Instance { .. }))
        .unwrap();
    assert!(data_pos < inst_pos);
}

#[test]
fn plan_orders_duplis_last() {
    let mut scene = FakeScene::new();
    scene.add_mesh("Blade", "BladeData");
    scene.add_mesh_with("Grass", "GrassData", |desc| {
        desc.dupli = Some(scenelink::source::DupliDesc {
            sources: vec![interner::name("Blade")],
        });
    });

    let plan = plan_fresh(&scene);
    let dupli_pos = plan
        .to_create
        .iter()
        .position(|k| matches!(k, EntityKey::Dupli { .. }))
        .expect("dupli planned");
    assert_eq!(dupli_pos, plan.to_create.len() - 1);
}
