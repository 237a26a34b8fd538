//! Scene Cache Tests
//!
//! Tests for:
//! - Primary map: put/get/remove/clear, reverse handle index
//! - DAG bookkeeping: record/forget parents
//! - Auxiliary indices: object data, material users, light filters, pick ids
//! - Version stamps

use scenelink::cache::{CacheEntry, SceneCache};
use scenelink::interner;
use scenelink::key::{DataKind, EntityKey, ParticleStyle};
use scenelink::memory::MemorySink;
use scenelink::sink::{NodeKind, SceneSink};

fn data_key(name: &str) -> EntityKey {
    EntityKey::Data { name: interner::name(name), kind: DataKind::Mesh }
}

fn new_handle(sink: &mut MemorySink, name: &str) -> scenelink::NodeHandle {
    sink.create_node(NodeKind::Mesh, name)
}

// ============================================================================
// Primary Map
// ============================================================================

#[test]
fn cache_put_get_remove() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let key = data_key("Box");
    let handle = new_handle(&mut sink, "Box-MESH");

    cache.put(CacheEntry::new(key, handle, NodeKind::Mesh));
    assert_eq!(cache.handle_of(&key), Some(handle));
    assert_eq!(cache.key_of_handle(handle), Some(&key));
    assert_eq!(cache.len(), 1);

    let removed = cache.remove(&key).unwrap();
    assert_eq!(removed.handle, handle);
    assert!(cache.is_empty());
    assert_eq!(cache.key_of_handle(handle), None);
}

#[test]
fn cache_replacing_handle_updates_reverse_index() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let key = data_key("Box");
    let old = new_handle(&mut sink, "old");
    let new = new_handle(&mut sink, "new");

    cache.put(CacheEntry::new(key, old, NodeKind::Mesh));
    cache.put(CacheEntry::new(key, new, NodeKind::Mesh));

    assert_eq!(cache.handle_of(&key), Some(new));
    assert_eq!(cache.key_of_handle(old), None);
    assert_eq!(cache.key_of_handle(new), Some(&key));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "handle registered under two keys")]
fn cache_rejects_one_handle_under_two_keys() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let handle = new_handle(&mut sink, "shared");
    cache.put(CacheEntry::new(data_key("A"), handle, NodeKind::Mesh));
    cache.put(CacheEntry::new(data_key("B"), handle, NodeKind::Mesh));
}

#[test]
fn cache_clear_wipes_everything_atomically() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let key = data_key("Box");
    let object = interner::name("Obj");
    cache.put(CacheEntry::new(key, new_handle(&mut sink, "n"), NodeKind::Mesh));
    cache.set_object_data(object, key);
    cache.add_material_user(interner::name("red"), key);
    let id = cache.object_id(object);
    assert_eq!(id, 1);

    cache.clear();

    assert!(cache.is_empty());
    assert_eq!(cache.object_data(object), None);
    assert!(cache.material_users(interner::name("red")).is_empty());
    // id registry restarts
    assert_eq!(cache.object_id(object), 1);
}

// ============================================================================
// DAG Bookkeeping
// ============================================================================

#[test]
fn cache_records_and_forgets_parents() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let key = data_key("Box");
    let handle = new_handle(&mut sink, "n");
    let p1 = new_handle(&mut sink, "p1");
    let p2 = new_handle(&mut sink, "p2");

    cache.put(CacheEntry::new(key, handle, NodeKind::Mesh));
    cache.record_parent(&key, p1);
    cache.record_parent(&key, p2);
    cache.record_parent(&key, p1); // duplicate, ignored
    assert_eq!(cache.get(&key).unwrap().parents.len(), 2);

    cache.forget_parent(&key, p1);
    assert_eq!(cache.get(&key).unwrap().parents.as_slice(), &[p2]);
}

#[test]
fn cache_forget_parent_everywhere_reports_affected_keys() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let parent = new_handle(&mut sink, "parent");
    let a = data_key("A");
    let b = data_key("B");
    cache.put(CacheEntry::new(a, new_handle(&mut sink, "a"), NodeKind::Mesh));
    cache.put(CacheEntry::new(b, new_handle(&mut sink, "b"), NodeKind::Mesh));
    cache.record_parent(&a, parent);
    cache.record_parent(&b, parent);

    let affected = cache.forget_parent_everywhere(parent);
    assert_eq!(affected.len(), 2);
    assert!(cache.get(&a).unwrap().parents.is_empty());
    assert!(cache.get(&b).unwrap().parents.is_empty());
}

#[test]
fn cache_derived_keys_cover_particles_and_placements() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let object = interner::name("Obj");
    let other = interner::name("Other");

    let inst = EntityKey::Instance { object };
    let psys = EntityKey::Particles {
        object,
        system: interner::name("Fur"),
        style: ParticleStyle::Hair,
    };
    let placement = EntityKey::Placement { object, data: interner::name("Box") };
    let foreign = EntityKey::Instance { object: other };

    for (i, key) in [inst, psys, placement, foreign].into_iter().enumerate() {
        cache.put(CacheEntry::new(key, new_handle(&mut sink, &format!("n{i}")), NodeKind::Group));
    }

    let derived = cache.derived_keys(object);
    assert_eq!(derived.len(), 3);
    assert!(!derived.contains(&foreign));
}

// ============================================================================
// Auxiliary Indices & Stamps
// ============================================================================

#[test]
fn cache_material_users_deduplicate() {
    let mut cache = SceneCache::new();
    let red = interner::name("red");
    let user = EntityKey::Instance { object: interner::name("A") };
    cache.add_material_user(red, user);
    cache.add_material_user(red, user);
    assert_eq!(cache.material_users(red).len(), 1);
}

#[test]
fn cache_remove_scrubs_material_users() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let red = interner::name("red");
    let key = data_key("Box");
    cache.put(CacheEntry::new(key, new_handle(&mut sink, "n"), NodeKind::Mesh));
    cache.add_material_user(red, key);

    cache.remove(&key);
    assert!(cache.material_users(red).is_empty());
}

#[test]
fn cache_filter_light_index_is_two_way() {
    let mut cache = SceneCache::new();
    let filter = interner::name("Blocker");
    let key_light = interner::name("KeyLight");
    let rim = interner::name("Rim");

    cache.set_filter_lights(filter, vec![key_light, rim]);
    assert_eq!(cache.lights_of_filter(filter), &[key_light, rim]);
    assert_eq!(cache.filters_of_light(key_light), &[filter]);
    assert_eq!(cache.filters_of_light(rim), &[filter]);
}

#[test]
fn cache_pick_ids_are_stable() {
    let mut cache = SceneCache::new();
    let a = interner::name("A");
    let b = interner::name("B");
    let ia = cache.object_id(a);
    let ib = cache.object_id(b);
    assert_ne!(ia, ib);
    assert_eq!(cache.object_id(a), ia);
    assert_eq!(cache.object_of_id(ia), Some(a));
    assert_eq!(cache.object_of_id(999), None);
}

#[test]
fn cache_stamps_track_versions() {
    let mut sink = MemorySink::new();
    let mut cache = SceneCache::new();
    let key = data_key("Box");
    cache.put(CacheEntry::new(key, new_handle(&mut sink, "n"), NodeKind::Mesh));

    assert_eq!(cache.stamp(&key), Some(0));
    cache.set_stamp(&key, 7);
    assert_eq!(cache.stamp(&key), Some(7));
    assert_eq!(cache.stamp(&data_key("Missing")), None);
}
