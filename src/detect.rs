//! Dirty/change detection.
//!
//! Compares the current-frame working sets against the scene cache and
//! produces the minimal, disjoint sets of entities requiring work. An empty
//! plan is a valid steady state: the pass becomes a no-op and the cache is
//! left byte-identical.

use rustc_hash::FxHashSet;

use crate::cache::SceneCache;
use crate::collect::Collected;
use crate::key::EntityKey;
use crate::settings::SyncOptions;
use crate::source::DirtyOracle;

/// The outcome of change detection for one pass.
///
/// The three sets are disjoint and each is sorted in export order:
/// geometry before particle systems before duplis, data blocks before the
/// instances that place them.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub to_create: Vec<EntityKey>,
    pub to_update: Vec<EntityKey>,
    pub to_delete: Vec<EntityKey>,
}

impl SyncPlan {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// True when the entity behind `key` changed since its last export.
///
/// Dirtiness comes from the injected oracle, never from content diffing.
/// In lazy mode an entity whose version has not advanced past the export
/// stamp is clean even when the oracle's coarse flag says otherwise.
fn is_stale(
    collected: &Collected,
    cache: &SceneCache,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    key: &EntityKey,
) -> bool {
    let Some(owner) = stamp_owner(collected, key) else {
        return false;
    };
    if options.lazy_export {
        match cache.stamp(key) {
            Some(stamp) => oracle.version(owner) > stamp,
            None => true,
        }
    } else {
        oracle.is_dirty(owner)
    }
}

/// The source entity whose version clocks this key. Shared data blocks are
/// clocked by the object that introduced them this frame.
pub(crate) fn stamp_owner(
    collected: &Collected,
    key: &EntityKey,
) -> Option<crate::interner::Name> {
    if let Some(block) = collected.blocks.get(key) {
        return Some(block.owner);
    }
    key.owner().or(match key {
        EntityKey::Data { name, .. }
        | EntityKey::Material { name }
        | EntityKey::Light { name }
        | EntityKey::LightFilter { name } => Some(*name),
        _ => None,
    })
}

/// Computes the pass plan from the collected scene and the cache contents.
pub fn plan(
    collected: &Collected,
    cache: &SceneCache,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
) -> SyncPlan {
    let current = collected.current_keys();
    let mut plan = SyncPlan::default();

    for key in &current {
        if cache.contains(key) {
            if is_stale(collected, cache, oracle, options, key) {
                plan.to_update.push(*key);
            }
        } else {
            plan.to_create.push(*key);
        }
    }

    // 缓存里有、当前帧没有 → 删除。派生键跟随属主清理，不单独计划。
    let cached: FxHashSet<EntityKey> = cache.keys().copied().collect();
    for key in &cached {
        if key.is_derived() || matches!(key, EntityKey::Material { .. }) {
            continue;
        }
        if !current.contains(key) {
            plan.to_delete.push(*key);
        }
    }

    plan.to_create.sort_by_key(EntityKey::sort_key);
    plan.to_update.sort_by_key(EntityKey::sort_key);
    plan.to_delete.sort_by_key(EntityKey::sort_key);
    plan
}
