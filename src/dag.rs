//! DAG 重挂引擎 (Reattachment Engine)
//!
//! 保留场景图的结构性更新：父子嫁接、摘除、整棵子树替换、实体销毁和
//! 孤儿收养。与同步器解耦成独立系统，只借用场景缓存和 sink，便于单独
//! 测试。
//!
//! 销毁顺序是硬性约定：先把句柄从所有已记录的父节点上摘下，再从缓存
//! 删除条目，最后才让 sink 释放句柄。颠倒顺序会留下悬挂引用或画面
//! 空洞。

use crate::cache::{CacheEntry, SceneCache};
use crate::errors::{Result, SyncError};
use crate::interner::Name;
use crate::key::EntityKey;
use crate::sink::{NodeHandle, NodeKind, PropertyValue, SceneSink};
use crate::source::GeometryPayload;

/// 把 `key` 对应的节点挂到 `parent` 下，并登记回引
pub fn graft<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    parent: NodeHandle,
    key: &EntityKey,
) -> Result<()> {
    let Some(entry) = cache.get(key) else {
        return Err(SyncError::CacheMiss { key: key.to_string() });
    };
    let child = entry.handle;
    sink.add_child(parent, child);
    cache.record_parent(key, parent);
    Ok(())
}

/// 把 `key` 对应的节点从 `parent` 下摘除
pub fn detach<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    parent: NodeHandle,
    key: &EntityKey,
) -> Result<()> {
    let Some(entry) = cache.get(key) else {
        return Err(SyncError::CacheMiss { key: key.to_string() });
    };
    let child = entry.handle;
    sink.remove_child(parent, child);
    cache.forget_parent(key, parent);
    Ok(())
}

/// 释放一个条目的句柄及其拥有的次级节点
pub(crate) fn dispose<S: SceneSink>(sink: &mut S, entry: &CacheEntry) {
    for sub in &entry.secondaries {
        sink.remove_child(entry.handle, *sub);
        sink.delete_node(*sub);
    }
    sink.delete_node(entry.handle);
}

/// 用新节点顶替 `old_key` 的位置。
///
/// 1. 旧节点的每个父节点改挂新节点（不露空档）
/// 2. 缓存条目换成新句柄（继承父回引，换新键时旧键移除）
/// 3. 释放旧句柄
pub fn replace_subtree<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    old_key: &EntityKey,
    new_key: EntityKey,
    new_handle: NodeHandle,
    new_kind: NodeKind,
) -> Result<()> {
    let Some(old) = cache.remove(old_key) else {
        return Err(SyncError::CacheMiss { key: old_key.to_string() });
    };

    for parent in &old.parents {
        sink.remove_child(*parent, old.handle);
        sink.add_child(*parent, new_handle);
    }

    let mut entry = CacheEntry::new(new_key, new_handle, new_kind);
    entry.parents = old.parents.clone();
    entry.stamp = old.stamp;
    cache.put(entry);

    // 旧节点自己的子节点随句柄一起废弃；引用它为父的条目要除名
    for orphan in cache.forget_parent_everywhere(old.handle) {
        log::debug!("'{orphan}' lost parent during subtree replacement");
    }
    dispose(sink, &old);
    Ok(())
}

/// 彻底销毁一个实体：摘除所有父链接、抹掉子回引、删缓存、放句柄
pub fn destroy<S: SceneSink>(cache: &mut SceneCache, sink: &mut S, key: &EntityKey) -> Result<()> {
    let Some(entry) = cache.remove(key) else {
        return Err(SyncError::CacheMiss { key: key.to_string() });
    };

    // 1. 从所有父节点摘下
    for parent in &entry.parents {
        sink.remove_child(*parent, entry.handle);
    }
    // 2. 别的条目如果把它记作父节点，也要除名
    for child_key in cache.forget_parent_everywhere(entry.handle) {
        if let Some(child) = cache.get(&child_key) {
            sink.remove_child(entry.handle, child.handle);
        }
    }
    // 3. 释放
    dispose(sink, &entry);
    Ok(())
}

/// 孤儿收养：一个在本轮里新建、扫尾时仍无父节点的实体必须在轮次
/// 结束前挂回图里 — 优先挂到属主物体的数据节点（新加的粒子系统就是
/// 这种情况），否则挂到根。
pub fn adopt_orphans<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    born: &[EntityKey],
) {
    for key in born {
        let Some(entry) = cache.get(key) else { continue };
        if !entry.parents.is_empty() {
            continue;
        }
        let handle = entry.handle;
        let fallback = key
            .owner()
            .and_then(|owner| owner_data_handle(cache, owner))
            .filter(|&h| h != handle)
            .unwrap_or_else(|| sink.root());
        log::debug!("Adopting orphan '{key}'");
        sink.add_child(fallback, handle);
        cache.record_parent(key, fallback);
    }
}

fn owner_data_handle(cache: &SceneCache, owner: Name) -> Option<NodeHandle> {
    let data_key = *cache.object_data(owner)?;
    cache.handle_of(&data_key)
}

/// 多材质拆分：一个数据块展开成主节点加 N 个子面组节点（每个额外
/// 材质一个），子节点通过轻量引用继承主节点的 primvar 数据，挂在主
/// 节点下而不是根下。
///
/// 返回新建的子节点句柄。
pub fn split_materials<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    primary_key: &EntityKey,
    payload: &GeometryPayload,
    materials: &[Name],
) -> Result<Vec<NodeHandle>> {
    let Some(primary) = cache.get_mut(primary_key) else {
        return Err(SyncError::CacheMiss { key: primary_key.to_string() });
    };
    let primary_handle = primary.handle;
    let primary_kind = primary.kind;

    // 重复导出时先拆掉上一轮的次级节点，保持幂等
    for sub in std::mem::take(&mut primary.secondaries) {
        sink.remove_child(primary_handle, sub);
        sink.delete_node(sub);
    }

    if payload.material_ids.is_empty() || materials.len() < 2 {
        // 单材质：直接绑在主节点上
        if let Some(material) = materials.first()
            && let Some(mat_handle) = cache.handle_of(&EntityKey::Material { name: *material })
        {
            sink.set_material(primary_handle, mat_handle);
            cache.add_material_user(*material, *primary_key);
        }
        return Ok(Vec::new());
    }

    // 按材质槽聚面
    let mut facesets: Vec<Vec<i32>> = vec![Vec::new(); materials.len()];
    for (face, slot) in payload.material_ids.iter().enumerate() {
        if let Some(set) = facesets.get_mut(*slot as usize) {
            set.push(face as i32);
        }
    }

    let mut children = Vec::new();
    for (slot, faces) in facesets.into_iter().enumerate() {
        if faces.is_empty() {
            continue;
        }
        let material = materials[slot];
        let mat_handle = cache.handle_of(&EntityKey::Material { name: material });

        if slot == 0 {
            // 槽 0 留在主节点
            sink.set_property(primary_handle, "shade:faceset", PropertyValue::IntArray(faces));
            if let Some(m) = mat_handle {
                sink.set_material(primary_handle, m);
                cache.add_material_user(material, *primary_key);
            }
        } else {
            let name = format!("{primary_key}.mat{slot}");
            let sub = sink.create_node(primary_kind, &name);
            sink.define(sub, payload.counts)?;
            // 继承主节点数据，只带自己的面组
            sink.set_property(sub, "inherit:from", PropertyValue::String(primary_key.to_string()));
            sink.set_property(sub, "shade:faceset", PropertyValue::IntArray(faces));
            if let Some(m) = mat_handle {
                sink.set_material(sub, m);
            }
            sink.add_child(primary_handle, sub);
            children.push(sub);
        }
    }
    if let Some(primary) = cache.get_mut(primary_key) {
        primary.secondaries = children.iter().copied().collect();
    }
    Ok(children)
}
