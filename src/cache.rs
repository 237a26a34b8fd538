//! 场景缓存 (Scene Cache)
//!
//! 实体键到保留场景图节点句柄的映射，加上同步所需的辅助索引
//! （材质→使用者、灯光↔滤镜、物体→数据块、物体整数 ID）。
//!
//! 这是一个正确性缓存：条目只在其来源实体被显式移除时删除，
//! 没有容量上限，也没有隐式淘汰。

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::interner::Name;
use crate::key::EntityKey;
use crate::sink::{NodeHandle, NodeKind};

/// 一个已导出实体的缓存条目
///
/// `handle` 由缓存独占持有，直到条目被显式删除；`parents` 只是
/// DAG 记账用的弱回引，不代表所有权。
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: EntityKey,
    pub handle: NodeHandle,
    pub kind: NodeKind,
    pub parents: SmallVec<[NodeHandle; 2]>,
    /// 主节点拥有的次级节点（多材质面组拆分出的子节点），
    /// 随条目一起销毁
    pub secondaries: SmallVec<[NodeHandle; 2]>,
    /// 最近一次成功导出时的实体版本号
    pub stamp: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn new(key: EntityKey, handle: NodeHandle, kind: NodeKind) -> Self {
        Self {
            key,
            handle,
            kind,
            parents: SmallVec::new(),
            secondaries: SmallVec::new(),
            stamp: 0,
        }
    }
}

/// 实体键 → 节点句柄的主映射及辅助索引
pub struct SceneCache {
    // === 主映射 ===
    entries: FxHashMap<EntityKey, CacheEntry>,
    /// 反向索引：保证一个句柄至多出现在一个键下
    by_handle: FxHashMap<NodeHandle, EntityKey>,

    // === 辅助索引 ===
    /// 物体 → 它的主数据块键（粒子系统挂接、孤儿收养时查询）
    object_data: FxHashMap<Name, EntityKey>,
    /// 材质 → 绑定了它的实体键
    material_users: FxHashMap<Name, Vec<EntityKey>>,
    /// 滤镜 → 受它影响的灯光
    filter_lights: FxHashMap<Name, Vec<Name>>,
    /// 灯光 → 绑定的滤镜
    light_filters: FxHashMap<Name, SmallVec<[Name; 2]>>,
    /// 拾取用整数 ID 注册表
    object_ids: FxHashMap<u32, Name>,
    id_of: FxHashMap<Name, u32>,
    next_id: u32,
    /// 当前渲染相机对应的源物体名
    camera: Option<Name>,
}

impl SceneCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            by_handle: FxHashMap::default(),
            object_data: FxHashMap::default(),
            material_users: FxHashMap::default(),
            filter_lights: FxHashMap::default(),
            light_filters: FxHashMap::default(),
            object_ids: FxHashMap::default(),
            id_of: FxHashMap::default(),
            next_id: 1,
            camera: None,
        }
    }

    /// 整场重建时调用：主映射与所有辅助索引一起原子清空
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_handle.clear();
        self.object_data.clear();
        self.material_users.clear();
        self.filter_lights.clear();
        self.light_filters.clear();
        self.object_ids.clear();
        self.id_of.clear();
        self.next_id = 1;
        self.camera = None;
    }

    // ========================================================================
    // 主映射 API
    // ========================================================================

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// 句柄捷径查询
    #[must_use]
    pub fn handle_of(&self, key: &EntityKey) -> Option<NodeHandle> {
        self.entries.get(key).map(|e| e.handle)
    }

    #[must_use]
    pub fn key_of_handle(&self, handle: NodeHandle) -> Option<&EntityKey> {
        self.by_handle.get(&handle)
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entries.keys()
    }

    /// 插入（或替换）一个条目
    ///
    /// 不变量：一个句柄至多出现在一个键下。违反时为引擎 bug，
    /// 旧的占用条目会被移除并记录错误。
    pub fn put(&mut self, entry: CacheEntry) {
        if let Some(old_key) = self.by_handle.get(&entry.handle).copied()
            && old_key != entry.key
        {
            debug_assert!(false, "handle registered under two keys");
            log::error!("Cache handle already registered under '{old_key}', evicting");
            self.entries.remove(&old_key);
        }
        if let Some(previous) = self.entries.insert(entry.key, entry.clone()) {
            // 同键换句柄：反向索引里的旧句柄作废
            if previous.handle != entry.handle {
                self.by_handle.remove(&previous.handle);
            }
        }
        self.by_handle.insert(entry.handle, entry.key);
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.by_handle.remove(&entry.handle);
        for users in self.material_users.values_mut() {
            users.retain(|k| k != key);
        }
        Some(entry)
    }

    // ========================================================================
    // DAG 记账
    // ========================================================================

    pub fn record_parent(&mut self, key: &EntityKey, parent: NodeHandle) {
        if let Some(entry) = self.entries.get_mut(key)
            && !entry.parents.contains(&parent)
        {
            entry.parents.push(parent);
        }
    }

    pub fn forget_parent(&mut self, key: &EntityKey, parent: NodeHandle) {
        if let Some(entry) = self.entries.get_mut(key)
            && let Some(i) = entry.parents.iter().position(|&p| p == parent)
        {
            entry.parents.remove(i);
        }
    }

    /// 把 `parent` 从所有条目的回引里抹掉，返回受影响的键。
    /// 先收集再修改，迭代中途不持有借用。
    pub fn forget_parent_everywhere(&mut self, parent: NodeHandle) -> Vec<EntityKey> {
        let affected: Vec<EntityKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.parents.contains(&parent))
            .map(|(k, _)| *k)
            .collect();
        for key in &affected {
            self.forget_parent(key, parent);
        }
        affected
    }

    /// 某个物体派生的全部键（实例组、放置组、粒子系统、dupli 组及其
    /// 放置）。物体整体离场时据此级联销毁；返回快照，调用方可以边
    /// 迭代边改缓存。
    #[must_use]
    pub fn derived_keys(&self, owner: Name) -> Vec<EntityKey> {
        self.entries
            .keys()
            .filter(|k| k.owner() == Some(owner))
            .copied()
            .collect()
    }

    // ========================================================================
    // 版本戳 (Lazy Export)
    // ========================================================================

    pub fn set_stamp(&mut self, key: &EntityKey, version: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.stamp = version;
        }
    }

    #[must_use]
    pub fn stamp(&self, key: &EntityKey) -> Option<u64> {
        self.entries.get(key).map(|e| e.stamp)
    }

    // ========================================================================
    // 辅助索引
    // ========================================================================

    pub fn set_object_data(&mut self, object: Name, key: EntityKey) {
        self.object_data.insert(object, key);
    }

    #[must_use]
    pub fn object_data(&self, object: Name) -> Option<&EntityKey> {
        self.object_data.get(&object)
    }

    pub fn add_material_user(&mut self, material: Name, user: EntityKey) {
        let users = self.material_users.entry(material).or_default();
        if !users.contains(&user) {
            users.push(user);
        }
    }

    #[must_use]
    pub fn material_users(&self, material: Name) -> &[EntityKey] {
        self.material_users.get(&material).map_or(&[], Vec::as_slice)
    }

    pub fn set_filter_lights(&mut self, filter: Name, lights: Vec<Name>) {
        for light in &lights {
            let filters = self.light_filters.entry(*light).or_default();
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        self.filter_lights.insert(filter, lights);
    }

    #[must_use]
    pub fn lights_of_filter(&self, filter: Name) -> &[Name] {
        self.filter_lights.get(&filter).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn filters_of_light(&self, light: Name) -> &[Name] {
        self.light_filters.get(&light).map_or(&[], SmallVec::as_slice)
    }

    /// 取得（必要时分配）物体的拾取 ID
    pub fn object_id(&mut self, object: Name) -> u32 {
        if let Some(id) = self.id_of.get(&object) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.id_of.insert(object, id);
        self.object_ids.insert(id, object);
        id
    }

    #[must_use]
    pub fn object_of_id(&self, id: u32) -> Option<Name> {
        self.object_ids.get(&id).copied()
    }

    pub fn set_camera_object(&mut self, object: Name) {
        self.camera = Some(object);
    }

    #[must_use]
    pub fn camera_object(&self) -> Option<Name> {
        self.camera
    }
}

impl Default for SceneCache {
    fn default() -> Self {
        Self::new()
    }
}
