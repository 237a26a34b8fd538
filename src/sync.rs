//! Synchronizer Core
//!
//! This module contains [`Synchronizer`], the central coordinator of scene
//! synchronization. It owns the retained-graph sink, the scene cache and
//! the edit-session state for one render/interactive session; nothing here
//! is process-global, so several synchronizers can coexist.
//!
//! # Data flow
//!
//! snapshot → identity resolution → change detection → one edit session
//! covering deletes, then creates/updates in geometry < particle-systems <
//! duplis order → orphan adoption → cache/stamp updates.
//!
//! Entity-level failures never abort a pass: the entity is skipped with a
//! warning and its previous cache entry (if any) is left untouched.

use std::mem;

use crate::cache::{CacheEntry, SceneCache};
use crate::collect::{self, BlockPayload, Collected};
use crate::commands::{CommandClient, CommandQueue, RenderCommand};
use crate::dag;
use crate::detect::{self, SyncPlan};
use crate::errors::{Result, SyncError};
use crate::interner::{self, Name};
use crate::key::{DataKind, EntityKey, ExportTier, ParticleStyle};
use crate::session::EditSession;
use crate::settings::SyncOptions;
use crate::sink::{NodeHandle, NodeKind, PropertyValue, SceneSink};
use crate::source::{
    DirtyOracle, GeometryPayload, SceneSource, TransformSample, TransformSamples,
};

/// What one synchronization pass did.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub pass: u64,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Entities skipped due to recoverable errors.
    pub skipped: usize,
    /// A render client asked for the in-flight render to stop.
    pub stop_requested: bool,
    /// Object resolved from a pick-by-id command, if one arrived.
    pub selected: Option<Name>,
}

impl PassReport {
    /// True when the pass left the retained graph untouched.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0 && self.skipped == 0
    }
}

/// One incremental edit, dispatched uniformly over the entity-kind variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditRequest {
    /// An object moved.
    Transform { object: Name },
    /// The render camera moved.
    CameraTransform,
    /// An object was added to the scene.
    NewObject { object: Name },
    /// An object left the scene.
    DeleteObject { object: Name },
    /// An object's primitive kind changed (mesh ↔ subdivision, ...).
    PrimitiveType { object: Name },
    /// A particle system changed its payload or render type.
    ParticleSystem { object: Name, system: Name, style: ParticleStyle },
    /// A material's network changed; rebind every recorded user.
    Shader { material: Name },
    /// An object was hidden or revealed.
    Visibility { object: Name, visible: bool },
    /// A light moved.
    LightTransform { light: Name },
    /// A light filter moved; its coordinate system and all affected
    /// lights follow.
    LightFilterTransform { filter: Name },
}

/// The session context owning every piece of synchronizer state.
pub struct Synchronizer<S: SceneSink> {
    sink: S,
    cache: SceneCache,
    session: EditSession,
    options: SyncOptions,
    commands: CommandQueue,
    pass: u64,
    stop_requested: bool,
}

impl<S: SceneSink> Synchronizer<S> {
    #[must_use]
    pub fn new(sink: S, options: SyncOptions) -> Self {
        Self {
            sink,
            cache: SceneCache::new(),
            session: EditSession::new(),
            options,
            commands: CommandQueue::new(),
            pass: 0,
            stop_requested: false,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub fn cache(&self) -> &SceneCache {
        &self.cache
    }

    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Producer handle for render-client threads.
    #[must_use]
    pub fn client(&self) -> CommandClient {
        self.commands.client()
    }

    /// Consumes a pending stop request.
    pub fn take_stop_request(&mut self) -> bool {
        mem::take(&mut self.stop_requested)
    }

    /// Full scene re-initialization: wipes the cache (and every auxiliary
    /// index) so the next pass rebuilds the retained graph from scratch.
    /// The caller pairs this with a fresh sink scene; stale retained nodes
    /// are the sink's to reclaim.
    pub fn begin_scene(&mut self) -> Result<()> {
        if self.session.is_open() {
            return Err(SyncError::SessionViolation("begin_scene during an open session"));
        }
        self.cache.clear();
        self.stop_requested = false;
        self.pass = 0;
        log::info!("Scene cache cleared, ready for full export");
        Ok(())
    }

    /// Runs one synchronization pass against the current scene state.
    pub fn sync_pass(
        &mut self,
        source: &dyn SceneSource,
        oracle: &dyn DirtyOracle,
    ) -> Result<PassReport> {
        self.pass += 1;

        // 1. 先清空命令队列（监听线程只入队，这里统一出队）
        let mut pending_options: Vec<(&'static str, PropertyValue)> = Vec::new();
        let mut selected = None;
        for command in self.commands.drain() {
            match command {
                RenderCommand::StopRender => self.stop_requested = true,
                RenderCommand::CropWindow { min, max } => pending_options.push((
                    "Ri:CropWindow",
                    PropertyValue::FloatArray(vec![min[0], max[0], min[1], max[1]]),
                )),
                RenderCommand::SelectObject { id } => selected = self.cache.object_of_id(id),
            }
        }

        // 2. 快照 → 工作集 → 计划
        let mut collected = collect::collect(source, oracle, &self.cache, &self.options);
        let plan = detect::plan(&collected, &self.cache, oracle, &self.options);

        let mut report = PassReport {
            pass: self.pass,
            stop_requested: self.stop_requested,
            selected,
            ..PassReport::default()
        };

        // 稳定态：没有任何变化，也没有待下发的选项编辑
        if plan.is_noop() && pending_options.is_empty() {
            log::debug!("Pass {} is a no-op", self.pass);
            return Ok(report);
        }

        let Self { sink, cache, session, options, .. } = self;
        let mut born: Vec<EntityKey> = Vec::new();

        session.scoped(sink, |sink| {
            for (name, value) in pending_options.drain(..) {
                sink.set_option(name, value);
            }

            // 3. 删除在前，释放名字与父链接
            for key in &plan.to_delete {
                delete_entity(cache, sink, key, &mut report);
            }

            // 4. 分层导出：几何 < 粒子系统 < dupli
            for tier in [ExportTier::Geometry, ExportTier::Particles, ExportTier::Duplis] {
                run_tier(
                    cache, sink, source, oracle, options, &mut collected, &plan, tier,
                    &mut born, &mut report,
                )?;
            }

            // 5. 扫尾：本轮新生且仍无父节点的实体必须入图
            dag::adopt_orphans(cache, sink, &born);
            Ok(())
        })?;

        log::debug!(
            "Pass {}: +{} ~{} -{} (skipped {})",
            report.pass,
            report.created,
            report.updated,
            report.deleted,
            report.skipped
        );
        Ok(report)
    }

    /// Applies one incremental edit inside its own session.
    pub fn apply_edit(
        &mut self,
        source: &dyn SceneSource,
        oracle: &dyn DirtyOracle,
        request: EditRequest,
    ) -> Result<()> {
        self.apply_edits(source, oracle, std::slice::from_ref(&request))
    }

    /// Applies a batch of logically-independent edits merged into one
    /// session, minimizing renderer-side transaction overhead.
    pub fn apply_edits(
        &mut self,
        source: &dyn SceneSource,
        oracle: &dyn DirtyOracle,
        requests: &[EditRequest],
    ) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let Self { sink, cache, session, options, .. } = self;
        session.scoped(sink, |sink| {
            for request in requests {
                match dispatch_edit(cache, sink, source, oracle, options, request) {
                    Ok(()) => {}
                    Err(err) if err.is_recoverable() => {
                        log::warn!("Edit {request:?} failed: {err}");
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        })
    }
}

// ============================================================================
// 按层导出
// ============================================================================

fn run_tier<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    collected: &mut Collected,
    plan: &SyncPlan,
    tier: ExportTier,
    born: &mut Vec<EntityKey>,
    report: &mut PassReport,
) -> Result<()> {
    for key in plan.to_create.iter().filter(|k| k.tier() == tier) {
        match export_entity(cache, sink, source, oracle, options, collected, key, born) {
            Ok(()) => report.created += 1,
            Err(err) if err.is_recoverable() => {
                log::warn!("Skipping new entity '{key}': {err}");
                report.skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }
    for key in plan.to_update.iter().filter(|k| k.tier() == tier) {
        match export_entity(cache, sink, source, oracle, options, collected, key, born) {
            Ok(()) => report.updated += 1,
            Err(err) if err.is_recoverable() => {
                log::warn!("Skipping dirty entity '{key}': {err}");
                report.skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Exports (creates or refreshes) one planned entity and stamps its
/// version on success.
fn export_entity<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    collected: &mut Collected,
    key: &EntityKey,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    match key {
        EntityKey::Camera => export_camera(cache, sink, source, collected, born)?,
        EntityKey::Data { .. } | EntityKey::ObjectData { .. } => {
            export_geometry_block(cache, sink, source, collected, key, born)?;
        }
        EntityKey::Particles { .. } => {
            export_particles(cache, sink, source, collected, key, born)?;
        }
        EntityKey::Dupli { owner } => {
            export_dupli(cache, sink, source, collected, key, *owner, born)?;
        }
        EntityKey::Instance { object } => {
            export_instance(cache, sink, source, collected, *object, born)?;
        }
        EntityKey::Light { name } => export_light(cache, sink, source, collected, *name, born)?,
        EntityKey::LightFilter { name } => {
            export_light_filter(cache, sink, source, collected, *name, born)?;
        }
        // Derived keys and materials are built alongside their owners.
        _ => {}
    }
    if !options.lazy_export {
        return Ok(());
    }
    if let Some(owner) = detect::stamp_owner(collected, key) {
        cache.set_stamp(key, oracle.version(owner));
    }
    Ok(())
}

fn node_kind_for(data: DataKind) -> NodeKind {
    match data {
        DataKind::Mesh | DataKind::Subdivision | DataKind::Meta | DataKind::Quadric => NodeKind::Mesh,
        DataKind::Points => NodeKind::Points,
        DataKind::Curves => NodeKind::Curves,
        DataKind::Volume | DataKind::Procedural => NodeKind::Procedural,
    }
}

/// Writes primvars for every motion sample; extra samples are suffixed
/// with their sample index and announced via `motion:times`.
fn apply_primvars<S: SceneSink>(
    sink: &mut S,
    handle: NodeHandle,
    samples: &[(f32, GeometryPayload)],
) {
    if samples.len() > 1 {
        let times: Vec<f32> = samples.iter().map(|(t, _)| *t).collect();
        sink.set_property(handle, "motion:times", PropertyValue::FloatArray(times));
    }
    for (index, (_, payload)) in samples.iter().enumerate() {
        for (name, value) in &payload.primvars {
            if index == 0 {
                sink.set_property(handle, name, value.clone());
            } else {
                sink.set_property(handle, &format!("{name}@{index}"), value.clone());
            }
        }
    }
}

fn ensure_material<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    material: Name,
) -> NodeHandle {
    let key = EntityKey::Material { name: material };
    if let Some(handle) = cache.handle_of(&key) {
        return handle;
    }
    let handle = sink.create_node(NodeKind::Material, &key.to_string());
    cache.put(CacheEntry::new(key, handle, NodeKind::Material));
    handle
}

fn take_samples(
    source: &dyn SceneSource,
    collected: &mut Collected,
    key: &EntityKey,
) -> Result<Vec<(f32, GeometryPayload)>> {
    let Some(block) = collected.blocks.get_mut(key) else {
        return Err(SyncError::CacheMiss { key: key.to_string() });
    };
    if block.motion.is_empty() {
        let payload = source.read_geometry(key, 0.0)?;
        Ok(vec![(0.0, payload)])
    } else {
        // 变形采样缓冲只消费一次
        Ok(mem::take(&mut block.motion))
    }
}

fn export_geometry_block<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    collected: &mut Collected,
    key: &EntityKey,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    let (owner, materials, do_export, kind) = {
        let Some(block) = collected.blocks.get(key) else {
            return Err(SyncError::CacheMiss { key: key.to_string() });
        };
        let kind = match &block.payload {
            BlockPayload::Geometry(kind) => *kind,
            _ => DataKind::Mesh,
        };
        (block.owner, block.materials.clone(), block.do_export, kind)
    };

    cache.set_object_data(owner, *key);
    if !do_export && cache.contains(key) {
        return Ok(());
    }

    let samples = take_samples(source, collected, key)?;
    let node_kind = node_kind_for(kind);

    let existing = cache.handle_of(key);
    let handle = existing.unwrap_or_else(|| sink.create_node(node_kind, &key.to_string()));

    if let Err(err) = sink.define(handle, samples[0].1.counts) {
        if existing.is_none() {
            // 新节点从未入缓存，直接丢弃；旧条目保持原样
            sink.delete_node(handle);
        }
        return Err(err);
    }
    apply_primvars(sink, handle, &samples);

    if existing.is_none() {
        cache.put(CacheEntry::new(*key, handle, node_kind));
        born.push(*key);
    }

    for material in &materials {
        ensure_material(cache, sink, *material);
    }
    dag::split_materials(cache, sink, key, &samples[0].1, &materials)?;
    Ok(())
}

fn export_particles<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    collected: &mut Collected,
    key: &EntityKey,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    let (owner, style, material_override, do_export) = {
        let Some(block) = collected.blocks.get(key) else {
            return Err(SyncError::CacheMiss { key: key.to_string() });
        };
        let (style, material) = match &block.payload {
            BlockPayload::Particles(style, material) => (*style, *material),
            _ => (ParticleStyle::Emitter, None),
        };
        (block.owner, style, material, block.do_export)
    };

    if !do_export && cache.contains(key) {
        return Ok(());
    }

    let samples = take_samples(source, collected, key)?;
    let node_kind = match style {
        ParticleStyle::Emitter => NodeKind::Points,
        ParticleStyle::Hair => NodeKind::Curves,
    };

    let handle = sink.create_node(node_kind, &key.to_string());
    if let Err(err) = sink.define(handle, samples[0].1.counts) {
        sink.delete_node(handle);
        return Err(err);
    }
    apply_primvars(sink, handle, &samples);

    if cache.contains(key) {
        // 粒子渲染类型/载荷变化：原位整树替换，父节点照单全收
        dag::replace_subtree(cache, sink, key, *key, handle, node_kind)?;
    } else {
        cache.put(CacheEntry::new(*key, handle, node_kind));
        born.push(*key);
        // 挂到属主物体的数据节点下
        if let Some(data_key) = cache.object_data(owner).copied()
            && let Some(parent) = cache.handle_of(&data_key)
        {
            dag::graft(cache, sink, parent, key)?;
        }
    }

    if let Some(material) = material_override {
        let mat_handle = ensure_material(cache, sink, material);
        sink.set_material(handle, mat_handle);
        cache.add_material_user(material, *key);
    }
    Ok(())
}

fn export_dupli<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    collected: &mut Collected,
    key: &EntityKey,
    owner: Name,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    let do_export = collected.blocks.get(key).is_some_and(|b| b.do_export);
    if !do_export && cache.contains(key) {
        return Ok(());
    }

    let existing = cache.handle_of(key);
    let group = existing.unwrap_or_else(|| sink.create_node(NodeKind::Group, &key.to_string()));
    if existing.is_none() {
        cache.put(CacheEntry::new(*key, group, NodeKind::Group));
        born.push(*key);
    } else {
        // 重建：旧放置组全部拆掉再铺新的
        for stale in cache.derived_keys(owner) {
            if matches!(stale, EntityKey::DupliInstance { .. }) {
                let _ = dag::destroy(cache, sink, &stale);
            }
        }
    }

    for placement in source.read_placements(owner) {
        let pkey = EntityKey::DupliInstance {
            owner,
            source: placement.source,
            index: placement.index,
        };
        let Some(data_key) = cache.object_data(placement.source).copied() else {
            log::warn!(
                "Dupli source '{}' has no exported data, skipping placement",
                interner::resolve(placement.source)
            );
            continue;
        };
        if cache.handle_of(&data_key).is_none() {
            log::warn!("Dupli source data '{data_key}' not cached, skipping placement");
            continue;
        }

        let inst = sink.create_node(NodeKind::Group, &pkey.to_string());
        cache.put(CacheEntry::new(pkey, inst, NodeKind::Group));
        sink.set_transform(inst, &[TransformSample::still(placement.matrix)]);
        dag::graft(cache, sink, inst, &data_key)?;
        dag::graft(cache, sink, group, &pkey)?;

        // 被实例化的源物体自身不再直接出现在画面里
        if let Some(src_inst) = cache.handle_of(&EntityKey::Instance { object: placement.source }) {
            sink.set_hidden(src_inst, true);
        }
    }

    if existing.is_none() {
        let root = sink.root();
        sink.add_child(root, group);
        cache.record_parent(key, root);
    }
    Ok(())
}

fn export_instance<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    collected: &Collected,
    object: Name,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    let Some(instance) = collected.instances.get(&object) else {
        return Err(SyncError::Resolution {
            entity: interner::resolve(object).to_owned(),
            reason: "object missing from traversal",
        });
    };
    let key = EntityKey::Instance { object };

    let existing = cache.handle_of(&key);
    let handle = existing.unwrap_or_else(|| sink.create_node(NodeKind::Group, &key.to_string()));
    if existing.is_none() {
        cache.put(CacheEntry::new(key, handle, NodeKind::Group));
        born.push(key);
    }

    let id = cache.object_id(object);
    sink.set_property(handle, "identifier:id", PropertyValue::Int(id as i32));
    sink.set_hidden(handle, !instance.visible);

    // 放置组：包一层带变换的 Group，再挂共享数据节点
    let samples: TransformSamples = if instance.motion.is_empty() {
        match source.read_transform(object, 0.0) {
            Some(matrix) => TransformSamples::from_slice(&[TransformSample::still(matrix)]),
            None => TransformSamples::new(),
        }
    } else {
        instance.motion.clone()
    };

    for data_key in &instance.data_blocks {
        if !matches!(data_key, EntityKey::Data { .. } | EntityKey::ObjectData { .. }) {
            continue; // 粒子系统挂在数据节点下，不走放置组
        }
        let Ok(pkey) = crate::resolve::resolve_placement(object, data_key) else {
            continue;
        };
        let placement = match cache.handle_of(&pkey) {
            Some(h) => h,
            None => {
                let h = sink.create_node(NodeKind::Group, &pkey.to_string());
                cache.put(CacheEntry::new(pkey, h, NodeKind::Group));
                sink.add_child(handle, h);
                cache.record_parent(&pkey, handle);
                h
            }
        };
        if !samples.is_empty() {
            sink.set_transform(placement, &samples);
        }
        if let Err(err) = dag::graft(cache, sink, placement, data_key) {
            log::warn!("Cannot place '{data_key}' under '{}': {err}", interner::resolve(object));
        }
    }

    for material in &instance.materials {
        let mat_handle = ensure_material(cache, sink, *material);
        sink.set_material(handle, mat_handle);
        cache.add_material_user(*material, key);
    }

    if existing.is_none() {
        let root = sink.root();
        sink.add_child(root, handle);
        cache.record_parent(&key, root);
    }
    Ok(())
}

fn export_camera<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    collected: &Collected,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    let Some(camera) = collected.camera else {
        return Err(SyncError::Resolution {
            entity: String::from("camera"),
            reason: "no camera in snapshot",
        });
    };
    cache.set_camera_object(camera);

    let key = EntityKey::Camera;
    let existing = cache.handle_of(&key);
    let handle = existing.unwrap_or_else(|| sink.create_node(NodeKind::Camera, "camera"));
    if existing.is_none() {
        cache.put(CacheEntry::new(key, handle, NodeKind::Camera));
        born.push(key);
        let root = sink.root();
        sink.add_child(root, handle);
        cache.record_parent(&key, root);
    }
    if let Some(matrix) = source.read_transform(camera, 0.0) {
        sink.set_transform(handle, &[TransformSample::still(matrix)]);
    }
    Ok(())
}

fn export_light<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    collected: &Collected,
    light: Name,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    let Some(desc) = collected.lights.get(&light) else {
        return Err(SyncError::Resolution {
            entity: interner::resolve(light).to_owned(),
            reason: "light missing from traversal",
        });
    };
    let key = EntityKey::Light { name: light };

    let existing = cache.handle_of(&key);
    let handle = existing.unwrap_or_else(|| sink.create_node(NodeKind::Light, &key.to_string()));
    if existing.is_none() {
        cache.put(CacheEntry::new(key, handle, NodeKind::Light));
        born.push(key);
        let root = sink.root();
        sink.add_child(root, handle);
        cache.record_parent(&key, root);
    }

    if let Some(matrix) = source.read_transform(light, 0.0) {
        sink.set_transform(handle, &[TransformSample::still(matrix)]);
    }
    for filter in &desc.filters {
        sink.set_property(
            handle,
            "lightfilter:ref",
            PropertyValue::String(interner::resolve(*filter).to_owned()),
        );
    }
    Ok(())
}

fn export_light_filter<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    collected: &Collected,
    filter: Name,
    born: &mut Vec<EntityKey>,
) -> Result<()> {
    let Some(desc) = collected.filters.get(&filter) else {
        return Err(SyncError::Resolution {
            entity: interner::resolve(filter).to_owned(),
            reason: "light filter missing from traversal",
        });
    };
    let key = EntityKey::LightFilter { name: filter };
    let coordsys_key = EntityKey::CoordSys { filter };

    let existing = cache.handle_of(&key);
    let handle =
        existing.unwrap_or_else(|| sink.create_node(NodeKind::LightFilter, &key.to_string()));
    if existing.is_none() {
        cache.put(CacheEntry::new(key, handle, NodeKind::LightFilter));
    }

    // 滤镜锚定在自己的坐标系组上
    let coordsys = match cache.handle_of(&coordsys_key) {
        Some(h) => h,
        None => {
            let h = sink.create_node(NodeKind::Group, &coordsys_key.to_string());
            cache.put(CacheEntry::new(coordsys_key, h, NodeKind::Group));
            born.push(coordsys_key);
            let root = sink.root();
            sink.add_child(root, h);
            cache.record_parent(&coordsys_key, root);
            h
        }
    };
    if let Some(matrix) = source.read_transform(filter, 0.0) {
        sink.set_transform(coordsys, &[TransformSample::still(matrix)]);
    }
    sink.set_property(
        handle,
        "coordsys",
        PropertyValue::String(coordsys_key.to_string()),
    );

    cache.set_filter_lights(filter, desc.lights.clone());
    for light in &desc.lights {
        if let Some(light_handle) = cache.handle_of(&EntityKey::Light { name: *light }) {
            sink.set_property(
                light_handle,
                "lightfilter:ref",
                PropertyValue::String(interner::resolve(filter).to_owned()),
            );
        }
    }
    Ok(())
}

// ============================================================================
// 删除
// ============================================================================

fn delete_entity<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    key: &EntityKey,
    report: &mut PassReport,
) {
    let destroyed = match key {
        EntityKey::Instance { object } => delete_object(cache, sink, *object),
        EntityKey::Dupli { owner } => {
            let mut n = 0;
            for stale in cache.derived_keys(*owner) {
                if matches!(stale, EntityKey::DupliInstance { .. } | EntityKey::Dupli { .. }) {
                    n += usize::from(dag::destroy(cache, sink, &stale).is_ok());
                }
            }
            n
        }
        EntityKey::LightFilter { name } => {
            let mut n = usize::from(dag::destroy(cache, sink, key).is_ok());
            n += usize::from(dag::destroy(cache, sink, &EntityKey::CoordSys { filter: *name }).is_ok());
            n
        }
        // 已被同一轮里的级联清理带走：静默跳过
        _ if !cache.contains(key) => 0,
        _ => match dag::destroy(cache, sink, key) {
            Ok(()) => 1,
            Err(err) => {
                // 编辑一个从未建出的节点：警告后按无操作处理
                log::warn!("Delete of '{key}' was a no-op: {err}");
                0
            }
        },
    };
    report.deleted += destroyed;
}

/// Cascading removal of an object: its instance group, placements,
/// particle systems and dupli output, then any data block left without a
/// single parent.
fn delete_object<S: SceneSink>(cache: &mut SceneCache, sink: &mut S, object: Name) -> usize {
    let mut destroyed = 0;
    for key in cache.derived_keys(object) {
        match dag::destroy(cache, sink, &key) {
            Ok(()) => destroyed += 1,
            Err(err) => log::warn!("Cascade delete of '{key}' was a no-op: {err}"),
        }
    }
    // 共享数据块只有在最后一个使用者消失后才销毁
    let garbage: Vec<EntityKey> = cache
        .keys()
        .filter(|k| matches!(k, EntityKey::Data { .. } | EntityKey::ObjectData { .. }))
        .filter(|k| cache.get(k).is_some_and(|e| e.parents.is_empty()))
        .copied()
        .collect();
    for key in garbage {
        if dag::destroy(cache, sink, &key).is_ok() {
            destroyed += 1;
        }
    }
    destroyed
}

// ============================================================================
// 增量编辑分发
// ============================================================================

fn dispatch_edit<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    request: &EditRequest,
) -> Result<()> {
    match request {
        EditRequest::Transform { object } => edit_transform(cache, sink, source, *object),
        EditRequest::CameraTransform => {
            let Some(camera) = cache.camera_object() else {
                return Err(SyncError::CacheMiss { key: String::from("camera") });
            };
            let Some(handle) = cache.handle_of(&EntityKey::Camera) else {
                return Err(SyncError::CacheMiss { key: String::from("camera") });
            };
            if let Some(matrix) = source.read_transform(camera, 0.0) {
                sink.set_transform(handle, &[TransformSample::still(matrix)]);
            }
            Ok(())
        }
        EditRequest::NewObject { object } => {
            edit_new_object(cache, sink, source, oracle, options, *object)
        }
        EditRequest::DeleteObject { object } => {
            let removed = delete_object(cache, sink, *object);
            if removed == 0 {
                log::warn!(
                    "Delete of '{}' removed nothing",
                    interner::resolve(*object)
                );
            }
            Ok(())
        }
        EditRequest::PrimitiveType { object } => {
            edit_primitive_type(cache, sink, source, oracle, options, *object)
        }
        EditRequest::ParticleSystem { object, system, style } => {
            let key = EntityKey::Particles { object: *object, system: *system, style: *style };
            let mut collected = collect::collect(source, oracle, cache, options);
            if let Some(block) = collected.blocks.get_mut(&key) {
                block.do_export = true;
            }
            let mut born = Vec::new();
            export_particles(cache, sink, source, &mut collected, &key, &mut born)?;
            dag::adopt_orphans(cache, sink, &born);
            Ok(())
        }
        EditRequest::Shader { material } => edit_shader(cache, sink, *material),
        EditRequest::Visibility { object, visible } => {
            let Some(handle) = cache.handle_of(&EntityKey::Instance { object: *object }) else {
                return Err(SyncError::CacheMiss {
                    key: EntityKey::Instance { object: *object }.to_string(),
                });
            };
            sink.set_hidden(handle, !*visible);
            Ok(())
        }
        EditRequest::LightTransform { light } => {
            let Some(handle) = cache.handle_of(&EntityKey::Light { name: *light }) else {
                return Err(SyncError::CacheMiss {
                    key: EntityKey::Light { name: *light }.to_string(),
                });
            };
            if let Some(matrix) = source.read_transform(*light, 0.0) {
                sink.set_transform(handle, &[TransformSample::still(matrix)]);
            }
            Ok(())
        }
        EditRequest::LightFilterTransform { filter } => {
            edit_light_filter_transform(cache, sink, source, *filter)
        }
    }
}

fn edit_transform<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    object: Name,
) -> Result<()> {
    // 优先放置组；没有放置组（纯 dupli 源等）退回数据节点
    let handle = cache
        .object_data(object)
        .copied()
        .and_then(|data_key| {
            crate::resolve::resolve_placement(object, &data_key)
                .ok()
                .and_then(|pkey| cache.handle_of(&pkey))
                .or_else(|| cache.handle_of(&data_key))
        })
        .or_else(|| cache.handle_of(&EntityKey::Instance { object }));
    let Some(handle) = handle else {
        return Err(SyncError::CacheMiss {
            key: EntityKey::Instance { object }.to_string(),
        });
    };
    if let Some(matrix) = source.read_transform(object, 0.0) {
        sink.set_transform(handle, &[TransformSample::still(matrix)]);
    }
    Ok(())
}

fn edit_new_object<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    object: Name,
) -> Result<()> {
    let mut collected = collect::collect(source, oracle, cache, options);
    let mut keys: Vec<EntityKey> = Vec::new();

    if let Some(instance) = collected.instances.get(&object) {
        keys.extend(instance.data_blocks.iter().copied());
        keys.push(EntityKey::Instance { object });
    }
    let dupli_key = EntityKey::Dupli { owner: object };
    if collected.blocks.contains_key(&dupli_key) {
        keys.push(dupli_key);
    }
    if collected.lights.contains_key(&object) {
        keys.push(EntityKey::Light { name: object });
    }
    if collected.filters.contains_key(&object) {
        keys.push(EntityKey::LightFilter { name: object });
    }
    if keys.is_empty() {
        return Err(SyncError::Resolution {
            entity: interner::resolve(object).to_owned(),
            reason: "new object not present in snapshot",
        });
    }
    keys.sort_by_key(EntityKey::sort_key);

    let mut born = Vec::new();
    for key in &keys {
        if let Some(block) = collected.blocks.get_mut(key) {
            block.do_export = true;
        }
        export_entity(cache, sink, source, oracle, options, &mut collected, key, &mut born)?;
    }
    dag::adopt_orphans(cache, sink, &born);
    Ok(())
}

fn edit_primitive_type<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    object: Name,
) -> Result<()> {
    let Some(old_key) = cache.object_data(object).copied() else {
        return Err(SyncError::CacheMiss {
            key: EntityKey::Instance { object }.to_string(),
        });
    };

    let mut collected = collect::collect(source, oracle, cache, options);
    let Some(instance) = collected.instances.get(&object) else {
        return Err(SyncError::Resolution {
            entity: interner::resolve(object).to_owned(),
            reason: "object missing from traversal",
        });
    };
    let Some(new_key) = instance
        .data_blocks
        .iter()
        .find(|k| matches!(k, EntityKey::Data { .. } | EntityKey::ObjectData { .. }))
        .copied()
    else {
        return Err(SyncError::Resolution {
            entity: interner::resolve(object).to_owned(),
            reason: "object has no data block after primitive change",
        });
    };

    if let Some(block) = collected.blocks.get_mut(&new_key) {
        block.do_export = true;
    }
    let mut born = Vec::new();
    export_geometry_block(cache, sink, source, &mut collected, &new_key, &mut born)?;

    if new_key != old_key {
        // 旧节点的父节点全部改挂新节点，再销毁旧节点
        let Some(new_handle) = cache.handle_of(&new_key) else {
            return Err(SyncError::CacheMiss { key: new_key.to_string() });
        };
        if let Some(old) = cache.remove(&old_key) {
            for parent in old.parents.clone() {
                sink.remove_child(parent, old.handle);
                sink.add_child(parent, new_handle);
                cache.record_parent(&new_key, parent);
            }
            for lost in cache.forget_parent_everywhere(old.handle) {
                log::debug!("'{lost}' detached during primitive switch");
            }
            dag::dispose(sink, &old);
        }
    }
    dag::adopt_orphans(cache, sink, &born);
    Ok(())
}

fn edit_shader<S: SceneSink>(cache: &mut SceneCache, sink: &mut S, material: Name) -> Result<()> {
    let key = EntityKey::Material { name: material };
    let users: Vec<EntityKey> = cache.material_users(material).to_vec();

    let new_handle = sink.create_node(NodeKind::Material, &key.to_string());
    let old = cache.remove(&key);
    cache.put(CacheEntry::new(key, new_handle, NodeKind::Material));
    for user in &users {
        cache.add_material_user(material, *user);
        if let Some(user_handle) = cache.handle_of(user) {
            sink.set_material(user_handle, new_handle);
        }
    }
    if let Some(old) = old {
        sink.delete_node(old.handle);
    }
    Ok(())
}

fn edit_light_filter_transform<S: SceneSink>(
    cache: &mut SceneCache,
    sink: &mut S,
    source: &dyn SceneSource,
    filter: Name,
) -> Result<()> {
    let coordsys_key = EntityKey::CoordSys { filter };
    let Some(coordsys) = cache.handle_of(&coordsys_key) else {
        return Err(SyncError::CacheMiss { key: coordsys_key.to_string() });
    };
    if let Some(matrix) = source.read_transform(filter, 0.0) {
        sink.set_transform(coordsys, &[TransformSample::still(matrix)]);
    }
    if let Some(filter_handle) = cache.handle_of(&EntityKey::LightFilter { name: filter }) {
        sink.set_property(
            filter_handle,
            "coordsys",
            PropertyValue::String(coordsys_key.to_string()),
        );
    }
    // 受影响的灯光重新绑定滤镜
    for light in cache.lights_of_filter(filter).to_vec() {
        if let Some(light_handle) = cache.handle_of(&EntityKey::Light { name: light }) {
            sink.set_property(
                light_handle,
                "lightfilter:ref",
                PropertyValue::String(interner::resolve(filter).to_owned()),
            );
        }
    }
    Ok(())
}
