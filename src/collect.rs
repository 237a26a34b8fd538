//! Per-pass scene traversal.
//!
//! Turns a [`SceneSource`] snapshot into the flat working sets one
//! synchronization pass operates on: [`Instance`] placements, shared
//! [`DataBlock`] payloads and the motion-segment groups that need subframe
//! sampling. Instances are created fresh each traversal; only their derived
//! keys persist across frames via the scene cache.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cache::SceneCache;
use crate::interner::{self, Name};
use crate::key::{DataKind, EntityKey, ExportTier, ParticleStyle};
use crate::resolve;
use crate::settings::SyncOptions;
use crate::source::{
    DirtyOracle, EntityDescriptor, FilterDesc, GeometryDesc, GeometryPayload, LightDesc,
    ParticleRender, Payload, SceneSource, TransformSample, TransformSamples,
};

/// One placement of a data entity, rebuilt every traversal.
#[derive(Debug, Clone)]
pub struct Instance {
    pub key: EntityKey,
    pub object: Name,
    pub transforming: bool,
    pub visible: bool,
    /// Transform samples: empty until motion sampling runs; static
    /// placements are sampled once at export time instead.
    pub motion: TransformSamples,
    pub parent: Option<Name>,
    pub children: Vec<Name>,
    /// Data-block keys this instance places.
    pub data_blocks: Vec<EntityKey>,
    pub materials: Vec<Name>,
}

/// What a data block expands to in the retained graph.
#[derive(Debug, Clone)]
pub enum BlockPayload {
    Geometry(DataKind),
    Particles(ParticleStyle, Option<Name>),
    Dupli(Vec<Name>),
}

/// One possibly-shared exportable payload.
#[derive(Debug, Clone)]
pub struct DataBlock {
    pub key: EntityKey,
    /// Object that introduced the block this traversal.
    pub owner: Name,
    pub payload: BlockPayload,
    pub tier: ExportTier,
    pub deforming: bool,
    /// False when the lazy-export stamp says the entity is unchanged.
    pub do_export: bool,
    pub materials: Vec<Name>,
    /// Per-subframe geometry, filled by motion sampling and consumed once
    /// at export.
    pub motion: Vec<(f32, GeometryPayload)>,
}

/// Entities grouped by motion segment count.
#[derive(Debug, Default)]
pub struct MotionGroup {
    pub instances: Vec<Name>,
    pub blocks: Vec<EntityKey>,
}

/// Everything one synchronization pass works from.
#[derive(Debug, Default)]
pub struct Collected {
    pub instances: FxHashMap<Name, Instance>,
    pub blocks: FxHashMap<EntityKey, DataBlock>,
    pub lights: FxHashMap<Name, LightDesc>,
    pub filters: FxHashMap<Name, FilterDesc>,
    /// Source object carrying the render camera, if any.
    pub camera: Option<Name>,
    pub motion_groups: FxHashMap<u32, MotionGroup>,
}

impl Collected {
    /// The set of plannable keys present this frame. Derived keys
    /// (placements, coordinate systems, dupli placements) are excluded:
    /// they are built and torn down with their owners.
    #[must_use]
    pub fn current_keys(&self) -> FxHashSet<EntityKey> {
        let mut keys = FxHashSet::default();
        if self.camera.is_some() {
            keys.insert(EntityKey::Camera);
        }
        for object in self.instances.keys() {
            keys.insert(EntityKey::Instance { object: *object });
        }
        keys.extend(self.blocks.keys().copied());
        for light in self.lights.keys() {
            keys.insert(EntityKey::Light { name: *light });
        }
        for filter in self.filters.keys() {
            keys.insert(EntityKey::LightFilter { name: *filter });
        }
        keys
    }
}

fn should_export(
    cache: &SceneCache,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    key: &EntityKey,
    owner: Name,
) -> bool {
    if !options.lazy_export {
        return true;
    }
    match cache.stamp(key) {
        None => true,
        Some(stamp) => oracle.version(owner) > stamp,
    }
}

/// Shutter-relative sample times for a segment count.
fn subframe_times(segments: u32) -> Vec<f32> {
    let segments = segments.max(1);
    (0..=segments).map(|i| i as f32 / segments as f32).collect()
}

/// Builds the working sets for one pass and runs motion sampling.
pub fn collect(
    source: &dyn SceneSource,
    oracle: &dyn DirtyOracle,
    cache: &SceneCache,
    options: &SyncOptions,
) -> Collected {
    let mut out = Collected::default();

    for desc in source.snapshot() {
        if desc.deleted {
            continue;
        }
        match &desc.payload {
            Payload::Camera => out.camera = Some(desc.object),
            Payload::Empty => {}
            Payload::Light(light) => {
                out.lights.insert(desc.object, light.clone());
            }
            Payload::LightFilter(filter) => {
                out.filters.insert(desc.object, filter.clone());
            }
            Payload::Geometry(geo) => collect_geometry(oracle, cache, options, &desc, geo, &mut out),
        }
    }

    if options.motion_blur {
        sample_motion(source, &mut out);
    }

    out
}

fn collect_geometry(
    oracle: &dyn DirtyOracle,
    cache: &SceneCache,
    options: &SyncOptions,
    desc: &EntityDescriptor,
    geo: &GeometryDesc,
    out: &mut Collected,
) {
    let object = desc.object;
    let segments = geo.motion_segments.unwrap_or(options.motion_segments);
    let transforming = options.motion_blur && geo.transforming;

    let mut instance = Instance {
        key: EntityKey::Instance { object },
        object,
        transforming,
        visible: geo.visible,
        motion: TransformSamples::new(),
        parent: geo.parent,
        children: geo.children.clone(),
        data_blocks: Vec::new(),
        materials: geo.materials.clone(),
    };

    if transforming {
        out.motion_groups.entry(segments).or_default().instances.push(object);
    }

    // 粒子系统块：原生粒子直接成块，对象/集合型粒子走 dupli 组
    for particle in &geo.particles {
        match &particle.render_as {
            ParticleRender::Native => {
                let key = resolve::resolve_particles(object, particle);
                if !out.blocks.contains_key(&key) {
                    let do_export = should_export(cache, oracle, options, &key, object);
                    if particle.animated && options.motion_blur && do_export {
                        out.motion_groups.entry(segments).or_default().blocks.push(key);
                    }
                    out.blocks.insert(
                        key,
                        DataBlock {
                            key,
                            owner: object,
                            payload: BlockPayload::Particles(particle.style, particle.material),
                            tier: ExportTier::Particles,
                            deforming: particle.animated,
                            do_export,
                            materials: particle.material.into_iter().collect(),
                            motion: Vec::new(),
                        },
                    );
                }
                instance.data_blocks.push(key);
            }
            ParticleRender::Object(target) => {
                push_dupli_block(cache, oracle, options, object, vec![*target], out);
            }
            ParticleRender::Collection(targets) => {
                push_dupli_block(cache, oracle, options, object, targets.clone(), out);
            }
        }
    }

    if let Some(dupli) = &geo.dupli {
        push_dupli_block(cache, oracle, options, object, dupli.sources.clone(), out);
    }

    // 物体自身的数据块
    if geo.data.is_some() || geo.fluid {
        match resolve::resolve_data(object, geo) {
            Ok(key) => {
                if !out.blocks.contains_key(&key) {
                    let do_export = should_export(cache, oracle, options, &key, object);
                    if geo.deforming && options.motion_blur && do_export {
                        out.motion_groups.entry(segments).or_default().blocks.push(key);
                    }
                    let kind = match key {
                        EntityKey::Data { kind, .. } | EntityKey::ObjectData { kind, .. } => kind,
                        _ => DataKind::Mesh,
                    };
                    out.blocks.insert(
                        key,
                        DataBlock {
                            key,
                            owner: object,
                            payload: BlockPayload::Geometry(kind),
                            tier: ExportTier::Geometry,
                            deforming: geo.deforming,
                            do_export,
                            materials: geo.materials.clone(),
                            motion: Vec::new(),
                        },
                    );
                }
                instance.data_blocks.push(key);
            }
            Err(err) => {
                log::warn!("Skipping data block of '{}': {err}", interner::resolve(object));
            }
        }
    }

    out.instances.insert(object, instance);
}

fn push_dupli_block(
    cache: &SceneCache,
    oracle: &dyn DirtyOracle,
    options: &SyncOptions,
    owner: Name,
    sources: Vec<Name>,
    out: &mut Collected,
) {
    let key = resolve::resolve_dupli(owner);
    match out.blocks.get_mut(&key) {
        Some(block) => {
            if let BlockPayload::Dupli(existing) = &mut block.payload {
                for source in sources {
                    if !existing.contains(&source) {
                        existing.push(source);
                    }
                }
            }
        }
        None => {
            let do_export = should_export(cache, oracle, options, &key, owner);
            out.blocks.insert(
                key,
                DataBlock {
                    key,
                    owner,
                    payload: BlockPayload::Dupli(sources),
                    tier: ExportTier::Duplis,
                    deforming: false,
                    do_export,
                    materials: Vec::new(),
                    motion: Vec::new(),
                },
            );
        }
    }
}

/// Samples transforms and deforming payloads over the shutter interval,
/// one batch of entities per distinct segment count so every member of a
/// batch shares identical time-sample tags.
fn sample_motion(source: &dyn SceneSource, out: &mut Collected) {
    for (segments, group) in &out.motion_groups {
        for time in subframe_times(*segments) {
            for object in &group.instances {
                if let Some(instance) = out.instances.get_mut(object) {
                    match source.read_transform(*object, time) {
                        Some(matrix) => instance.motion.push(TransformSample { time, matrix }),
                        None => log::warn!(
                            "No transform for '{}' at subframe {time}",
                            interner::resolve(*object)
                        ),
                    }
                }
            }
            for key in &group.blocks {
                if let Some(block) = out.blocks.get_mut(key)
                    && block.do_export
                {
                    match source.read_geometry(key, time) {
                        Ok(payload) => block.motion.push((time, payload)),
                        Err(err) => log::warn!("Deformation sample failed for '{key}': {err}"),
                    }
                }
            }
        }
    }
}
