//! Scene data source boundary.
//!
//! The synchronizer never talks to the host application's object model
//! directly. Each pass it polls a [`SceneSource`] for a snapshot of flat
//! [`EntityDescriptor`] values and reads transforms/geometry on demand.
//! Dirtiness is not re-derived by content diffing; it comes from an
//! injected [`DirtyOracle`], so the change detector can be exercised with a
//! fake oracle in tests.

use bitflags::bitflags;
use glam::Affine3A;
use smallvec::SmallVec;

use crate::errors::Result;
use crate::interner::Name;
use crate::key::{DataKind, EntityKey, ParticleStyle};
use crate::sink::PropertyValue;

bitflags! {
    /// What changed on a source entity since its last successful export.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u32 {
        const TRANSFORM  = 1 << 0;
        const GEOMETRY   = 1 << 1;
        const MATERIAL   = 1 << 2;
        const VISIBILITY = 1 << 3;
    }
}

/// One transform sample tagged with its shutter-relative time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSample {
    pub time: f32,
    pub matrix: Affine3A,
}

impl TransformSample {
    #[must_use]
    pub fn still(matrix: Affine3A) -> Self {
        Self { time: 0.0, matrix }
    }
}

/// Ordered transform samples: one for static placements, N matching
/// time-sample tags for motion-blurred ones.
pub type TransformSamples = SmallVec<[TransformSample; 1]>;

/// Topology counts handed to the sink's define call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometryCounts {
    pub faces: u32,
    pub points: u32,
    pub vertices: u32,
}

/// Geometry buffers for one data block at one sample time.
#[derive(Debug, Clone, Default)]
pub struct GeometryPayload {
    pub counts: GeometryCounts,
    /// Named primitive variables (positions, normals, widths, ...).
    pub primvars: Vec<(String, PropertyValue)>,
    /// Per-face material slot indices; empty means single-material.
    pub material_ids: Vec<u32>,
}

/// Host-side shape of an object's data, before primitive detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceShape {
    Mesh,
    Curve,
    Surface,
    Font,
    Meta,
}

/// How a particle system's payload is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticleRender {
    /// Points or strands produced by the system itself.
    Native,
    /// Each particle places another object's geometry.
    Object(Name),
    /// Each particle places one object out of a collection.
    Collection(Vec<Name>),
}

/// Descriptor of one particle system attached to an object.
#[derive(Debug, Clone)]
pub struct ParticleDesc {
    pub system: Name,
    pub style: ParticleStyle,
    pub render_as: ParticleRender,
    /// Material slot override for the system, if any.
    pub material: Option<Name>,
    /// True when the system's payload changes over the frame range.
    pub animated: bool,
}

/// Descriptor of an object's instancing (dupli) setup.
#[derive(Debug, Clone, Default)]
pub struct DupliDesc {
    /// Objects whose data blocks are placed by this instancer.
    pub sources: Vec<Name>,
}

/// Descriptor of one geometric object.
#[derive(Debug, Clone)]
pub struct GeometryDesc {
    /// The shared data block name; None for data-less objects (empties).
    pub data: Option<Name>,
    /// How many objects reference the data block.
    pub data_users: u32,
    /// Per-object modifiers change the evaluated data, forcing a key unique
    /// to this object even when the block is shared.
    pub object_modified: bool,
    pub shape: SourceShape,
    /// Subdivision surface requested on the object.
    pub subdivision: bool,
    /// Fluid/smoke simulation domain: exported as a volume.
    pub fluid: bool,
    /// Explicit primitive override; None means detect from the shape.
    pub primitive_override: Option<DataKind>,
    pub deforming: bool,
    pub transforming: bool,
    /// Per-object motion segment override.
    pub motion_segments: Option<u32>,
    pub visible: bool,
    pub materials: Vec<Name>,
    pub particles: Vec<ParticleDesc>,
    pub dupli: Option<DupliDesc>,
    /// Back-reference to the parenting object, if any.
    pub parent: Option<Name>,
    /// Objects parented under this one.
    pub children: Vec<Name>,
}

/// Descriptor of a light.
#[derive(Debug, Clone, Default)]
pub struct LightDesc {
    /// Light filters linked to this light.
    pub filters: Vec<Name>,
}

/// Descriptor of a light filter.
#[derive(Debug, Clone, Default)]
pub struct FilterDesc {
    /// Lights this filter applies to.
    pub lights: Vec<Name>,
}

/// What kind of scene entity a descriptor describes.
#[derive(Debug, Clone)]
pub enum Payload {
    Geometry(GeometryDesc),
    Light(LightDesc),
    LightFilter(FilterDesc),
    Camera,
    /// Transform-only object; contributes nothing to the retained graph.
    Empty,
}

/// One entry of a scene snapshot.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub object: Name,
    pub payload: Payload,
    pub dirty: DirtyFlags,
    /// Entity is gone from the scene but still known to the host (pending
    /// removal); treated the same as absence.
    pub deleted: bool,
}

/// One placement produced by an instancer.
#[derive(Debug, Clone, Copy)]
pub struct DupliPlacement {
    pub source: Name,
    pub index: u32,
    pub matrix: Affine3A,
}

/// Read-only view of the host scene, polled once per synchronization pass.
///
/// Failures for individual entities must be tolerated by the caller as
/// "skip, log warning" rather than aborting the pass.
pub trait SceneSource {
    /// Flat snapshot of every exportable entity in its current state.
    fn snapshot(&self) -> Vec<EntityDescriptor>;

    /// World (or parent-local, for parented objects) transform of an object
    /// at a shutter-relative sample time. None if the object vanished.
    fn read_transform(&self, object: Name, time: f32) -> Option<Affine3A>;

    /// Geometry buffers for a data-block key at a sample time.
    fn read_geometry(&self, key: &EntityKey, time: f32) -> Result<GeometryPayload>;

    /// Placements currently generated by an instancing object.
    fn read_placements(&self, owner: Name) -> Vec<DupliPlacement>;
}

/// Injected capability answering "has this entity changed since version V".
///
/// Versions are monotonic per-entity counters maintained by the host; the
/// cache stamps the version at each successful export and treats an entity
/// as clean while its version has not advanced past the stamp.
pub trait DirtyOracle {
    fn is_dirty(&self, object: Name) -> bool;
    fn version(&self, object: Name) -> u64;
}
