//! Entity identity keys.
//!
//! Every exportable unit of the source scene — a shared data block, one
//! placement of it, a particle system, a dupli instance, a material, a light
//! — is identified by an [`EntityKey`]. The key is the cache key everywhere:
//! identical scene content always yields the same key across frames, and any
//! content change that requires a different retained shape (primitive kind
//! switch, per-object modifier, volume conversion) yields a different key.
//!
//! Keys are small `Copy` values built from interned [`Name`] symbols, so
//! they hash and compare as integers. The [`Display`] impl renders the
//! canonical handle string used for sink node names and log lines.

use std::fmt;

use crate::interner::{self, Name};

/// Geometric payload discriminator.
///
/// Participates in data-block keys so that switching an object's primitive
/// kind (e.g. polygon mesh to subdivision surface) produces a distinct key
/// and therefore a rebuilt retained node rather than an in-place edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    Mesh,
    Subdivision,
    Points,
    Curves,
    Quadric,
    Volume,
    Meta,
    Procedural,
}

impl DataKind {
    /// Canonical handle suffix for this kind.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            DataKind::Mesh => "-MESH",
            DataKind::Subdivision => "-SUBDIV",
            DataKind::Points => "-POINTS",
            DataKind::Curves => "-CURVES",
            DataKind::Quadric => "-QUADRIC",
            DataKind::Volume => "-VOLUME",
            DataKind::Meta => "",
            DataKind::Procedural => "-PROC",
        }
    }
}

/// How a particle system renders its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParticleStyle {
    /// Point emitter, exported as a points node.
    Emitter,
    /// Hair/strands, exported as a curves node.
    Hair,
}

impl ParticleStyle {
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            ParticleStyle::Emitter => "-EMITTER",
            ParticleStyle::Hair => "-HAIR",
        }
    }
}

/// Export ordering tier within one synchronization pass.
///
/// Geometry must be resolved and exported before particle systems that
/// attach to it as children, which in turn precede dupli/instance groups
/// that may reference either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportTier {
    Geometry = 0,
    Particles = 1,
    Duplis = 2,
}

/// A stable, deterministic identity for one exportable scene entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// The render camera (singleton).
    Camera,
    /// A shared data block keyed by its own name (mesh instancing: many
    /// placements, one key).
    Data { name: Name, kind: DataKind },
    /// A data block made unique by per-object modifiers; keyed by both the
    /// owning object and the data name.
    ObjectData { object: Name, data: Name, kind: DataKind },
    /// A particle system on an object.
    Particles { object: Name, system: Name, style: ParticleStyle },
    /// The dupli group emitted by an instancing object.
    Dupli { owner: Name },
    /// One placement generated by a dupli group.
    DupliInstance { owner: Name, source: Name, index: u32 },
    /// The per-object instance group (attributes, material binding).
    Instance { object: Name },
    /// The transform group placing a data block under an instance.
    Placement { object: Name, data: Name },
    /// A material node.
    Material { name: Name },
    /// A light node.
    Light { name: Name },
    /// A light filter node.
    LightFilter { name: Name },
    /// The coordinate-system group a light filter is anchored to.
    CoordSys { filter: Name },
}

impl EntityKey {
    /// The pass tier this entity exports in.
    #[must_use]
    pub fn tier(&self) -> ExportTier {
        match self {
            EntityKey::Particles { .. } => ExportTier::Particles,
            EntityKey::Dupli { .. } | EntityKey::DupliInstance { .. } => ExportTier::Duplis,
            _ => ExportTier::Geometry,
        }
    }

    /// The object this key is derived from, if any. Used for cleanup of
    /// derived entities when their owner leaves the scene.
    #[must_use]
    pub fn owner(&self) -> Option<Name> {
        match self {
            EntityKey::ObjectData { object, .. }
            | EntityKey::Particles { object, .. }
            | EntityKey::Instance { object }
            | EntityKey::Placement { object, .. } => Some(*object),
            EntityKey::Dupli { owner } | EntityKey::DupliInstance { owner, .. } => Some(*owner),
            _ => None,
        }
    }

    /// The data-block name carried by this key, if any.
    #[must_use]
    pub fn data_name(&self) -> Option<Name> {
        match self {
            EntityKey::Data { name, .. } => Some(*name),
            EntityKey::ObjectData { data, .. } | EntityKey::Placement { data, .. } => Some(*data),
            _ => None,
        }
    }

    /// True for keys that only ever exist as derivatives of another entity
    /// (placements, dupli placements, coordinate systems). These are never
    /// planned directly; they are built and torn down with their owner.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            EntityKey::Placement { .. } | EntityKey::DupliInstance { .. } | EntityKey::CoordSys { .. }
        )
    }

    /// Deterministic ordering key: tier first, then the canonical handle
    /// string. Data blocks sort ahead of the instances that place them.
    #[must_use]
    pub fn sort_key(&self) -> (ExportTier, u8, String) {
        let rank = match self {
            EntityKey::Material { .. } => 0,
            EntityKey::Data { .. } | EntityKey::ObjectData { .. } => 1,
            EntityKey::Instance { .. } | EntityKey::Placement { .. } => 2,
            _ => 3,
        };
        (self.tier(), rank, self.to_string())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Camera => write!(f, "camera"),
            EntityKey::Data { name, kind } => {
                write!(f, "{}{}", interner::resolve(*name), kind.suffix())
            }
            EntityKey::ObjectData { object, data, kind } => write!(
                f,
                "{}.{}{}",
                interner::resolve(*object),
                interner::resolve(*data),
                kind.suffix()
            ),
            EntityKey::Particles { object, system, style } => write!(
                f,
                "{}.{}{}",
                interner::resolve(*object),
                interner::resolve(*system),
                style.suffix()
            ),
            EntityKey::Dupli { owner } => write!(f, "{}-DUPLI", interner::resolve(*owner)),
            EntityKey::DupliInstance { owner, source, index } => write!(
                f,
                "{}.DUPLI.{}.{}",
                interner::resolve(*owner),
                interner::resolve(*source),
                index
            ),
            EntityKey::Instance { object } => write!(f, "{}", interner::resolve(*object)),
            EntityKey::Placement { object, data } => {
                write!(f, "{}.{}", interner::resolve(*object), interner::resolve(*data))
            }
            EntityKey::Material { name } => write!(f, "material.{}", interner::resolve(*name)),
            EntityKey::Light { name } | EntityKey::LightFilter { name } => {
                write!(f, "{}", interner::resolve(*name))
            }
            EntityKey::CoordSys { filter } => {
                write!(f, "{}_coordsys", interner::resolve(*filter))
            }
        }
    }
}
