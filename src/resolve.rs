//! Entity identity resolution.
//!
//! Pure functions computing the stable [`EntityKey`] for a source entity
//! from its descriptor alone — no cache state, no side effects. The same
//! descriptor always resolves to the same key; any state difference that
//! changes the retained-graph shape changes the key.

use crate::errors::{Result, SyncError};
use crate::interner::{self, Name};
use crate::key::{DataKind, EntityKey};
use crate::source::{GeometryDesc, ParticleDesc, SourceShape};

/// Determines the retained primitive kind for a geometry descriptor.
///
/// An explicit override wins; otherwise the kind follows the source shape,
/// with subdivision and fluid state refining meshes.
#[must_use]
pub fn detect_primitive(desc: &GeometryDesc) -> DataKind {
    if let Some(kind) = desc.primitive_override {
        return kind;
    }
    match desc.shape {
        SourceShape::Mesh if desc.fluid => DataKind::Volume,
        SourceShape::Mesh if desc.subdivision => DataKind::Subdivision,
        SourceShape::Mesh | SourceShape::Surface | SourceShape::Font => DataKind::Mesh,
        SourceShape::Curve => DataKind::Curves,
        SourceShape::Meta => DataKind::Meta,
    }
}

/// Resolves the data-block key for a geometric object.
///
/// Sharing: a data block referenced by several objects resolves to one key
/// based on the block's own name, so all placements reuse one retained
/// node. Per-object modifiers (or an explicit primitive override, or a
/// motion-segment override on a deforming object) evaluate the shared block
/// differently per object, so the key is made unique by prepending the
/// object's identity.
///
/// Metaball families collapse to the family base name (the part before the
/// first '.'), since all family elements produce a single surface. Fluid
/// domains key by the object name with a volume discriminator to avoid
/// colliding with the static-mesh key for the same object.
pub fn resolve_data(object: Name, desc: &GeometryDesc) -> Result<EntityKey> {
    let kind = detect_primitive(desc);

    if kind == DataKind::Volume {
        return Ok(EntityKey::Data { name: object, kind });
    }

    let Some(data) = desc.data else {
        return Err(SyncError::Resolution {
            entity: interner::resolve(object).to_owned(),
            reason: "geometric object has no data block",
        });
    };

    if kind == DataKind::Meta {
        let family = interner::resolve(data)
            .split('.')
            .next()
            .unwrap_or_default();
        return Ok(EntityKey::Data { name: interner::name(family), kind });
    }

    let forces_unique = desc.object_modified
        || desc.primitive_override.is_some()
        || (desc.motion_segments.is_some() && desc.deforming);
    if desc.data_users > 1 && forces_unique {
        Ok(EntityKey::ObjectData { object, data, kind })
    } else {
        Ok(EntityKey::Data { name: data, kind })
    }
}

/// Resolves the key for a particle system on an object.
#[must_use]
pub fn resolve_particles(object: Name, desc: &ParticleDesc) -> EntityKey {
    EntityKey::Particles {
        object,
        system: desc.system,
        style: desc.style,
    }
}

/// Resolves the key for an object's dupli group.
#[must_use]
pub fn resolve_dupli(owner: Name) -> EntityKey {
    EntityKey::Dupli { owner }
}

/// Resolves the placement key wrapping `data_key` under `object`.
///
/// Placements inherit the data-block name so two objects sharing one block
/// get distinct placement keys around the same data key.
pub fn resolve_placement(object: Name, data_key: &EntityKey) -> Result<EntityKey> {
    match data_key.data_name() {
        Some(data) => Ok(EntityKey::Placement { object, data }),
        None => Err(SyncError::Resolution {
            entity: interner::resolve(object).to_owned(),
            reason: "placement requires a data-block key",
        }),
    }
}
