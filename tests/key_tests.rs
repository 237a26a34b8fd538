//! Entity Identity Tests
//!
//! Tests for:
//! - resolve: determinism, sharing, uniqueness discriminators
//! - Edge cases: metaball families, fluid volumes, primitive overrides
//! - EntityKey: canonical display strings, tier and sort ordering

mod common;

use common::mesh_desc;
use scenelink::interner;
use scenelink::key::{DataKind, EntityKey, ExportTier, ParticleStyle};
use scenelink::resolve::{detect_primitive, resolve_data, resolve_dupli, resolve_placement};
use scenelink::source::{ParticleDesc, ParticleRender, SourceShape};

// ============================================================================
// Determinism & Sharing
// ============================================================================

#[test]
fn resolve_is_deterministic() {
    let object = interner::name("Cube");
    let desc = mesh_desc("CubeData");
    let a = resolve_data(object, &desc).unwrap();
    let b = resolve_data(object, &desc).unwrap();
    assert_eq!(a, b);
}

#[test]
fn shared_data_resolves_to_one_key() {
    let desc = {
        let mut d = mesh_desc("SharedMesh");
        d.data_users = 2;
        d
    };
    let a = resolve_data(interner::name("A"), &desc).unwrap();
    let b = resolve_data(interner::name("B"), &desc).unwrap();
    assert_eq!(a, b, "instances of one data block must share a key");
}

#[test]
fn modifier_forces_per_object_key() {
    let mut desc = mesh_desc("SharedMesh");
    desc.data_users = 2;
    desc.object_modified = true;
    let a = resolve_data(interner::name("A"), &desc).unwrap();
    let b = resolve_data(interner::name("B"), &desc).unwrap();
    assert_ne!(a, b, "per-object modifiers must split the shared key");
    assert!(matches!(a, EntityKey::ObjectData { .. }));
}

#[test]
fn single_user_keys_by_data_name() {
    let desc = mesh_desc("Solo");
    let key = resolve_data(interner::name("Obj"), &desc).unwrap();
    assert_eq!(key.to_string(), "Solo-MESH");
}

// ============================================================================
// Discriminators
// ============================================================================

#[test]
fn primitive_kind_participates_in_key() {
    let mesh = mesh_desc("Box");
    let subdiv = {
        let mut d = mesh_desc("Box");
        d.subdivision = true;
        d
    };
    let object = interner::name("Box");
    let a = resolve_data(object, &mesh).unwrap();
    let b = resolve_data(object, &subdiv).unwrap();
    assert_ne!(a, b, "switching primitive kind must change the key");
}

#[test]
fn fluid_keys_by_object_with_volume_suffix() {
    let mut desc = mesh_desc("DomainMesh");
    desc.fluid = true;
    let key = resolve_data(interner::name("Domain"), &desc).unwrap();
    assert_eq!(key.to_string(), "Domain-VOLUME");

    // must not collide with the static-mesh key of the same object
    let plain = resolve_data(interner::name("Domain"), &mesh_desc("DomainMesh")).unwrap();
    assert_ne!(key, plain);
}

#[test]
fn metaball_family_collapses_to_base_name() {
    let mut a = mesh_desc("Ball.001");
    a.shape = SourceShape::Meta;
    let mut b = mesh_desc("Ball.002");
    b.shape = SourceShape::Meta;

    let ka = resolve_data(interner::name("BallA"), &a).unwrap();
    let kb = resolve_data(interner::name("BallB"), &b).unwrap();
    assert_eq!(ka, kb, "family elements share one surface");
    assert_eq!(ka.to_string(), "Ball");
}

#[test]
fn explicit_override_wins_over_shape() {
    let mut desc = mesh_desc("Pts");
    desc.primitive_override = Some(DataKind::Points);
    assert_eq!(detect_primitive(&desc), DataKind::Points);
}

#[test]
fn missing_data_block_is_a_resolution_error() {
    let mut desc = mesh_desc("X");
    desc.data = None;
    assert!(resolve_data(interner::name("Empty"), &desc).is_err());
}

// ============================================================================
// Display & Ordering
// ============================================================================

#[test]
fn canonical_handle_strings() {
    let o = interner::name("Emitter");
    let s = interner::name("Spray");
    let psys = ParticleDesc {
        system: s,
        style: ParticleStyle::Emitter,
        render_as: ParticleRender::Native,
        material: None,
        animated: false,
    };
    let key = scenelink::resolve::resolve_particles(o, &psys);
    assert_eq!(key.to_string(), "Emitter.Spray-EMITTER");

    assert_eq!(resolve_dupli(interner::name("Grass")).to_string(), "Grass-DUPLI");
    assert_eq!(
        EntityKey::Material { name: interner::name("red") }.to_string(),
        "material.red"
    );
    assert_eq!(
        EntityKey::CoordSys { filter: interner::name("Blocker") }.to_string(),
        "Blocker_coordsys"
    );
    assert_eq!(
        EntityKey::DupliInstance {
            owner: interner::name("Grass"),
            source: interner::name("Blade"),
            index: 3,
        }
        .to_string(),
        "Grass.DUPLI.Blade.3"
    );
    assert_eq!(EntityKey::Camera.to_string(), "camera");
}

#[test]
fn placement_key_wraps_data_name() {
    let data = resolve_data(interner::name("A"), &mesh_desc("Box")).unwrap();
    let placement = resolve_placement(interner::name("A"), &data).unwrap();
    assert_eq!(placement.to_string(), "A.Box");
}

#[test]
fn tiers_order_geometry_before_particles_before_duplis() {
    assert!(ExportTier::Geometry < ExportTier::Particles);
    assert!(ExportTier::Particles < ExportTier::Duplis);

    let mesh = resolve_data(interner::name("O"), &mesh_desc("M")).unwrap();
    let psys = EntityKey::Particles {
        object: interner::name("O"),
        system: interner::name("P"),
        style: ParticleStyle::Hair,
    };
    let dupli = resolve_dupli(interner::name("O"));
    assert_eq!(mesh.tier(), ExportTier::Geometry);
    assert_eq!(psys.tier(), ExportTier::Particles);
    assert_eq!(dupli.tier(), ExportTier::Duplis);
}

#[test]
fn sort_key_puts_data_before_instances() {
    let data = resolve_data(interner::name("A"), &mesh_desc("Box")).unwrap();
    let instance = EntityKey::Instance { object: interner::name("A") };
    assert!(data.sort_key() < instance.sort_key());
}
