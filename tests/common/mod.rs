//! Shared test fixtures: an in-memory scene source with a scriptable
//! dirty oracle.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use glam::{Affine3A, Vec3};

use scenelink::errors::Result;
use scenelink::interner::{self, Name};
use scenelink::key::EntityKey;
use scenelink::source::{
    DirtyFlags, DirtyOracle, DupliPlacement, EntityDescriptor, FilterDesc, GeometryCounts,
    GeometryPayload, GeometryDesc, LightDesc, Payload, SceneSource, SourceShape,
};

/// Default geometry descriptor for a static single-material mesh.
pub fn mesh_desc(data: &str) -> GeometryDesc {
    GeometryDesc {
        data: Some(interner::name(data)),
        data_users: 1,
        object_modified: false,
        shape: SourceShape::Mesh,
        subdivision: false,
        fluid: false,
        primitive_override: None,
        deforming: false,
        transforming: false,
        motion_segments: None,
        visible: true,
        materials: Vec::new(),
        particles: Vec::new(),
        dupli: None,
        parent: None,
        children: Vec::new(),
    }
}

/// Small box payload, good enough for any define call.
pub fn box_payload() -> GeometryPayload {
    GeometryPayload {
        counts: GeometryCounts { faces: 6, points: 8, vertices: 24 },
        primvars: vec![],
        material_ids: vec![],
    }
}

/// Scriptable scene source + dirty oracle.
#[derive(Default)]
pub struct FakeScene {
    pub entities: Vec<EntityDescriptor>,
    pub transforms: HashMap<Name, Affine3A>,
    pub geometry: HashMap<String, GeometryPayload>,
    pub placements: HashMap<Name, Vec<DupliPlacement>>,
    pub dirty: HashSet<Name>,
    pub versions: HashMap<Name, u64>,
}

impl FakeScene {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, object: Name, payload: Payload) {
        self.entities.push(EntityDescriptor {
            object,
            payload,
            dirty: DirtyFlags::empty(),
            deleted: false,
        });
    }

    pub fn add_camera(&mut self, name: &str) -> Name {
        let object = interner::name(name);
        self.push(object, Payload::Camera);
        object
    }

    pub fn add_mesh(&mut self, object: &str, data: &str) -> Name {
        self.add_mesh_with(object, data, |_| {})
    }

    pub fn add_mesh_with(
        &mut self,
        object: &str,
        data: &str,
        tweak: impl FnOnce(&mut GeometryDesc),
    ) -> Name {
        let name = interner::name(object);
        let mut desc = mesh_desc(data);
        tweak(&mut desc);
        self.push(name, Payload::Geometry(desc));
        name
    }

    pub fn add_light(&mut self, name: &str, filters: &[&str]) -> Name {
        let object = interner::name(name);
        self.push(
            object,
            Payload::Light(LightDesc {
                filters: filters.iter().map(|f| interner::name(f)).collect(),
            }),
        );
        object
    }

    pub fn add_filter(&mut self, name: &str, lights: &[&str]) -> Name {
        let object = interner::name(name);
        self.push(
            object,
            Payload::LightFilter(FilterDesc {
                lights: lights.iter().map(|l| interner::name(l)).collect(),
            }),
        );
        object
    }

    /// Removes the entity from subsequent snapshots.
    pub fn remove(&mut self, object: &str) {
        let name = interner::name(object);
        self.entities.retain(|d| d.object != name);
    }

    /// Replaces the geometry descriptor of an existing object.
    pub fn replace_mesh(&mut self, object: &str, desc: GeometryDesc) {
        let name = interner::name(object);
        for entity in &mut self.entities {
            if entity.object == name {
                entity.payload = Payload::Geometry(desc);
                return;
            }
        }
        panic!("no such object: {object}");
    }

    /// Marks an entity changed: dirty flag plus a version bump.
    pub fn touch(&mut self, object: &str) {
        let name = interner::name(object);
        self.dirty.insert(name);
        *self.versions.entry(name).or_insert(1) += 1;
    }

    pub fn set_transform(&mut self, object: &str, translation: Vec3) {
        self.transforms
            .insert(interner::name(object), Affine3A::from_translation(translation));
    }

    pub fn set_placements(&mut self, owner: &str, placements: Vec<DupliPlacement>) {
        self.placements.insert(interner::name(owner), placements);
    }

    fn knows(&self, object: Name) -> bool {
        self.entities.iter().any(|d| d.object == object)
    }
}

impl SceneSource for FakeScene {
    fn snapshot(&self) -> Vec<EntityDescriptor> {
        self.entities.clone()
    }

    fn read_transform(&self, object: Name, _time: f32) -> Option<Affine3A> {
        if let Some(matrix) = self.transforms.get(&object) {
            return Some(*matrix);
        }
        self.knows(object).then_some(Affine3A::IDENTITY)
    }

    fn read_geometry(&self, key: &EntityKey, _time: f32) -> Result<GeometryPayload> {
        Ok(self
            .geometry
            .get(&key.to_string())
            .cloned()
            .unwrap_or_else(box_payload))
    }

    fn read_placements(&self, owner: Name) -> Vec<DupliPlacement> {
        self.placements.get(&owner).cloned().unwrap_or_default()
    }
}

impl DirtyOracle for FakeScene {
    fn is_dirty(&self, object: Name) -> bool {
        self.dirty.contains(&object)
    }

    fn version(&self, object: Name) -> u64 {
        self.versions.get(&object).copied().unwrap_or(1)
    }
}
