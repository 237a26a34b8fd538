//! Retained scene-graph sink boundary.
//!
//! The renderer-resident scene graph is opaque to the synchronizer: it only
//! ever holds [`NodeHandle`] values and mutates nodes through the
//! [`SceneSink`] trait. All mutation must happen between `edit_begin` and
//! `edit_end`; the edit-session manager enforces that discipline on the
//! synchronizer side, and sinks are free to assert it on theirs.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::errors::Result;
use crate::source::{GeometryCounts, TransformSample};

new_key_type! {
    /// Opaque reference to one retained scene-graph node.
    pub struct NodeHandle;
}

/// The retained shape of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Mesh,
    Points,
    Curves,
    Procedural,
    Group,
    Light,
    LightFilter,
    Material,
    Camera,
}

/// A tagged parameter value.
///
/// Closed set of value shapes the sink understands; semantic property names
/// map to these explicitly instead of introspecting arbitrary host objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Float(f32),
    Int(i32),
    Color([f32; 3]),
    String(String),
    FloatArray(Vec<f32>),
    IntArray(Vec<i32>),
}

/// Mutation interface of the retained scene graph.
///
/// Handles are created by the sink and owned by the scene cache until
/// explicitly deleted. `define` may reject malformed geometry; the caller
/// treats that as an entity-level failure and leaves any previous cache
/// entry untouched.
pub trait SceneSink {
    /// The designated root group every visible subtree must reach.
    fn root(&self) -> NodeHandle;

    /// Creates a detached node. Attachment happens separately via
    /// [`add_child`](Self::add_child).
    fn create_node(&mut self, kind: NodeKind, name: &str) -> NodeHandle;

    /// Declares topology counts for a geometric node.
    fn define(&mut self, node: NodeHandle, counts: GeometryCounts) -> Result<()>;

    /// Opens an edit scope. Mutations outside an open scope are a
    /// programming error.
    fn edit_begin(&mut self) -> Result<()>;

    /// Commits the open edit scope.
    fn edit_end(&mut self) -> Result<()>;

    fn set_transform(&mut self, node: NodeHandle, samples: &[TransformSample]);

    fn set_material(&mut self, node: NodeHandle, material: NodeHandle);

    fn set_property(&mut self, node: NodeHandle, name: &str, value: PropertyValue);

    /// Scene-level option (crop window, quality settings, ...).
    fn set_option(&mut self, name: &str, value: PropertyValue);

    fn set_hidden(&mut self, node: NodeHandle, hidden: bool);

    fn add_child(&mut self, parent: NodeHandle, child: NodeHandle);

    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle);

    /// Disposes a node. The caller must have detached it from every parent
    /// first; the sink is not required to scrub dangling references.
    fn delete_node(&mut self, node: NodeHandle);
}
