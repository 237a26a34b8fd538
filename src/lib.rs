#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod cache;
pub mod collect;
pub mod commands;
pub mod dag;
pub mod detect;
pub mod errors;
pub mod interner;
pub mod key;
pub mod memory;
pub mod resolve;
pub mod session;
pub mod settings;
pub mod sink;
pub mod source;
pub mod sync;

pub use cache::{CacheEntry, SceneCache};
pub use collect::{Collected, DataBlock, Instance};
pub use commands::{CommandClient, CommandQueue, RenderCommand};
pub use detect::SyncPlan;
pub use errors::{Result, SyncError};
pub use interner::Name;
pub use key::{DataKind, EntityKey, ExportTier, ParticleStyle};
pub use memory::MemorySink;
pub use session::{EditSession, SessionState};
pub use settings::SyncOptions;
pub use sink::{NodeHandle, NodeKind, PropertyValue, SceneSink};
pub use source::{
    DirtyFlags, DirtyOracle, EntityDescriptor, GeometryCounts, GeometryPayload, SceneSource,
    TransformSample,
};
pub use sync::{EditRequest, PassReport, Synchronizer};
