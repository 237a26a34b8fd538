//! Render-client command channel.
//!
//! A render monitor (or any other client) runs on its own thread and only
//! ever enqueues requests; it never touches the scene cache. The
//! synchronizer drains the queue at the start of its next pass, so commands
//! are applied in the order they were observed and never interleave with an
//! in-flight pass.

use serde::{Deserialize, Serialize};

/// A request enqueued by a render client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderCommand {
    /// Signal the in-flight render to stop before the next pass mutates
    /// the retained graph.
    StopRender,
    /// Restrict rendering to a normalized sub-window.
    CropWindow { min: [f32; 2], max: [f32; 2] },
    /// Select the object behind a pick id.
    SelectObject { id: u32 },
}

/// Cloneable producer half, handed to listener threads.
#[derive(Debug, Clone)]
pub struct CommandClient {
    tx: flume::Sender<RenderCommand>,
}

impl CommandClient {
    /// Enqueues a command; returns false when the synchronizer side is
    /// gone.
    pub fn send(&self, command: RenderCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// Single-consumer queue owned by the synchronizer.
#[derive(Debug)]
pub struct CommandQueue {
    tx: flume::Sender<RenderCommand>,
    rx: flume::Receiver<RenderCommand>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// A new producer handle for a client thread.
    #[must_use]
    pub fn client(&self) -> CommandClient {
        CommandClient { tx: self.tx.clone() }
    }

    /// Takes every pending command, in arrival order, without blocking.
    pub fn drain(&self) -> Vec<RenderCommand> {
        self.rx.try_iter().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
