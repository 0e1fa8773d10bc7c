use quarry_core::Value;
use serde_json::Map;

use std::sync::{Mutex, PoisonError};

/// Index of a frame in a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(usize);

/// Variable bindings visible while evaluating a plan.
///
/// Frames are append-only: binding a name pushes a new frame pointing at its
/// parent, and a lookup walks the parent chain. Concurrent branches of a plan
/// share the arena but only ever see their own chain.
#[derive(Debug)]
pub struct Scope {
    frames: Mutex<Vec<Frame>>,
}

#[derive(Debug)]
struct Frame {
    parent: Option<FrameId>,
    bindings: Map<String, Value>,
}

impl Scope {
    /// The frame holding the bindings the scope was created with.
    pub const ROOT: FrameId = FrameId(0);

    pub fn new(root: Map<String, Value>) -> Scope {
        Scope {
            frames: Mutex::new(vec![Frame {
                parent: None,
                bindings: root,
            }]),
        }
    }

    /// Pushes a frame binding `name` on top of `parent`.
    pub fn bind(&self, parent: FrameId, name: impl Into<String>, value: Value) -> FrameId {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let mut bindings = Map::with_capacity(1);
        bindings.insert(name.into(), value);
        frames.push(Frame {
            parent: Some(parent),
            bindings,
        });
        FrameId(frames.len() - 1)
    }

    /// Looks `name` up starting at `frame`. Inner frames shadow outer ones.
    pub fn get(&self, frame: FrameId, name: &str) -> Option<Value> {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let mut current = Some(frame);

        while let Some(FrameId(index)) = current {
            let frame = frames.get(index)?;
            if let Some(value) = frame.bindings.get(name) {
                return Some(value.clone());
            }
            current = frame.parent;
        }

        None
    }
}
