//! Vizij State Machine Core (engine-agnostic)
//!
//! Hierarchical animation state machines: an authoring graph of states, nested machines and
//! conditioned transitions, a compiler that binds condition text to input-buffer offsets, a
//! versioned binary format with UID cross references, and a per-instance runtime that walks the
//! compiled graph once per tick.
//!
//! Typical flow:
//! 1. Build a [`Controller`] (interactively, from a [`ControllerDocument`], or by
//!    [`Controller::deserialize`]).
//! 2. Call [`Controller::compile`] to obtain an `Arc<CompiledGraph>`.
//! 3. Create one [`Instance`] per animated entity and call [`Instance::tick`] every frame.

pub mod blob;
pub mod compiled;
pub mod condition;
pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod inputs;
pub mod runtime;

// Re-exports for consumers (adapters)
pub use compiled::{
    CompiledEntry, CompiledEvent, CompiledGraph, CompiledKind, CompiledState, CompiledTransition,
    StateIndex,
};
pub use condition::{Condition, EvalContext, Program};
pub use config::{Config, EntryFallback};
pub use controller::{Controller, FORMAT_MAGIC, FORMAT_REVISION};
pub use document::{
    ControllerDocument, EntryDocument, EventDocument, InputDocument, MachineDocument, StateDocument,
    TransitionDocument,
};
pub use error::{ConditionError, DocumentError, EventError, GraphError, InputError, LoadError};
pub use events::{EventHeader, EventKind, EventTrack, SetInputEvent, EVENT_HEADER_SIZE};
pub use graph::{
    AnimationNode, Component, ComponentKind, ComponentType, Edge, EntryEdge, EntryNode, Node,
    StateMachine, Vec2,
};
pub use ids::{clip_hash, ClipHash, Uid, UidAllocator};
pub use inputs::{InputBuffer, InputDecl, InputSlot, InputType, InputValue};
pub use runtime::{
    ClipLibrary, ClipSelection, ClipSelector, FiredEvent, Instance, LeafSample, Lockstep,
    RoundRobin, TickOutput,
};
