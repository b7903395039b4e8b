//! Per-entity runtime over a compiled graph.
//!
//! Tick order:
//! 1. advance time along the active path, firing events crossed in `(prev, now]`
//! 2. evaluate transitions outermost level first, at most one per level
//! 3. resolve clip selections for newly entered leaves and emit weighted samples

use std::collections::HashMap as StdHashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::compiled::{CompiledGraph, CompiledKind, CompiledState, StateIndex};
use crate::condition::EvalContext;
use crate::config::EntryFallback;
use crate::error::InputError;
use crate::ids::{ClipHash, Uid};
use crate::inputs::{InputBuffer, InputType, InputValue};

/// Source of clip lengths, in seconds.
pub trait ClipLibrary {
    fn clip_length(&self, clip: ClipHash) -> Option<f32>;
}

impl<S: BuildHasher> ClipLibrary for StdHashMap<ClipHash, f32, S> {
    fn clip_length(&self, clip: ClipHash) -> Option<f32> {
        self.get(&clip).copied()
    }
}

impl<S: BuildHasher> ClipLibrary for HashMap<ClipHash, f32, S> {
    fn clip_length(&self, clip: ClipHash) -> Option<f32> {
        self.get(&clip).copied()
    }
}

/// Clips played for one pass through a leaf and the length of that pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipSelection {
    pub clips: Vec<ClipHash>,
    pub length: f32,
}

/// Chooses what a multi-clip leaf plays. Called when a leaf is entered and on every loop wrap.
pub trait ClipSelector: Send + fmt::Debug {
    fn select(&mut self, state: Uid, clips: &[ClipHash], library: &dyn ClipLibrary)
        -> ClipSelection;
}

/// Play every clip together; the pass lasts as long as the longest known clip.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lockstep;

impl ClipSelector for Lockstep {
    fn select(
        &mut self,
        _state: Uid,
        clips: &[ClipHash],
        library: &dyn ClipLibrary,
    ) -> ClipSelection {
        let length = clips
            .iter()
            .filter_map(|clip| library.clip_length(*clip))
            .fold(0.0f32, f32::max);
        ClipSelection {
            clips: clips.to_vec(),
            length,
        }
    }
}

/// Play one clip per pass, cycling through the leaf's clips.
#[derive(Clone, Debug, Default)]
pub struct RoundRobin {
    counters: HashMap<Uid, usize>,
}

impl ClipSelector for RoundRobin {
    fn select(
        &mut self,
        state: Uid,
        clips: &[ClipHash],
        library: &dyn ClipLibrary,
    ) -> ClipSelection {
        if clips.is_empty() {
            return ClipSelection::default();
        }
        let counter = self.counters.entry(state).or_insert(0);
        let clip = clips[*counter % clips.len()];
        *counter = counter.wrapping_add(1);
        ClipSelection {
            clips: vec![clip],
            length: library.clip_length(clip).unwrap_or(0.0),
        }
    }
}

/// One weighted leaf contribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafSample {
    pub state: Uid,
    pub clips: Vec<ClipHash>,
    pub time: f32,
    pub length: f32,
    pub weight: f32,
    /// Current value of the leaf's root-rotation input.
    pub root_rotation: Option<f32>,
}

/// A set-input event that fired this tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FiredEvent {
    pub state: Uid,
    pub time: f32,
    pub input: usize,
    pub value: InputValue,
}

/// Per-tick output, reused across ticks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TickOutput {
    pub leaves: Vec<LeafSample>,
    pub events: Vec<FiredEvent>,
}

impl TickOutput {
    pub fn clear(&mut self) {
        self.leaves.clear();
        self.events.clear();
    }
}

#[derive(Clone, Debug)]
struct Fade {
    cursor: Box<Cursor>,
    elapsed: f32,
    duration: f32,
}

#[derive(Clone, Debug)]
struct Cursor {
    state: StateIndex,
    time: f32,
    /// True until the first advance, so events at time 0 fire on entry.
    fresh: bool,
    selection: Option<ClipSelection>,
    active: Option<Box<Cursor>>,
    fading: Option<Fade>,
}

impl Cursor {
    fn new(state: StateIndex) -> Self {
        Self {
            state,
            time: 0.0,
            fresh: true,
            selection: None,
            active: None,
            fading: None,
        }
    }

    fn length(&self) -> f32 {
        self.selection.as_ref().map_or(0.0, |s| s.length)
    }
}

/// Build the cursor for entering `index`, following entry edges into nested machines.
fn enter(graph: &CompiledGraph, index: StateIndex, inputs: &[u8]) -> Cursor {
    let mut cursor = Cursor::new(index);
    if let CompiledKind::Machine { children, entries } = &graph.state(index).kind {
        let ctx = EvalContext::new(inputs);
        let target = entries
            .iter()
            .find(|entry| entry.condition.evaluate(&ctx))
            .map(|entry| entry.target)
            .or_else(|| match graph.entry_fallback() {
                EntryFallback::FirstChild => children.first().copied(),
                EntryFallback::Inactive => None,
            });
        cursor.active = target.map(|target| Box::new(enter(graph, target, inputs)));
    }
    cursor
}

struct Step<'a> {
    graph: &'a CompiledGraph,
    inputs: &'a mut InputBuffer,
    selector: &'a mut Box<dyn ClipSelector>,
    library: &'a dyn ClipLibrary,
    fired: &'a mut Vec<FiredEvent>,
}

impl<'a> Step<'a> {
    fn select(&mut self, state: &CompiledState) -> Option<ClipSelection> {
        match &state.kind {
            CompiledKind::Leaf { clips, .. } => {
                Some(self.selector.select(state.uid, clips, self.library))
            }
            CompiledKind::Machine { .. } => None,
        }
    }

    /// Fire the state's events whose time lies in `(from, to]` (or `[from, to]`).
    fn fire(&mut self, state: &CompiledState, from: f32, to: f32, include_from: bool) {
        for event in &state.events {
            let after_start = if include_from {
                event.time >= from
            } else {
                event.time > from
            };
            if after_start && event.time <= to {
                self.inputs.write(event.offset, event.ty, event.value);
                self.fired.push(FiredEvent {
                    state: state.uid,
                    time: event.time,
                    input: event.input,
                    value: event.value,
                });
            }
        }
    }

    /// `live` is false for fading states: they keep playing but fire nothing.
    fn advance(&mut self, cursor: &mut Cursor, dt: f32, live: bool) {
        let graph = self.graph;
        let state = graph.state(cursor.state);
        let prev = cursor.time;
        let mut now = prev + dt;
        match &state.kind {
            CompiledKind::Leaf { looped, .. } => {
                if cursor.selection.is_none() {
                    cursor.selection = self.select(state);
                }
                let length = cursor.length();
                if *looped && length > 0.0 && now >= length {
                    if live {
                        self.fire(state, prev, length, cursor.fresh);
                    }
                    now = now.rem_euclid(length);
                    cursor.selection = self.select(state);
                    if live {
                        self.fire(state, 0.0, now, true);
                    }
                } else {
                    if !*looped && length > 0.0 {
                        now = now.min(length);
                    }
                    if live {
                        self.fire(state, prev, now, cursor.fresh);
                    }
                }
            }
            CompiledKind::Machine { .. } => {
                if live {
                    self.fire(state, prev, now, cursor.fresh);
                }
                if let Some(active) = cursor.active.as_mut() {
                    self.advance(active, dt, live);
                }
                if let Some(fade) = cursor.fading.as_mut() {
                    self.advance(&mut fade.cursor, dt, false);
                    fade.elapsed += dt;
                    if fade.elapsed >= fade.duration {
                        cursor.fading = None;
                    }
                }
            }
        }
        cursor.time = now;
        cursor.fresh = false;
    }

    /// Evaluate the active child's transitions; descend only when this level did not switch.
    fn transitions(&mut self, cursor: &mut Cursor) {
        let graph = self.graph;
        let Some(active) = cursor.active.as_mut() else {
            return;
        };
        let source = graph.state(active.state);
        let ctx = EvalContext {
            inputs: self.inputs.as_bytes(),
            time: active.time,
            length: active.length(),
        };
        let Some(transition) = source
            .transitions
            .iter()
            .find(|transition| transition.condition.evaluate(&ctx))
        else {
            if !source.is_leaf() {
                self.transitions(active);
            }
            return;
        };
        log::trace!(
            "transition {}: {} -> {}",
            transition.edge,
            source.uid,
            graph.state(transition.target).uid
        );
        let entered = Box::new(enter(graph, transition.target, self.inputs.as_bytes()));
        let previous = std::mem::replace(active, entered);
        cursor.fading = (transition.blend_length > 0.0).then(|| Fade {
            cursor: previous,
            elapsed: 0.0,
            duration: transition.blend_length,
        });
    }

    /// Pick clips for every leaf on the active and fading paths that has none yet.
    fn resolve(&mut self, cursor: &mut Cursor) {
        let graph = self.graph;
        if cursor.selection.is_none() {
            cursor.selection = self.select(graph.state(cursor.state));
        }
        if let Some(active) = cursor.active.as_mut() {
            self.resolve(active);
        }
        if let Some(fade) = cursor.fading.as_mut() {
            self.resolve(&mut fade.cursor);
        }
    }
}

fn emit(
    graph: &CompiledGraph,
    cursor: &Cursor,
    weight: f32,
    inputs: &InputBuffer,
    out: &mut Vec<LeafSample>,
) {
    let state = graph.state(cursor.state);
    match &state.kind {
        CompiledKind::Leaf { root_rotation, .. } => out.push(LeafSample {
            state: state.uid,
            clips: cursor
                .selection
                .as_ref()
                .map(|s| s.clips.clone())
                .unwrap_or_default(),
            time: cursor.time,
            length: cursor.length(),
            weight,
            root_rotation: root_rotation
                .map(|offset| inputs.read(offset, InputType::Float).as_float()),
        }),
        CompiledKind::Machine { .. } => {
            let alpha = cursor.fading.as_ref().map_or(1.0, |fade| {
                (fade.elapsed / fade.duration).clamp(0.0, 1.0)
            });
            if let Some(active) = &cursor.active {
                emit(graph, active, weight * alpha, inputs, out);
            }
            if let Some(fade) = &cursor.fading {
                emit(graph, &fade.cursor, weight * (1.0 - alpha), inputs, out);
            }
        }
    }
}

/// One animated entity walking a shared [`CompiledGraph`].
#[derive(Debug)]
pub struct Instance {
    graph: Arc<CompiledGraph>,
    inputs: InputBuffer,
    root: Cursor,
    selector: Box<dyn ClipSelector>,
    output: TickOutput,
}

impl Instance {
    /// Enter the root with zeroed inputs, using [`Lockstep`] clip selection.
    pub fn new(graph: Arc<CompiledGraph>) -> Self {
        Self::with_selector(graph, Box::new(Lockstep))
    }

    pub fn with_selector(graph: Arc<CompiledGraph>, selector: Box<dyn ClipSelector>) -> Self {
        let inputs = InputBuffer::for_slots(graph.inputs());
        let root = enter(&graph, graph.root(), inputs.as_bytes());
        Self {
            graph,
            inputs,
            root,
            selector,
            output: TickOutput::default(),
        }
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    pub fn inputs(&self) -> &InputBuffer {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut InputBuffer {
        &mut self.inputs
    }

    pub fn set_input(&mut self, name: &str, value: InputValue) -> Result<(), InputError> {
        self.inputs.set(self.graph.inputs(), name, value)
    }

    pub fn get_input(&self, name: &str) -> Option<InputValue> {
        self.inputs.get(self.graph.inputs(), name)
    }

    /// Re-enter the root, re-evaluating entry edges against the current inputs.
    pub fn reset(&mut self) {
        self.root = enter(&self.graph, self.graph.root(), self.inputs.as_bytes());
        self.output.clear();
    }

    /// Switch to a recompiled graph. Input values are carried over by name and the root is
    /// re-entered.
    pub fn swap_graph(&mut self, graph: Arc<CompiledGraph>) {
        let mut inputs = InputBuffer::for_slots(graph.inputs());
        for slot in graph.inputs() {
            if let Some(value) = self.inputs.get(self.graph.inputs(), &slot.name) {
                inputs.write(slot.offset, slot.ty, value);
            }
        }
        self.inputs = inputs;
        self.graph = graph;
        self.reset();
    }

    /// Advance by `dt` seconds (negative values are treated as zero).
    pub fn tick(&mut self, dt: f32, clips: &dyn ClipLibrary) -> &TickOutput {
        let graph = Arc::clone(&self.graph);
        self.output.clear();
        let mut step = Step {
            graph: &graph,
            inputs: &mut self.inputs,
            selector: &mut self.selector,
            library: clips,
            fired: &mut self.output.events,
        };
        step.advance(&mut self.root, dt.max(0.0), true);
        step.transitions(&mut self.root);
        step.resolve(&mut self.root);
        emit(&graph, &self.root, 1.0, &self.inputs, &mut self.output.leaves);
        &self.output
    }

    /// Output of the last tick.
    pub fn output(&self) -> &TickOutput {
        &self.output
    }

    fn deepest(&self) -> &Cursor {
        let mut cursor = &self.root;
        while let Some(active) = &cursor.active {
            cursor = active.as_ref();
        }
        cursor
    }

    /// Innermost active state, or `None` when the root has no active child.
    pub fn current_node(&self) -> Option<Uid> {
        self.root.active.as_ref()?;
        Some(self.graph.state(self.deepest().state).uid)
    }

    /// Seconds spent in the innermost active state.
    pub fn time(&self) -> f32 {
        self.deepest().time
    }

    /// Clip length of the innermost active state (0 until its clips are resolved).
    pub fn length(&self) -> f32 {
        self.deepest().length()
    }

    /// UIDs from the root down to the innermost active state.
    pub fn active_path(&self) -> Vec<Uid> {
        let mut path = vec![self.graph.state(self.root.state).uid];
        let mut cursor = &self.root;
        while let Some(active) = &cursor.active {
            path.push(self.graph.state(active.state).uid);
            cursor = active.as_ref();
        }
        path
    }
}
