//! Immutable runtime representation produced by [`Controller::compile`].
//!
//! The authoring tree is flattened into a vector of states addressed by [`StateIndex`]; every
//! name, UID and slot reference the runtime needs has already been resolved.

use crate::condition::Program;
use crate::config::EntryFallback;
use crate::events::EventTrack;
use crate::graph::ComponentKind;
use crate::ids::{ClipHash, Uid};
use crate::inputs::{InputSlot, InputType, InputValue};
use crate::Controller;

/// Position of a state in [`CompiledGraph::states`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateIndex(pub u32);

impl StateIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledTransition {
    pub edge: Uid,
    pub target: StateIndex,
    pub condition: Program,
    pub blend_length: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledEntry {
    pub target: StateIndex,
    pub condition: Program,
}

/// A set-input event bound to its buffer slot.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledEvent {
    pub time: f32,
    pub input: usize,
    pub offset: u32,
    pub ty: InputType,
    pub value: InputValue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CompiledKind {
    Leaf {
        clips: Vec<ClipHash>,
        looped: bool,
        /// Byte offset of the float input driving root rotation.
        root_rotation: Option<u32>,
    },
    Machine {
        /// Child states in creation order.
        children: Vec<StateIndex>,
        entries: Vec<CompiledEntry>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledState {
    pub uid: Uid,
    pub name: String,
    pub kind: CompiledKind,
    /// Outgoing transitions in edge creation order.
    pub transitions: Vec<CompiledTransition>,
    /// Sorted by time.
    pub events: Vec<CompiledEvent>,
}

impl CompiledState {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, CompiledKind::Leaf { .. })
    }
}

/// Flattened, immutable graph shared by every instance through an `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledGraph {
    revision: u64,
    inputs: Vec<InputSlot>,
    states: Vec<CompiledState>,
    root: StateIndex,
    entry_fallback: EntryFallback,
}

impl CompiledGraph {
    /// Controller edit revision this graph was compiled from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    /// Size in bytes of an input buffer for this graph.
    pub fn input_size(&self) -> usize {
        self.inputs.iter().map(|slot| slot.ty.size()).sum()
    }

    pub fn states(&self) -> &[CompiledState] {
        &self.states
    }

    #[inline]
    pub fn state(&self, index: StateIndex) -> &CompiledState {
        &self.states[index.index()]
    }

    pub fn root(&self) -> StateIndex {
        self.root
    }

    pub fn entry_fallback(&self) -> EntryFallback {
        self.entry_fallback
    }

    pub fn find(&self, uid: Uid) -> Option<StateIndex> {
        self.states
            .iter()
            .position(|state| state.uid == uid)
            .map(|i| StateIndex(i as u32))
    }

    /// Flatten the controller's authoring tree. Conditions must already be compiled.
    pub(crate) fn flatten(controller: &Controller) -> CompiledGraph {
        let mut builder = Builder {
            controller,
            states: Vec::new(),
        };
        let root = builder.machine(Uid::ROOT);
        CompiledGraph {
            revision: controller.revision(),
            inputs: controller.inputs().slots().to_vec(),
            states: builder.states,
            root,
            entry_fallback: controller.config().entry_fallback,
        }
    }
}

struct Builder<'a> {
    controller: &'a Controller,
    states: Vec<CompiledState>,
}

impl<'a> Builder<'a> {
    fn reserve(&mut self, uid: Uid, name: &str, events: &EventTrack) -> StateIndex {
        let index = StateIndex(self.states.len() as u32);
        self.states.push(CompiledState {
            uid,
            name: name.to_string(),
            kind: CompiledKind::Leaf {
                clips: Vec::new(),
                looped: false,
                root_rotation: None,
            },
            transitions: Vec::new(),
            events: self.events(uid, events),
        });
        index
    }

    fn events(&self, uid: Uid, track: &EventTrack) -> Vec<CompiledEvent> {
        let inputs = self.controller.inputs();
        let mut events: Vec<CompiledEvent> = track
            .set_inputs()
            .filter_map(|(time, event)| {
                let Some(slot) = event.input_index().and_then(|i| inputs.get(i)) else {
                    log::warn!("state {uid}: dropping set-input event at {time}s with no input");
                    return None;
                };
                Some(CompiledEvent {
                    time,
                    input: event.input as usize,
                    offset: slot.offset,
                    ty: slot.ty,
                    value: event.value(slot.ty),
                })
            })
            .collect();
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        events
    }

    fn machine(&mut self, uid: Uid) -> StateIndex {
        let controller = self.controller;
        let Some(machine) = controller
            .component(uid)
            .and_then(|component| component.as_machine())
        else {
            return self.reserve(uid, "", &EventTrack::new());
        };
        let index = self.reserve(uid, &machine.node.name, &machine.node.events);

        let mut local: Vec<(Uid, StateIndex)> = Vec::new();
        for &child in machine.children() {
            let Some(component) = controller.component(child) else {
                continue;
            };
            let child_index = match &component.kind {
                ComponentKind::Animation(anim) => {
                    let at = self.reserve(child, &anim.node.name, &anim.node.events);
                    let root_rotation = self.root_rotation(anim.root_rotation_input);
                    self.states[at.index()].kind = CompiledKind::Leaf {
                        clips: anim.clips.clone(),
                        looped: anim.looped,
                        root_rotation,
                    };
                    at
                }
                ComponentKind::StateMachine(_) => self.machine(child),
                ComponentKind::Edge(_) => continue,
            };
            local.push((child, child_index));
        }
        let lookup = |uid: Uid| {
            local
                .iter()
                .find(|(candidate, _)| *candidate == uid)
                .map(|(_, index)| *index)
        };

        for &child in machine.children() {
            let Some(edge) = controller.component(child).and_then(|c| c.as_edge()) else {
                continue;
            };
            match (lookup(edge.from), lookup(edge.to)) {
                (Some(from), Some(to)) => {
                    self.states[from.index()].transitions.push(CompiledTransition {
                        edge: edge.uid,
                        target: to,
                        condition: edge.condition.program().clone(),
                        blend_length: edge.blend_length,
                    })
                }
                _ => log::warn!("edge {} has dangling endpoints; skipped", edge.uid),
            }
        }

        let entries = machine
            .entry
            .edges()
            .iter()
            .filter_map(|entry| {
                lookup(entry.to).map(|target| CompiledEntry {
                    target,
                    condition: entry.condition.program().clone(),
                })
            })
            .collect();
        self.states[index.index()].kind = CompiledKind::Machine {
            children: local.iter().map(|(_, index)| *index).collect(),
            entries,
        };
        index
    }

    fn root_rotation(&self, input: Option<usize>) -> Option<u32> {
        let slot = self.controller.inputs().get(input?)?;
        (slot.ty == InputType::Float).then_some(slot.offset)
    }
}
