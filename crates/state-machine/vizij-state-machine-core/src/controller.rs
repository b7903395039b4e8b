//! Controller: owns the authoring graph and its public editing API.
//!
//! Methods:
//! - structure: create_state, create_edge, create_entry_edge, remove, remove_entry_edge
//! - inputs and slots: declare_input, remove_input, add_slot
//! - build: compile, serialize, deserialize
//!
//! Every successful edit bumps [`Controller::revision`]. Failed edits return a [`GraphError`] and
//! leave the graph untouched.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexSet;

use crate::blob::{Reader, Writer};
use crate::compiled::CompiledGraph;
use crate::condition::Condition;
use crate::config::Config;
use crate::error::{GraphError, InputError, LoadError};
use crate::events::EventTrack;
use crate::graph::{
    AnimationNode, Component, ComponentKind, ComponentType, Edge, EntryEdge, Node, StateMachine,
    Vec2,
};
use crate::ids::{clip_hash, ClipHash, Uid, UidAllocator};
use crate::inputs::{InputDecl, InputType, InputValue};

/// Little-endian "VZSM".
pub const FORMAT_MAGIC: u32 = u32::from_le_bytes(*b"VZSM");
/// Layout revision written after the magic; loading any other revision fails.
pub const FORMAT_REVISION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Controller {
    cfg: Config,
    uids: UidAllocator,
    inputs: InputDecl,
    slots: IndexSet<String>,
    components: HashMap<Uid, Component>,
    revision: u64,
    compiled_revision: Option<u64>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Controller {
    /// Empty controller holding one empty root state machine.
    pub fn new(cfg: Config) -> Self {
        let mut components = HashMap::new();
        let mut root = StateMachine::new(Node::new(Uid::ROOT, cfg.default_state_size));
        root.node.name = "Root".to_string();
        components.insert(
            Uid::ROOT,
            Component {
                parent: None,
                kind: ComponentKind::StateMachine(root),
            },
        );
        Self {
            inputs: InputDecl::new(cfg.max_input_name_len),
            cfg,
            uids: UidAllocator::new(),
            slots: IndexSet::new(),
            components,
            revision: 0,
            compiled_revision: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn root(&self) -> Uid {
        Uid::ROOT
    }

    /// Edit counter; compiled graphs carry the revision they were built from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn needs_compile(&self) -> bool {
        self.compiled_revision != Some(self.revision)
    }

    pub fn last_uid(&self) -> u32 {
        self.uids.last()
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    // --- lookups --------------------------------------------------------------------------------

    pub fn component(&self, uid: Uid) -> Option<&Component> {
        self.components.get(&uid)
    }

    /// Number of components including the root.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn node(&self, uid: Uid) -> Option<&Node> {
        self.component(uid)?.node()
    }

    fn get(&self, uid: Uid) -> Result<&Component, GraphError> {
        self.components
            .get(&uid)
            .ok_or(GraphError::UnknownComponent(uid))
    }

    fn get_mut(&mut self, uid: Uid) -> Result<&mut Component, GraphError> {
        self.components
            .get_mut(&uid)
            .ok_or(GraphError::UnknownComponent(uid))
    }

    fn machine(&self, uid: Uid) -> Result<&StateMachine, GraphError> {
        self.get(uid)?
            .as_machine()
            .ok_or(GraphError::NotAContainer(uid))
    }

    fn machine_mut(&mut self, uid: Uid) -> Result<&mut StateMachine, GraphError> {
        self.get_mut(uid)?
            .as_machine_mut()
            .ok_or(GraphError::NotAContainer(uid))
    }

    fn node_mut(&mut self, uid: Uid) -> Result<&mut Node, GraphError> {
        self.get_mut(uid)?
            .node_mut()
            .ok_or(GraphError::NotANode(uid))
    }

    fn animation_mut(&mut self, uid: Uid) -> Result<&mut AnimationNode, GraphError> {
        self.get_mut(uid)?
            .as_animation_mut()
            .ok_or(GraphError::NotAnAnimation(uid))
    }

    fn edge_mut(&mut self, uid: Uid) -> Result<&mut Edge, GraphError> {
        self.get_mut(uid)?
            .as_edge_mut()
            .ok_or(GraphError::NotAnEdge(uid))
    }

    /// Direct child of `container` with the given UID (linear search).
    pub fn child_by_uid(&self, container: Uid, uid: Uid) -> Option<&Component> {
        let machine = self.component(container)?.as_machine()?;
        machine
            .children()
            .iter()
            .find(|child| **child == uid)
            .and_then(|child| self.component(*child))
    }

    /// Direct child state of `container` whose name is `name`.
    pub fn child_by_name(&self, container: Uid, name: &str) -> Option<Uid> {
        let machine = self.component(container)?.as_machine()?;
        machine.children().iter().copied().find(|child| {
            self.node(*child)
                .map(|node| node.name == name)
                .unwrap_or(false)
        })
    }

    pub fn children(&self, container: Uid) -> Result<&[Uid], GraphError> {
        Ok(self.machine(container)?.children())
    }

    pub fn entry_edges(&self, container: Uid) -> Result<&[EntryEdge], GraphError> {
        Ok(self.machine(container)?.entry.edges())
    }

    pub fn outgoing_edges(&self, node: Uid) -> Result<&[Uid], GraphError> {
        Ok(self.get(node)?.node().ok_or(GraphError::NotANode(node))?.outgoing())
    }

    pub fn incoming_edges(&self, node: Uid) -> Result<&[Uid], GraphError> {
        Ok(self.get(node)?.node().ok_or(GraphError::NotANode(node))?.incoming())
    }

    // --- structure ------------------------------------------------------------------------------

    /// Create a leaf or nested machine inside `container` and select it.
    pub fn create_state(
        &mut self,
        container: Uid,
        ty: ComponentType,
        position: Vec2,
    ) -> Result<Uid, GraphError> {
        if !ty.is_node() {
            return Err(GraphError::NotAState(ty));
        }
        self.machine(container)?;
        let uid = self.uids.alloc().ok_or(GraphError::UidsExhausted)?;
        let mut kind = ComponentKind::create(ty, uid, &self.cfg);
        if let ComponentKind::Animation(AnimationNode { node, .. })
        | ComponentKind::StateMachine(StateMachine { node, .. }) = &mut kind
        {
            node.position = position;
        }
        self.components.insert(
            uid,
            Component {
                parent: Some(container),
                kind,
            },
        );
        let machine = self.machine_mut(container)?;
        machine.children.push(uid);
        machine.selected = Some(uid);
        self.touch();
        log::debug!("created {ty:?} {uid} in {container}");
        Ok(uid)
    }

    /// Connect two sibling states. The new edge is selected in their container.
    pub fn create_edge(&mut self, from: Uid, to: Uid) -> Result<Uid, GraphError> {
        if from == to {
            return Err(GraphError::SelfEdge(from));
        }
        let container = self.sibling_parent(from, to)?;
        let uid = self.uids.alloc().ok_or(GraphError::UidsExhausted)?;
        let mut kind = ComponentKind::create(ComponentType::Edge, uid, &self.cfg);
        if let ComponentKind::Edge(edge) = &mut kind {
            edge.from = from;
            edge.to = to;
        }
        self.components.insert(
            uid,
            Component {
                parent: Some(container),
                kind,
            },
        );
        self.node_mut(from)?.outgoing.push(uid);
        self.node_mut(to)?.incoming.push(uid);
        let machine = self.machine_mut(container)?;
        machine.children.push(uid);
        machine.selected = Some(uid);
        self.touch();
        log::debug!("created edge {uid}: {from} -> {to}");
        Ok(uid)
    }

    fn sibling_parent(&self, from: Uid, to: Uid) -> Result<Uid, GraphError> {
        let a = self.get(from)?;
        let b = self.get(to)?;
        if a.node().is_none() {
            return Err(GraphError::NotANode(from));
        }
        if b.node().is_none() {
            return Err(GraphError::NotANode(to));
        }
        match (a.parent, b.parent) {
            (Some(pa), Some(pb)) if pa == pb => Ok(pa),
            _ => Err(GraphError::DifferentContainers { from, to }),
        }
    }

    /// Append an entry edge from `container`'s entry to its direct child `to`.
    /// Returns the entry edge index.
    pub fn create_entry_edge(&mut self, container: Uid, to: Uid) -> Result<usize, GraphError> {
        let machine = self.machine(container)?;
        if !machine.children().contains(&to) {
            return Err(GraphError::NotAChild {
                container,
                child: to,
            });
        }
        if self.get(to)?.node().is_none() {
            return Err(GraphError::NotANode(to));
        }
        let machine = self.machine_mut(container)?;
        machine.entry.edges.push(EntryEdge {
            to,
            condition: Condition::default(),
        });
        let index = machine.entry.edges.len() - 1;
        self.touch();
        Ok(index)
    }

    pub fn remove_entry_edge(
        &mut self,
        container: Uid,
        index: usize,
    ) -> Result<EntryEdge, GraphError> {
        let machine = self.machine_mut(container)?;
        if index >= machine.entry.edges.len() {
            return Err(GraphError::EntryOutOfRange { container, index });
        }
        let removed = machine.entry.edges.remove(index);
        self.touch();
        Ok(removed)
    }

    /// Remove a component. Removing a state first removes every edge and entry edge touching
    /// it; removing a state machine removes its whole subtree.
    pub fn remove(&mut self, uid: Uid) -> Result<(), GraphError> {
        if uid == Uid::ROOT {
            return Err(GraphError::RemoveRoot);
        }
        self.get(uid)?;
        let before = self.components.len();
        self.remove_subtree(uid);
        self.touch();
        log::debug!(
            "removed {uid} ({} components)",
            before - self.components.len()
        );
        Ok(())
    }

    fn remove_subtree(&mut self, uid: Uid) {
        let Some(component) = self.components.get(&uid) else {
            return;
        };
        let parent = component.parent;
        let mut doomed_edges = Vec::new();
        let mut nested = Vec::new();
        match &component.kind {
            ComponentKind::Edge(_) => {}
            ComponentKind::Animation(AnimationNode { node, .. }) => {
                doomed_edges.extend(node.outgoing.iter().chain(node.incoming.iter()).copied());
            }
            ComponentKind::StateMachine(machine) => {
                doomed_edges.extend(
                    machine
                        .node
                        .outgoing
                        .iter()
                        .chain(machine.node.incoming.iter())
                        .copied(),
                );
                nested.extend(machine.children.iter().copied());
            }
        }
        for child in nested {
            self.remove_subtree(child);
        }
        for edge in doomed_edges {
            self.remove_subtree(edge);
        }

        let Some(component) = self.components.remove(&uid) else {
            return;
        };
        if let ComponentKind::Edge(edge) = &component.kind {
            if let Some(node) = self.components.get_mut(&edge.from).and_then(Component::node_mut) {
                node.outgoing.retain(|e| *e != uid);
            }
            if let Some(node) = self.components.get_mut(&edge.to).and_then(Component::node_mut) {
                node.incoming.retain(|e| *e != uid);
            }
        }
        if let Some(machine) = parent
            .and_then(|p| self.components.get_mut(&p))
            .and_then(Component::as_machine_mut)
        {
            machine.children.retain(|c| *c != uid);
            machine.entry.edges.retain(|entry| entry.to != uid);
            if machine.selected == Some(uid) {
                machine.selected = None;
            }
        }
    }

    // --- editor properties ----------------------------------------------------------------------

    pub fn set_name(&mut self, uid: Uid, name: impl Into<String>) -> Result<(), GraphError> {
        self.node_mut(uid)?.name = name.into();
        self.touch();
        Ok(())
    }

    pub fn set_position(&mut self, uid: Uid, position: Vec2) -> Result<(), GraphError> {
        self.node_mut(uid)?.position = position;
        self.touch();
        Ok(())
    }

    pub fn set_size(&mut self, uid: Uid, size: Vec2) -> Result<(), GraphError> {
        self.node_mut(uid)?.size = size;
        self.touch();
        Ok(())
    }

    /// Select a direct child of `container` (or clear the selection). Not persisted.
    pub fn select(&mut self, container: Uid, child: Option<Uid>) -> Result<(), GraphError> {
        if let Some(child) = child {
            if !self.machine(container)?.children().contains(&child) {
                return Err(GraphError::NotAChild { container, child });
            }
        }
        self.machine_mut(container)?.selected = child;
        Ok(())
    }

    pub fn selected(&self, container: Uid) -> Result<Option<Uid>, GraphError> {
        Ok(self.machine(container)?.selected())
    }

    pub fn entry_position(&self, container: Uid) -> Result<Vec2, GraphError> {
        Ok(self.machine(container)?.entry.position)
    }

    pub fn set_entry_position(&mut self, container: Uid, position: Vec2) -> Result<(), GraphError> {
        self.machine_mut(container)?.entry.position = position;
        self.touch();
        Ok(())
    }

    /// Replace an edge condition. On a compile error the text is kept and the previous
    /// program stays active until the next [`Controller::compile`], which recompiles the kept
    /// text and so degrades the edge to always-false. The revision is bumped either way.
    pub fn set_edge_condition(&mut self, edge: Uid, text: &str) -> Result<(), GraphError> {
        let Controller {
            inputs, components, ..
        } = self;
        let edge = components
            .get_mut(&edge)
            .ok_or(GraphError::UnknownComponent(edge))?
            .as_edge_mut()
            .ok_or(GraphError::NotAnEdge(edge))?;
        let result = edge.condition.set_source(text, inputs.slots());
        self.touch();
        Ok(result?)
    }

    /// Replace an entry condition. Failed text is kept like [`Controller::set_edge_condition`].
    pub fn set_entry_condition(
        &mut self,
        container: Uid,
        index: usize,
        text: &str,
    ) -> Result<(), GraphError> {
        let Controller {
            inputs, components, ..
        } = self;
        let machine = components
            .get_mut(&container)
            .ok_or(GraphError::UnknownComponent(container))?
            .as_machine_mut()
            .ok_or(GraphError::NotAContainer(container))?;
        let entry = machine
            .entry
            .edges
            .get_mut(index)
            .ok_or(GraphError::EntryOutOfRange { container, index })?;
        let result = entry.condition.set_source(text, inputs.slots());
        self.touch();
        Ok(result?)
    }

    pub fn set_blend_length(&mut self, edge: Uid, seconds: f32) -> Result<(), GraphError> {
        self.edge_mut(edge)?.blend_length = seconds;
        self.touch();
        Ok(())
    }

    // --- leaves ---------------------------------------------------------------------------------

    fn slot_hash(&self, slot: &str) -> Result<ClipHash, GraphError> {
        if self.slots.contains(slot) {
            Ok(clip_hash(slot))
        } else {
            Err(GraphError::UnknownSlot(slot.to_string()))
        }
    }

    /// Append a clip (by slot name) to a leaf; returns its index.
    pub fn add_clip(&mut self, node: Uid, slot: &str) -> Result<usize, GraphError> {
        let hash = self.slot_hash(slot)?;
        let anim = self.animation_mut(node)?;
        anim.clips.push(hash);
        let index = anim.clips.len() - 1;
        self.touch();
        Ok(index)
    }

    pub fn set_clip(&mut self, node: Uid, index: usize, slot: &str) -> Result<(), GraphError> {
        let hash = self.slot_hash(slot)?;
        let anim = self.animation_mut(node)?;
        let clip = anim
            .clips
            .get_mut(index)
            .ok_or(GraphError::ClipOutOfRange { node, index })?;
        *clip = hash;
        self.touch();
        Ok(())
    }

    pub fn remove_clip(&mut self, node: Uid, index: usize) -> Result<ClipHash, GraphError> {
        let anim = self.animation_mut(node)?;
        if index >= anim.clips.len() {
            return Err(GraphError::ClipOutOfRange { node, index });
        }
        let removed = anim.clips.remove(index);
        self.touch();
        Ok(removed)
    }

    pub fn set_looped(&mut self, node: Uid, looped: bool) -> Result<(), GraphError> {
        self.animation_mut(node)?.looped = looped;
        self.touch();
        Ok(())
    }

    /// Bind (or clear) the input driving a leaf's root rotation.
    pub fn set_root_rotation_input(
        &mut self,
        node: Uid,
        input: Option<&str>,
    ) -> Result<(), GraphError> {
        let index = match input {
            Some(name) => Some(
                self.inputs
                    .index_of(name)
                    .ok_or_else(|| InputError::Unknown(name.to_string()))?,
            ),
            None => None,
        };
        self.animation_mut(node)?.root_rotation_input = index;
        self.touch();
        Ok(())
    }

    // --- events ---------------------------------------------------------------------------------

    pub fn events(&self, node: Uid) -> Result<&EventTrack, GraphError> {
        Ok(&self.get(node)?.node().ok_or(GraphError::NotANode(node))?.events)
    }

    /// Mutable access to a state's event track. Counts as an edit.
    pub fn events_mut(&mut self, node: Uid) -> Result<&mut EventTrack, GraphError> {
        self.get(node)?.node().ok_or(GraphError::NotANode(node))?;
        self.touch();
        Ok(&mut self.node_mut(node)?.events)
    }

    /// Add a set-input event after checking the input exists and accepts `value`.
    pub fn add_set_input_event(
        &mut self,
        node: Uid,
        time: f32,
        input: &str,
        value: InputValue,
    ) -> Result<usize, GraphError> {
        let index = self
            .inputs
            .index_of(input)
            .ok_or_else(|| InputError::Unknown(input.to_string()))?;
        let ty = self.inputs.slots()[index].ty;
        if value.ty() != ty && !(ty == InputType::Float && value.ty() == InputType::Int) {
            return Err(InputError::TypeMismatch {
                name: input.to_string(),
                declared: ty,
                given: value.ty(),
            }
            .into());
        }
        Ok(self
            .events_mut(node)?
            .add_set_input(time, index, value.coerce(ty)))
    }

    pub fn remove_event(&mut self, node: Uid, index: usize) -> Result<(), GraphError> {
        self.get(node)?.node().ok_or(GraphError::NotANode(node))?;
        self.node_mut(node)?.events.remove_event(index)?;
        self.touch();
        Ok(())
    }

    // --- inputs and slots -----------------------------------------------------------------------

    pub fn inputs(&self) -> &InputDecl {
        &self.inputs
    }

    pub fn declare_input(&mut self, name: &str, ty: InputType) -> Result<u32, GraphError> {
        let offset = self.inputs.declare(name, ty)?;
        self.touch();
        log::debug!("declared input '{name}' ({ty:?}) at offset {offset}");
        Ok(offset)
    }

    /// Remove an input. Root-rotation bindings and set-input events pointing at it are cleared;
    /// references to later inputs are renumbered. Conditions naming it fail on next compile.
    pub fn remove_input(&mut self, name: &str) -> Result<(), GraphError> {
        let removed = self.inputs.remove(name)?;
        for component in self.components.values_mut() {
            if let Some(anim) = component.as_animation_mut() {
                anim.root_rotation_input = match anim.root_rotation_input {
                    Some(i) if i == removed => None,
                    Some(i) if i > removed => Some(i - 1),
                    other => other,
                };
            }
            if let Some(node) = component.node_mut() {
                node.events.on_input_removed(removed);
            }
        }
        self.touch();
        log::debug!("removed input '{name}' (index {removed})");
        Ok(())
    }

    pub fn slots(&self) -> &IndexSet<String> {
        &self.slots
    }

    /// Register an animation slot name; returns its clip hash. Re-adding is a no-op.
    pub fn add_slot(&mut self, name: &str) -> ClipHash {
        if self.slots.insert(name.to_string()) {
            self.touch();
        }
        clip_hash(name)
    }

    /// Slot name behind a clip hash, if registered.
    pub fn slot_name(&self, hash: ClipHash) -> Option<&str> {
        self.slots
            .iter()
            .find(|slot| clip_hash(slot) == hash)
            .map(String::as_str)
    }

    // --- compile --------------------------------------------------------------------------------

    /// Recompile every condition against the current inputs and flatten the graph.
    ///
    /// Conditions that no longer compile degrade to always-false and are logged.
    pub fn compile(&mut self) -> Arc<CompiledGraph> {
        let failures = self.recompile_conditions();
        let graph = CompiledGraph::flatten(self);
        self.compiled_revision = Some(self.revision);
        log::info!(
            "compiled revision {} ({} states, {} degraded conditions)",
            graph.revision(),
            graph.states().len(),
            failures
        );
        Arc::new(graph)
    }

    fn recompile_conditions(&mut self) -> usize {
        let Controller {
            inputs, components, ..
        } = self;
        let mut failures = 0;
        let mut uids: Vec<Uid> = components.keys().copied().collect();
        uids.sort();
        for uid in uids {
            let Some(component) = components.get_mut(&uid) else {
                continue;
            };
            match &mut component.kind {
                ComponentKind::Edge(edge) => {
                    if let Err(err) = edge.condition.recompile(inputs.slots()) {
                        failures += 1;
                        log::warn!(
                            "edge {uid} condition '{}' disabled: {err}",
                            edge.condition.source()
                        );
                    }
                }
                ComponentKind::StateMachine(machine) => {
                    for (index, entry) in machine.entry.edges.iter_mut().enumerate() {
                        if let Err(err) = entry.condition.recompile(inputs.slots()) {
                            failures += 1;
                            log::warn!(
                                "entry edge {index} of {uid} condition '{}' disabled: {err}",
                                entry.condition.source()
                            );
                        }
                    }
                }
                ComponentKind::Animation(_) => {}
            }
        }
        failures
    }

    // --- serialization --------------------------------------------------------------------------

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(FORMAT_MAGIC);
        w.u32(FORMAT_REVISION);
        w.count(self.inputs.len());
        for slot in self.inputs.slots() {
            w.str(&slot.name);
            w.u8(slot.ty.tag());
        }
        w.i32(self.uids.last() as i32);
        self.write_machine(&mut w, Uid::ROOT);
        w.count(self.slots.len());
        for slot in &self.slots {
            w.str(slot);
        }
        w.into_bytes()
    }

    fn write_node(w: &mut Writer, node: &Node) {
        w.vec2(node.position);
        w.vec2(node.size);
        w.str(&node.name);
        w.count(node.events.len());
        w.bytes(node.events.as_bytes());
    }

    fn write_machine(&self, w: &mut Writer, uid: Uid) {
        let Some(machine) = self.component(uid).and_then(Component::as_machine) else {
            return;
        };
        Self::write_node(w, &machine.node);
        w.count(machine.children.len());
        for &child in &machine.children {
            let Some(component) = self.component(child) else {
                w.i32(-1);
                continue;
            };
            w.i32(child.to_wire());
            w.u8(component.ty().tag());
            match &component.kind {
                ComponentKind::Animation(anim) => {
                    Self::write_node(w, &anim.node);
                    w.count(anim.clips.len());
                    for clip in &anim.clips {
                        w.u32(*clip);
                    }
                    w.u8(anim.looped as u8);
                    w.i32(anim.root_rotation_input.map_or(-1, |i| i as i32));
                }
                ComponentKind::StateMachine(_) => self.write_machine(w, child),
                ComponentKind::Edge(edge) => {
                    w.i32(edge.from.to_wire());
                    w.i32(edge.to.to_wire());
                    w.str(edge.condition.source());
                    w.f32(edge.blend_length);
                }
            }
        }
        w.vec2(machine.entry.position);
        w.vec2(machine.entry.size);
        w.str(&machine.entry.name);
        w.count(machine.entry.edges.len());
        for entry in &machine.entry.edges {
            w.i32(entry.to.to_wire());
            w.str(entry.condition.source());
        }
    }

    /// Load a controller with the default configuration.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, LoadError> {
        Self::deserialize_with_config(bytes, Config::default())
    }

    /// Rebuild a controller from [`Controller::serialize`] output. Conditions are compiled
    /// before returning; nothing is returned on failure.
    pub fn deserialize_with_config(bytes: &[u8], cfg: Config) -> Result<Self, LoadError> {
        let mut r = Reader::new(bytes);
        let magic = r.u32("magic")?;
        if magic != FORMAT_MAGIC {
            return Err(LoadError::BadMagic(magic));
        }
        let revision = r.u32("format revision")?;
        if revision != FORMAT_REVISION {
            return Err(LoadError::RevisionMismatch {
                expected: FORMAT_REVISION,
                found: revision,
            });
        }

        let mut ctl = Controller::new(cfg);
        let input_count = r.count("input count")?;
        for _ in 0..input_count {
            let name = r.string("input name")?;
            let tag = r.u8("input type")?;
            let ty = InputType::from_tag(tag).ok_or(LoadError::UnknownKind(tag))?;
            ctl.inputs.declare(&name, ty)?;
        }
        let last_uid = r.i32("last uid")?;

        let mut loader = Loader {
            components: HashMap::new(),
            seen: HashSet::new(),
            max_depth: ctl.cfg.max_load_depth,
        };
        loader.seen.insert(Uid::ROOT);
        loader.machine(&mut r, Uid::ROOT, None, 0)?;

        let slot_count = r.count("slot count")?;
        for _ in 0..slot_count {
            ctl.slots.insert(r.string("slot name")?);
        }
        if r.remaining() > 0 {
            return Err(LoadError::TrailingBytes(r.remaining()));
        }

        ctl.uids = UidAllocator::restored(u32::try_from(last_uid).unwrap_or(0));
        for uid in loader.components.keys() {
            ctl.uids.observe(*uid);
        }
        ctl.components = loader.components;
        let failures = ctl.recompile_conditions();
        log::info!(
            "loaded controller: {} components, {} inputs, {} slots, {} degraded conditions",
            ctl.components.len(),
            ctl.inputs.len(),
            ctl.slots.len(),
            failures
        );
        Ok(ctl)
    }
}

struct PendingEdge {
    uid: Uid,
    from: i32,
    to: i32,
    condition: String,
    blend_length: f32,
}

struct Loader {
    components: HashMap<Uid, Component>,
    seen: HashSet<Uid>,
    max_depth: usize,
}

impl Loader {
    fn node(r: &mut Reader<'_>, uid: Uid) -> Result<Node, LoadError> {
        let position = r.vec2("state position")?;
        let size = r.vec2("state size")?;
        let name = r.string("state name")?;
        let count = r.count("event count")?;
        let data = r.bytes("event track")?.to_vec();
        let events = EventTrack::from_raw(count as u32, data)
            .map_err(|source| LoadError::Event { uid, source })?;
        let mut node = Node::new(uid, size);
        node.position = position;
        node.name = name;
        node.events = events;
        Ok(node)
    }

    fn machine(
        &mut self,
        r: &mut Reader<'_>,
        uid: Uid,
        parent: Option<Uid>,
        depth: usize,
    ) -> Result<(), LoadError> {
        if depth > self.max_depth {
            return Err(LoadError::TooDeep(self.max_depth));
        }
        let mut machine = StateMachine::new(Self::node(r, uid)?);

        // pass one: construct every child, deferring edges until all states exist
        let mut pending = Vec::new();
        let child_count = r.count("child count")?;
        for _ in 0..child_count {
            let raw = r.i32("child uid")?;
            if raw == -1 {
                continue;
            }
            let child = Uid::from_wire(raw).ok_or(LoadError::BadCount {
                what: "child uid",
                count: raw,
            })?;
            if !self.seen.insert(child) {
                return Err(LoadError::DuplicateUid(child));
            }
            let tag = r.u8("component kind")?;
            match ComponentType::from_tag(tag).ok_or(LoadError::UnknownKind(tag))? {
                ComponentType::Animation => {
                    let mut anim = AnimationNode::new(Self::node(r, child)?);
                    let clip_count = r.count("clip count")?;
                    for _ in 0..clip_count {
                        anim.clips.push(r.u32("clip hash")?);
                    }
                    anim.looped = r.u8("looped flag")? != 0;
                    anim.root_rotation_input = usize::try_from(r.i32("root rotation input")?).ok();
                    self.components.insert(
                        child,
                        Component {
                            parent: Some(uid),
                            kind: ComponentKind::Animation(anim),
                        },
                    );
                }
                ComponentType::StateMachine => self.machine(r, child, Some(uid), depth + 1)?,
                ComponentType::Edge => pending.push(PendingEdge {
                    uid: child,
                    from: r.i32("edge source")?,
                    to: r.i32("edge target")?,
                    condition: r.string("edge condition")?,
                    blend_length: r.f32("blend length")?,
                }),
            }
            machine.children.push(child);
        }

        machine.entry.position = r.vec2("entry position")?;
        machine.entry.size = r.vec2("entry size")?;
        machine.entry.name = r.string("entry name")?;
        let entry_count = r.count("entry edge count")?;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            entries.push((r.i32("entry target")?, r.string("entry condition")?));
        }

        // pass two: resolve edge endpoints against this machine's states
        for edge in pending {
            let from = self.resolve(&machine, edge.from, uid, "edge source")?;
            let to = self.resolve(&machine, edge.to, uid, "edge target")?;
            if from == to {
                return Err(LoadError::SelfEdge {
                    edge: edge.uid,
                    state: from,
                });
            }
            if let Some(node) = self.components.get_mut(&from).and_then(Component::node_mut) {
                node.outgoing.push(edge.uid);
            }
            if let Some(node) = self.components.get_mut(&to).and_then(Component::node_mut) {
                node.incoming.push(edge.uid);
            }
            self.components.insert(
                edge.uid,
                Component {
                    parent: Some(uid),
                    kind: ComponentKind::Edge(Edge {
                        uid: edge.uid,
                        from,
                        to,
                        condition: Condition::new(edge.condition),
                        blend_length: edge.blend_length,
                    }),
                },
            );
        }
        for (to, condition) in entries {
            let to = self.resolve(&machine, to, uid, "entry edge")?;
            machine.entry.edges.push(EntryEdge {
                to,
                condition: Condition::new(condition),
            });
        }

        self.components.insert(
            uid,
            Component {
                parent,
                kind: ComponentKind::StateMachine(machine),
            },
        );
        Ok(())
    }

    fn resolve(
        &self,
        machine: &StateMachine,
        raw: i32,
        container: Uid,
        what: &'static str,
    ) -> Result<Uid, LoadError> {
        Uid::from_wire(raw)
            .filter(|uid| machine.children.contains(uid))
            .filter(|uid| {
                self.components
                    .get(uid)
                    .map(|c| c.node().is_some())
                    .unwrap_or(false)
            })
            .ok_or(LoadError::UnresolvedUid {
                uid: raw,
                container,
                what,
            })
    }
}
