//! Authoring graph components.
//!
//! Components live in a UID-keyed arena owned by the [`Controller`](crate::Controller). Edges
//! and containers refer to other components by [`Uid`] only; the controller keeps both sides
//! of every reference in sync.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::config::Config;
use crate::events::EventTrack;
use crate::ids::{ClipHash, Uid};

/// 2D editor coordinate (presentation only).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Wire tag of a component kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Animation,
    StateMachine,
    Edge,
}

impl ComponentType {
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            ComponentType::Animation => 0,
            ComponentType::StateMachine => 1,
            ComponentType::Edge => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ComponentType::Animation),
            1 => Some(ComponentType::StateMachine),
            2 => Some(ComponentType::Edge),
            _ => None,
        }
    }

    /// Whether components of this kind are states (can be edge endpoints).
    pub fn is_node(self) -> bool {
        !matches!(self, ComponentType::Edge)
    }
}

/// Data shared by every state.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub uid: Uid,
    pub name: String,
    pub position: Vec2,
    pub size: Vec2,
    pub events: EventTrack,
    pub(crate) outgoing: Vec<Uid>,
    pub(crate) incoming: Vec<Uid>,
}

impl Node {
    pub fn new(uid: Uid, size: Vec2) -> Self {
        Self {
            uid,
            name: String::new(),
            position: Vec2::default(),
            size,
            events: EventTrack::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Edges leaving this state, in creation order.
    pub fn outgoing(&self) -> &[Uid] {
        &self.outgoing
    }

    pub fn incoming(&self) -> &[Uid] {
        &self.incoming
    }
}

/// Leaf state playing one or more clips.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationNode {
    pub node: Node,
    pub clips: Vec<ClipHash>,
    pub looped: bool,
    /// Index of the float input driving root rotation.
    pub root_rotation_input: Option<usize>,
}

impl AnimationNode {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            clips: Vec::new(),
            looped: true,
            root_rotation_input: None,
        }
    }
}

/// Transition from the entry pseudo-node to a direct child.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryEdge {
    pub to: Uid,
    pub condition: Condition,
}

/// Pseudo-node every state machine enters through. It has no UID.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryNode {
    pub name: String,
    pub position: Vec2,
    pub size: Vec2,
    pub(crate) edges: Vec<EntryEdge>,
}

impl EntryNode {
    pub fn new(size: Vec2) -> Self {
        Self {
            name: "Entry".to_string(),
            position: Vec2::default(),
            size,
            edges: Vec::new(),
        }
    }

    pub fn edges(&self) -> &[EntryEdge] {
        &self.edges
    }
}

/// Container state with its own children, edges and entry.
#[derive(Clone, Debug, PartialEq)]
pub struct StateMachine {
    pub node: Node,
    pub entry: EntryNode,
    pub(crate) children: Vec<Uid>,
    /// Editor selection; not persisted.
    pub(crate) selected: Option<Uid>,
}

impl StateMachine {
    pub fn new(node: Node) -> Self {
        let size = node.size;
        Self {
            node,
            entry: EntryNode::new(size),
            children: Vec::new(),
            selected: None,
        }
    }

    /// Direct children (states and edges) in creation order.
    pub fn children(&self) -> &[Uid] {
        &self.children
    }

    pub fn selected(&self) -> Option<Uid> {
        self.selected
    }
}

/// Conditioned transition between two sibling states.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub uid: Uid,
    pub from: Uid,
    pub to: Uid,
    pub condition: Condition,
    /// Cross-fade duration in seconds; `<= 0` cuts.
    pub blend_length: f32,
}

/// Closed set of component payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentKind {
    Animation(AnimationNode),
    StateMachine(StateMachine),
    Edge(Edge),
}

impl ComponentKind {
    /// Build an empty component of kind `ty`. Edges start unlinked (both endpoints `uid`).
    pub fn create(ty: ComponentType, uid: Uid, config: &Config) -> Self {
        match ty {
            ComponentType::Animation => ComponentKind::Animation(AnimationNode::new(Node::new(
                uid,
                config.default_state_size,
            ))),
            ComponentType::StateMachine => ComponentKind::StateMachine(StateMachine::new(Node::new(
                uid,
                config.default_state_size,
            ))),
            ComponentType::Edge => ComponentKind::Edge(Edge {
                uid,
                from: uid,
                to: uid,
                condition: Condition::default(),
                blend_length: config.default_blend_length,
            }),
        }
    }
}

/// Arena entry: a payload plus the container owning it (`None` for the root).
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub parent: Option<Uid>,
    pub kind: ComponentKind,
}

impl Component {
    pub fn uid(&self) -> Uid {
        match &self.kind {
            ComponentKind::Animation(anim) => anim.node.uid,
            ComponentKind::StateMachine(machine) => machine.node.uid,
            ComponentKind::Edge(edge) => edge.uid,
        }
    }

    pub fn ty(&self) -> ComponentType {
        match &self.kind {
            ComponentKind::Animation(_) => ComponentType::Animation,
            ComponentKind::StateMachine(_) => ComponentType::StateMachine,
            ComponentKind::Edge(_) => ComponentType::Edge,
        }
    }

    pub fn node(&self) -> Option<&Node> {
        match &self.kind {
            ComponentKind::Animation(anim) => Some(&anim.node),
            ComponentKind::StateMachine(machine) => Some(&machine.node),
            ComponentKind::Edge(_) => None,
        }
    }

    pub fn node_mut(&mut self) -> Option<&mut Node> {
        match &mut self.kind {
            ComponentKind::Animation(anim) => Some(&mut anim.node),
            ComponentKind::StateMachine(machine) => Some(&mut machine.node),
            ComponentKind::Edge(_) => None,
        }
    }

    pub fn as_animation(&self) -> Option<&AnimationNode> {
        match &self.kind {
            ComponentKind::Animation(anim) => Some(anim),
            _ => None,
        }
    }

    pub fn as_animation_mut(&mut self) -> Option<&mut AnimationNode> {
        match &mut self.kind {
            ComponentKind::Animation(anim) => Some(anim),
            _ => None,
        }
    }

    pub fn as_machine(&self) -> Option<&StateMachine> {
        match &self.kind {
            ComponentKind::StateMachine(machine) => Some(machine),
            _ => None,
        }
    }

    pub fn as_machine_mut(&mut self) -> Option<&mut StateMachine> {
        match &mut self.kind {
            ComponentKind::StateMachine(machine) => Some(machine),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match &self.kind {
            ComponentKind::Edge(edge) => Some(edge),
            _ => None,
        }
    }

    pub fn as_edge_mut(&mut self) -> Option<&mut Edge> {
        match &mut self.kind {
            ComponentKind::Edge(edge) => Some(edge),
            _ => None,
        }
    }
}
