//! Error types for authoring, compiling and loading state machines.

use thiserror::Error;

use crate::graph::ComponentType;
use crate::ids::Uid;
use crate::inputs::InputType;

/// Failures while editing the input declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("input name must not be empty")]
    EmptyName,
    #[error("input name '{name}' exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },
    #[error("input '{0}' is already declared")]
    Duplicate(String),
    #[error("'{0}' is reserved for condition built-ins")]
    Reserved(String),
    #[error("input '{0}' is not declared")]
    Unknown(String),
    #[error("input '{name}' is {declared:?}, value is {given:?}")]
    TypeMismatch {
        name: String,
        declared: InputType,
        given: InputType,
    },
}

/// Failures while compiling condition text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,
    #[error("syntax error at byte {pos}: {message}")]
    Syntax { pos: usize, message: String },
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("condition nests deeper than {0} operands")]
    TooDeep(usize),
}

/// Failures while editing an event track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event index {index} out of range (track holds {count})")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("unknown event kind {0}")]
    UnknownKind(u8),
    #[error("corrupt event track: {0}")]
    Corrupt(String),
}

/// Authoring errors. The graph is left unchanged when one of these is returned, except that
/// condition setters keep rejected text for further editing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("component {0} does not exist")]
    UnknownComponent(Uid),
    #[error("component {0} is not a state machine")]
    NotAContainer(Uid),
    #[error("component {0} is not a state")]
    NotANode(Uid),
    #[error("component {0} is not an animation state")]
    NotAnAnimation(Uid),
    #[error("component {0} is not an edge")]
    NotAnEdge(Uid),
    #[error("{0:?} components cannot be created as states")]
    NotAState(ComponentType),
    #[error("an edge cannot start and end at {0}")]
    SelfEdge(Uid),
    #[error("{from} and {to} are not children of the same state machine")]
    DifferentContainers { from: Uid, to: Uid },
    #[error("{child} is not a direct child of {container}")]
    NotAChild { container: Uid, child: Uid },
    #[error("entry edge {index} out of range for {container}")]
    EntryOutOfRange { container: Uid, index: usize },
    #[error("clip index {index} out of range for {node}")]
    ClipOutOfRange { node: Uid, index: usize },
    #[error("the root state machine cannot be removed")]
    RemoveRoot,
    #[error("no uids left to allocate")]
    UidsExhausted,
    #[error("animation slot '{0}' is not in the slot table")]
    UnknownSlot(String),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
    #[error(transparent)]
    Event(#[from] EventError),
}

/// Fatal errors while reading a serialized controller. No partial graph is exposed.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("stream truncated while reading {what}")]
    Truncated { what: &'static str },
    #[error("not a state machine blob (magic {0:#010x})")]
    BadMagic(u32),
    #[error("format revision {found} does not match supported revision {expected}")]
    RevisionMismatch { expected: u32, found: u32 },
    #[error("invalid utf-8 in {what}")]
    InvalidUtf8 { what: &'static str },
    #[error("negative or oversized count {count} for {what}")]
    BadCount { what: &'static str, count: i32 },
    #[error("unknown component kind tag {0}")]
    UnknownKind(u8),
    #[error("uid {0} appears more than once")]
    DuplicateUid(Uid),
    #[error("uid {uid} referenced by {what} is not a state in {container}")]
    UnresolvedUid {
        uid: i32,
        container: Uid,
        what: &'static str,
    },
    #[error("edge {edge} starts and ends at {state}")]
    SelfEdge { edge: Uid, state: Uid },
    #[error("state machines nest deeper than {0} levels")]
    TooDeep(usize),
    #[error("{0} trailing bytes after controller")]
    TrailingBytes(usize),
    #[error("invalid input declaration: {0}")]
    Input(#[from] InputError),
    #[error("invalid event track on {uid}: {source}")]
    Event { uid: Uid, source: EventError },
}

/// Errors while building a controller from an authoring document.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document json parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("state '{name}' is not defined in '{container}'")]
    UnknownState { container: String, name: String },
    #[error("state '{name}' is defined twice in '{container}'")]
    DuplicateState { container: String, name: String },
    #[error("condition '{text}' failed to compile: {source}")]
    Condition {
        text: String,
        source: ConditionError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}
