//! JSON authoring documents.
//!
//! A document names states instead of using UIDs; building one replays the same public editing
//! operations an interactive editor would call, so every invariant of [`Controller`] holds for
//! the result.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{DocumentError, GraphError};
use crate::graph::{ComponentType, Vec2};
use crate::ids::Uid;
use crate::inputs::{InputType, InputValue};
use crate::Controller;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerDocument {
    pub inputs: Vec<InputDocument>,
    /// Animation slot names; slots referenced by leaves are added automatically.
    pub slots: Vec<String>,
    pub root: MachineDocument,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: InputType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineDocument {
    pub states: Vec<StateDocument>,
    pub transitions: Vec<TransitionDocument>,
    pub entries: Vec<EntryDocument>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub name: String,
    #[serde(default)]
    pub position: Option<Vec2>,
    #[serde(default)]
    pub clips: Vec<String>,
    #[serde(default = "default_looped")]
    pub looped: bool,
    #[serde(default)]
    pub root_rotation: Option<String>,
    #[serde(default)]
    pub events: Vec<EventDocument>,
    /// Present for nested state machines.
    #[serde(default)]
    pub machine: Option<MachineDocument>,
}

fn default_looped() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDocument {
    pub time: f32,
    pub input: String,
    pub value: InputValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionDocument {
    pub from: String,
    pub to: String,
    pub condition: String,
    #[serde(default)]
    pub blend: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryDocument {
    pub to: String,
    pub condition: String,
}

impl ControllerDocument {
    pub fn from_json(text: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Controller {
    /// Build a controller from an authoring document with the default configuration.
    pub fn from_json(text: &str) -> Result<Controller, DocumentError> {
        Self::from_document(&ControllerDocument::from_json(text)?, Config::default())
    }

    pub fn from_document(
        doc: &ControllerDocument,
        cfg: Config,
    ) -> Result<Controller, DocumentError> {
        let mut ctl = Controller::new(cfg);
        for input in &doc.inputs {
            ctl.declare_input(&input.name, input.ty)?;
        }
        for slot in &doc.slots {
            ctl.add_slot(slot);
        }
        build_machine(&mut ctl, Uid::ROOT, "Root", &doc.root)?;
        Ok(ctl)
    }
}

fn build_machine(
    ctl: &mut Controller,
    container: Uid,
    path: &str,
    doc: &MachineDocument,
) -> Result<(), DocumentError> {
    let mut by_name: HashMap<&str, Uid> = HashMap::new();
    for (index, state) in doc.states.iter().enumerate() {
        if by_name.contains_key(state.name.as_str()) {
            return Err(DocumentError::DuplicateState {
                container: path.to_string(),
                name: state.name.clone(),
            });
        }
        let ty = if state.machine.is_some() {
            ComponentType::StateMachine
        } else {
            ComponentType::Animation
        };
        let position = state
            .position
            .unwrap_or(Vec2::new(index as f32 * 150.0, 0.0));
        let uid = ctl.create_state(container, ty, position)?;
        ctl.set_name(uid, state.name.clone())?;
        by_name.insert(state.name.as_str(), uid);

        match &state.machine {
            Some(machine) => build_machine(ctl, uid, &format!("{path}/{}", state.name), machine)?,
            None => {
                for clip in &state.clips {
                    ctl.add_slot(clip);
                    ctl.add_clip(uid, clip)?;
                }
                ctl.set_looped(uid, state.looped)?;
                if let Some(input) = &state.root_rotation {
                    ctl.set_root_rotation_input(uid, Some(input.as_str()))?;
                }
            }
        }
        for event in &state.events {
            ctl.add_set_input_event(uid, event.time, &event.input, event.value)?;
        }
    }

    let find = |name: &str| {
        by_name
            .get(name)
            .copied()
            .ok_or_else(|| DocumentError::UnknownState {
                container: path.to_string(),
                name: name.to_string(),
            })
    };

    for transition in &doc.transitions {
        let edge = ctl.create_edge(find(&transition.from)?, find(&transition.to)?)?;
        ctl.set_edge_condition(edge, &transition.condition)
            .map_err(|err| condition_error(&transition.condition, err))?;
        if let Some(blend) = transition.blend {
            ctl.set_blend_length(edge, blend)?;
        }
    }
    for entry in &doc.entries {
        let index = ctl.create_entry_edge(container, find(&entry.to)?)?;
        ctl.set_entry_condition(container, index, &entry.condition)
            .map_err(|err| condition_error(&entry.condition, err))?;
    }
    Ok(())
}

fn condition_error(text: &str, err: GraphError) -> DocumentError {
    match err {
        GraphError::Condition(source) => DocumentError::Condition {
            text: text.to_string(),
            source,
        },
        other => DocumentError::Graph(other),
    }
}
