//! Core configuration for vizij-state-machine-core.

use serde::{Deserialize, Serialize};

use crate::graph::Vec2;

/// What a state machine does when none of its entry conditions hold on entry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryFallback {
    /// Activate the first child state in creation order.
    #[default]
    FirstChild,
    /// Stay active without an active child; the machine contributes no clips.
    Inactive,
}

/// Controller-wide limits and authoring defaults.
/// Keep this minimal; expand as needed without breaking API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Longest accepted input name, in bytes.
    pub max_input_name_len: usize,
    /// Size given to freshly created states (presentation only).
    pub default_state_size: Vec2,
    /// Blend length given to freshly created edges, in seconds.
    pub default_blend_length: f32,
    /// Entry policy baked into compiled graphs.
    pub entry_fallback: EntryFallback,
    /// Deepest state machine nesting accepted by `Controller::deserialize`.
    pub max_load_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_input_name_len: 32,
            default_state_size: Vec2 { x: 100.0, y: 30.0 },
            default_blend_length: 0.0,
            entry_fallback: EntryFallback::FirstChild,
            max_load_depth: 64,
        }
    }
}
