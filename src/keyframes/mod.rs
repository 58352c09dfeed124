//! Keyframe interpolation engine.
//!
//! Pure functions turning a sparse list of keyframes into a continuous visual
//! state. The rendering surface evaluates the same rules for every captured
//! frame, and the HTTP layer uses the validation helpers at the request
//! boundary.

mod color;
mod easing;
mod interpolation;
mod models;

pub use color::{blend_palettes, parse_hex};
pub use easing::Easing;
pub use interpolation::{
    active_keyframe_index, generate_beat_keyframes, interpolate, snap_to_beat,
    DEFAULT_TRANSITION_SECS,
};
pub use models::{
    validate_keyframes, InterpolatedState, Keyframe, KeyframeError, KeyframeSettings, VisualStyle,
};
