//! Pitch analysis and note utilities

pub mod note;
pub mod pitch;

pub use note::{pitch_difference, PitchDifference, TargetNote};
pub use pitch::{
    FramePitch, PitchAnalysis, PitchDetector, PitchEstimate, PitchFrame, PitchTrack,
    PredominantPitch,
};
