//! DSP stages
//!
//! Everything between pitch detection and export:
//! - STFT engine shared by the mask and the phase vocoder
//! - Harmonic mask and the cleanup filter chain
//! - Pitch/time correction behind the `ShiftKernel` trait (phase vocoder or WSOLA)
//! - Output normalization

pub mod cleanup;
pub mod corrector;
pub mod filters;
pub mod mask;
pub mod normalize;
pub mod shift;
pub mod stft;

pub use cleanup::{
    CleanlinessParams, CleanupChain, CleanupMode, CornerClamp, FilterCorners, ManualCorners,
};
pub use corrector::{Corrected, PitchCorrector, RatioClamp};
pub use filters::{Biquad, FilterType};
pub use mask::{HarmonicMask, MaskBuilder};
pub use normalize::{normalize, NormalizeMode};
pub use shift::{MethodKernel, PhaseVocoderKernel, ShiftKernel, StretchMethod, WsolaKernel};
pub use stft::{Spectrogram, Stft};
