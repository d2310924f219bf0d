//! CRT phosphor overlay renderer.
//!
//! Every tick the [`RenderLoop`] reads the newest published settings, asks the
//! [`FrameSampler`] for a downsampled copy of the current video frame, and
//! hands it to a [`FrameRenderer`]:
//! - [`ShaderEngine`] runs the effect program on the GPU through wgpu and
//!   presents to a window surface;
//! - [`SoftwareRenderer`] evaluates the same program on the CPU into an image,
//!   the reference the effect is tested against.
//!
//! Shader sources and the per-pixel model live in [`effect`]. Compile
//! diagnostics, including line-annotated source, come from [`compile`].
//! [`run_preview`] wires everything to a transparent winit window.

pub mod compile;
pub mod effect;
mod engine;
mod gpu;
mod runtime;
mod sampler;
mod software;
mod types;
mod window;

pub use compile::{annotate_source, validate_program, ProgramSource};
pub use engine::{FrameRenderer, ShaderEngine};
pub use runtime::{
    DisplaySize, FixedRateTicker, LoopState, LoopStats, ManualTicker, RenderLoop, Tick,
    TickOutcome, TickSource,
};
pub use sampler::{
    FrameBuffer, FrameSampler, SampleError, StillFrame, TestPattern, VideoFrameSource,
};
pub use software::SoftwareRenderer;
pub use types::{InitializationError, RenderFailure, RenderOutcome, RenderParameters, SkipReason};
pub use window::{run_preview, PreviewOptions};

pub use winit::dpi::PhysicalSize;
