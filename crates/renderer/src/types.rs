use crtconfig::{PixelScale, SettingsRecord};
use thiserror::Error;
use winit::dpi::PhysicalSize;

use crate::sampler::SampleError;

/// Per-frame inputs to the effect, recomputed every tick from the latest
/// settings snapshot and the current display size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParameters {
    /// Backing size of the drawing surface in physical pixels.
    pub viewport: PhysicalSize<u32>,
    /// Bloom gain, bound as `u_brightBlur`.
    pub brightness: f32,
    pub pixel_scale: PixelScale,
}

impl RenderParameters {
    pub fn new(viewport: PhysicalSize<u32>, brightness: f32, pixel_scale: PixelScale) -> Self {
        Self {
            viewport,
            brightness,
            pixel_scale,
        }
    }

    pub fn from_settings(settings: &SettingsRecord, viewport: PhysicalSize<u32>) -> Self {
        Self::new(viewport, settings.brightness, settings.pixel_size)
    }

    pub fn resolution(&self) -> [f32; 2] {
        [self.viewport.width as f32, self.viewport.height as f32]
    }
}

/// Why a render call returned without drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Initialization failed earlier; the engine stays disabled.
    Uninitialized,
    /// The frame sampler could not produce a buffer this tick.
    SourceUnavailable,
    /// The surface has a zero-sized side.
    EmptyViewport,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Uninitialized => "engine uninitialized",
            SkipReason::SourceUnavailable => "no source frame",
            SkipReason::EmptyViewport => "empty viewport",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Drawn,
    Skipped(SkipReason),
}

/// Fatal for one engine instance; never retried.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("no GPU context available: {0}")]
    ContextUnavailable(String),
    #[error("failed to compile {stage} shader:\n{diagnostics}")]
    CompileError {
        stage: &'static str,
        diagnostics: String,
        annotated_source: String,
    },
    #[error("failed to link CRT program:\n{diagnostics}")]
    LinkError { diagnostics: String },
}

/// A single tick's failure. The render loop logs it and moves on.
#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("frame of {width}x{height} exceeds the GPU texture limit of {limit}")]
    TextureTooLarge { width: u32, height: u32, limit: u32 },
    #[error("render panicked: {0}")]
    Panicked(String),
}
