use winit::dpi::PhysicalSize;

use crate::compile::{validate_program, ProgramSource};
use crate::gpu::{CrtPipeline, GpuContext, GpuResources};
use crate::sampler::FrameBuffer;
use crate::types::{InitializationError, RenderFailure, RenderOutcome, RenderParameters, SkipReason};

/// Seam between the render loop and whatever turns a frame buffer into pixels.
pub trait FrameRenderer {
    /// Draws `frame` with `params`. `None` means the sampler failed this tick
    /// and the renderer should treat the call as a no-op.
    fn render(
        &mut self,
        frame: Option<&FrameBuffer>,
        params: &RenderParameters,
    ) -> Result<RenderOutcome, RenderFailure>;

    /// Replaces whatever was last shown with a fully transparent frame.
    fn clear(&mut self) -> Result<(), RenderFailure>;
}

impl<R: FrameRenderer + ?Sized> FrameRenderer for Box<R> {
    fn render(
        &mut self,
        frame: Option<&FrameBuffer>,
        params: &RenderParameters,
    ) -> Result<RenderOutcome, RenderFailure> {
        (**self).render(frame, params)
    }

    fn clear(&mut self) -> Result<(), RenderFailure> {
        (**self).clear()
    }
}

enum EngineState {
    Ready(Box<GpuResources>),
    Disabled(InitializationError),
}

/// GPU implementation of the CRT effect.
///
/// Initialization either produces the complete resource set or leaves the
/// engine permanently disabled; a disabled engine turns every render into a
/// logged no-op.
pub struct ShaderEngine {
    state: EngineState,
    last_skip: Option<SkipReason>,
}

impl ShaderEngine {
    /// Builds the engine with the built-in CRT program.
    pub fn initialize<W>(window: W, size: PhysicalSize<u32>) -> Self
    where
        W: wgpu::WindowHandle + 'static,
    {
        Self::initialize_with(window, size, &ProgramSource::default())
    }

    pub fn initialize_with<W>(window: W, size: PhysicalSize<u32>, source: &ProgramSource<'_>) -> Self
    where
        W: wgpu::WindowHandle + 'static,
    {
        let state = match Self::build(window, size, source) {
            Ok(resources) => {
                tracing::info!("CRT program compiled");
                EngineState::Ready(Box::new(resources))
            }
            Err(err) => {
                match &err {
                    InitializationError::CompileError {
                        stage,
                        diagnostics,
                        annotated_source,
                    } => tracing::error!(
                        stage,
                        %diagnostics,
                        source = %annotated_source,
                        "CRT shader failed to compile; overlay disabled"
                    ),
                    other => tracing::error!(error = %other, "CRT engine unavailable; overlay disabled"),
                }
                EngineState::Disabled(err)
            }
        };
        Self {
            state,
            last_skip: None,
        }
    }

    fn build<W>(
        window: W,
        size: PhysicalSize<u32>,
        source: &ProgramSource<'_>,
    ) -> Result<GpuResources, InitializationError>
    where
        W: wgpu::WindowHandle + 'static,
    {
        validate_program(source)?;
        let context = GpuContext::new(window, size)?;
        let pipeline = CrtPipeline::new(&context.device, context.config.format, source)?;
        Ok(GpuResources::new(context, pipeline))
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, EngineState::Ready(_))
    }

    /// Why initialization failed, if it did.
    pub fn initialization_error(&self) -> Option<&InitializationError> {
        match &self.state {
            EngineState::Ready(_) => None,
            EngineState::Disabled(err) => Some(err),
        }
    }

    pub fn surface_size(&self) -> Option<PhysicalSize<u32>> {
        match &self.state {
            EngineState::Ready(resources) => Some(resources.surface_size()),
            EngineState::Disabled(_) => None,
        }
    }

    fn skip(&mut self, reason: SkipReason) -> RenderOutcome {
        if self.last_skip != Some(reason) {
            tracing::debug!(reason = reason.as_str(), "skipping CRT render");
            self.last_skip = Some(reason);
        }
        RenderOutcome::Skipped(reason)
    }
}

impl FrameRenderer for ShaderEngine {
    fn render(
        &mut self,
        frame: Option<&FrameBuffer>,
        params: &RenderParameters,
    ) -> Result<RenderOutcome, RenderFailure> {
        if !self.is_initialized() {
            return Ok(self.skip(SkipReason::Uninitialized));
        }
        let Some(frame) = frame else {
            return Ok(self.skip(SkipReason::SourceUnavailable));
        };
        if params.viewport.width == 0 || params.viewport.height == 0 {
            return Ok(self.skip(SkipReason::EmptyViewport));
        }
        let EngineState::Ready(resources) = &mut self.state else {
            return Ok(self.skip(SkipReason::Uninitialized));
        };
        resources.draw(frame, params)?;
        self.last_skip = None;
        Ok(RenderOutcome::Drawn)
    }

    fn clear(&mut self) -> Result<(), RenderFailure> {
        match &mut self.state {
            EngineState::Ready(resources) => resources.clear(),
            EngineState::Disabled(_) => Ok(()),
        }
    }
}
