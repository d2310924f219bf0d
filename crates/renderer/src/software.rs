use image::{Rgba, RgbaImage};

use crate::effect::{shade, EffectUniforms, OVERSAMPLE};
use crate::engine::FrameRenderer;
use crate::gpu::CrtUniforms;
use crate::sampler::FrameBuffer;
use crate::types::{RenderFailure, RenderOutcome, RenderParameters, SkipReason};

/// Rasterizes the CRT program on the CPU into an RGBA image.
///
/// Follows the same steps as the GPU path: resize the target when the
/// viewport changes, clear to transparent, then shade every pixel of the
/// full-viewport quad.
#[derive(Debug, Default)]
pub struct SoftwareRenderer {
    target: RgbaImage,
    frames: u64,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently rendered frame.
    pub fn output(&self) -> &RgbaImage {
        &self.target
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames
    }

    fn draw(&mut self, frame: &FrameBuffer, params: &RenderParameters) {
        let (width, height) = (params.viewport.width, params.viewport.height);
        if self.target.dimensions() != (width, height) {
            self.target = RgbaImage::new(width, height);
        } else {
            self.target.fill(0);
        }

        let uniforms: EffectUniforms = CrtUniforms::from_params(params).into();
        let [res_x, res_y] = uniforms.resolution;
        for (x, y, pixel) in self.target.enumerate_pixels_mut() {
            let centre = [x as f32 + 0.5, y as f32 + 0.5];
            let tex_coord = [centre[0] / res_x * OVERSAMPLE, centre[1] / res_y * OVERSAMPLE];
            let colour = shade(centre, tex_coord, &uniforms, frame);
            *pixel = Rgba(colour.map(unorm8));
        }
        self.frames += 1;
    }
}

impl FrameRenderer for SoftwareRenderer {
    fn render(
        &mut self,
        frame: Option<&FrameBuffer>,
        params: &RenderParameters,
    ) -> Result<RenderOutcome, RenderFailure> {
        let Some(frame) = frame else {
            return Ok(RenderOutcome::Skipped(SkipReason::SourceUnavailable));
        };
        if params.viewport.width == 0 || params.viewport.height == 0 {
            return Ok(RenderOutcome::Skipped(SkipReason::EmptyViewport));
        }
        self.draw(frame, params);
        Ok(RenderOutcome::Drawn)
    }

    fn clear(&mut self) -> Result<(), RenderFailure> {
        self.target.fill(0);
        Ok(())
    }
}

/// Float-to-UNORM8 conversion as a render target performs it.
fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crtconfig::PixelScale;
    use winit::dpi::PhysicalSize;

    #[test]
    fn converts_to_unorm8() {
        assert_eq!(unorm8(-0.5), 0);
        assert_eq!(unorm8(0.5), 128);
        assert_eq!(unorm8(1.7), 255);
    }

    #[test]
    fn missing_frame_is_a_no_op() {
        let mut renderer = SoftwareRenderer::new();
        let params = RenderParameters::new(PhysicalSize::new(30, 30), 0.5, PixelScale::ONE);
        assert_eq!(
            renderer.render(None, &params).unwrap(),
            RenderOutcome::Skipped(SkipReason::SourceUnavailable)
        );
        assert_eq!(renderer.frames_drawn(), 0);
    }

    #[test]
    fn target_follows_viewport() {
        let mut renderer = SoftwareRenderer::new();
        let frame = FrameBuffer::from_image(RgbaImage::from_pixel(10, 10, Rgba([9, 9, 9, 255])));
        for (w, h) in [(30, 30), (60, 21)] {
            let params = RenderParameters::new(PhysicalSize::new(w, h), 0.1, PixelScale::ONE);
            renderer.render(Some(&frame), &params).unwrap();
            assert_eq!(renderer.output().dimensions(), (w, h));
        }
        assert_eq!(renderer.frames_drawn(), 2);
    }

    #[test]
    fn clear_leaves_a_transparent_target() {
        let mut renderer = SoftwareRenderer::new();
        let frame = FrameBuffer::from_image(RgbaImage::from_pixel(10, 10, Rgba([200, 90, 40, 255])));
        let params = RenderParameters::new(PhysicalSize::new(30, 30), 0.5, PixelScale::ONE);
        renderer.render(Some(&frame), &params).unwrap();
        assert!(renderer.output().pixels().any(|pixel| pixel.0[3] == 255));

        renderer.clear().unwrap();
        assert_eq!(renderer.output().dimensions(), (30, 30));
        assert!(renderer.output().pixels().all(|pixel| pixel.0 == [0, 0, 0, 0]));
    }
}
