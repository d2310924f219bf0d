//! Downsamples live video frames into the low-resolution texel grid the
//! effect program resamples.

use std::path::Path;

use crtconfig::PixelScale;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use thiserror::Error;
use winit::dpi::PhysicalSize;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("no drawable surface for a {width}x{height} frame buffer: {reason}")]
    ContextUnavailable {
        width: u32,
        height: u32,
        reason: &'static str,
    },
}

/// Anything that can hand out its current picture as RGBA pixels.
pub trait VideoFrameSource {
    /// Pixel dimensions of the frame `current_frame` would return.
    fn dimensions(&self) -> (u32, u32);

    /// The frame to draw this tick, or `None` when nothing is decodable yet.
    fn current_frame(&mut self) -> Option<&RgbaImage>;
}

impl<S: VideoFrameSource + ?Sized> VideoFrameSource for Box<S> {
    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn current_frame(&mut self) -> Option<&RgbaImage> {
        (**self).current_frame()
    }
}

impl VideoFrameSource for RgbaImage {
    fn dimensions(&self) -> (u32, u32) {
        RgbaImage::dimensions(self)
    }

    fn current_frame(&mut self) -> Option<&RgbaImage> {
        Some(self)
    }
}

/// A decoded still image standing in for a paused video.
#[derive(Debug, Clone)]
pub struct StillFrame {
    image: RgbaImage,
}

impl StillFrame {
    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        Ok(Self {
            image: image::open(path)?.to_rgba8(),
        })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }
}

impl VideoFrameSource for StillFrame {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn current_frame(&mut self) -> Option<&RgbaImage> {
        Some(&self.image)
    }
}

/// Scrolling colour bars, regenerated on every call so the preview has motion
/// without a real video decoder.
#[derive(Debug, Clone)]
pub struct TestPattern {
    image: RgbaImage,
    frame: u32,
}

const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width.max(1), height.max(1)),
            frame: 0,
        }
    }

    fn paint(&mut self) {
        let (width, height) = self.image.dimensions();
        let bar_width = (width / BARS.len() as u32).max(1);
        let offset = self.frame % width;
        for (x, y, pixel) in self.image.enumerate_pixels_mut() {
            let shifted = (x + offset) % width;
            let index = ((shifted / bar_width) as usize).min(BARS.len() - 1);
            let [r, g, b] = BARS[index];
            // Darken the bottom quarter into a ramp so bloom has gradients to work on.
            let shade = if y >= height - height / 4 {
                (x * 255 / width.max(1)) as u8
            } else {
                255
            };
            let scale = |channel: u8| ((channel as u32 * shade as u32) / 255) as u8;
            *pixel = Rgba([scale(r), scale(g), scale(b), 255]);
        }
        self.frame = self.frame.wrapping_add(1);
    }
}

impl VideoFrameSource for TestPattern {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn current_frame(&mut self) -> Option<&RgbaImage> {
        self.paint();
        Some(&self.image)
    }
}

/// Raw RGBA8 texels ready for upload. Rebuilt every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    image: RgbaImage,
}

impl FrameBuffer {
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.width(), self.height())
    }

    /// Tightly packed rows, top row first.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Texel at clamped integer coordinates.
    pub fn texel(&self, x: i64, y: i64) -> [u8; 4] {
        let max_x = i64::from(self.width()) - 1;
        let max_y = i64::from(self.height()) - 1;
        let x = x.clamp(0, max_x) as u32;
        let y = y.clamp(0, max_y) as u32;
        self.image.get_pixel(x, y).0
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSampler;

impl FrameSampler {
    pub fn new() -> Self {
        Self
    }

    /// `round(target / (scale * 3))` on both axes.
    pub fn buffer_dimensions(target: PhysicalSize<u32>, scale: PixelScale) -> (u32, u32) {
        let block = f64::from(scale.block_size());
        let width = (f64::from(target.width) / block).round() as u32;
        let height = (f64::from(target.height) / block).round() as u32;
        (width, height)
    }

    /// Draws the source's current frame into a buffer of
    /// [`buffer_dimensions`](Self::buffer_dimensions) using nearest-neighbour
    /// filtering.
    pub fn sample<S>(
        &self,
        source: &mut S,
        target: PhysicalSize<u32>,
        scale: PixelScale,
    ) -> Result<FrameBuffer, SampleError>
    where
        S: VideoFrameSource + ?Sized,
    {
        let (width, height) = Self::buffer_dimensions(target, scale);
        if width == 0 || height == 0 {
            return Err(SampleError::ContextUnavailable {
                width,
                height,
                reason: "target is smaller than one pixel block",
            });
        }
        let Some(frame) = source.current_frame() else {
            return Err(SampleError::ContextUnavailable {
                width,
                height,
                reason: "source has no frame",
            });
        };
        if frame.width() == 0 || frame.height() == 0 {
            return Err(SampleError::ContextUnavailable {
                width,
                height,
                reason: "source frame is empty",
            });
        }

        let image = if frame.dimensions() == (width, height) {
            frame.clone()
        } else {
            imageops::resize(frame, width, height, FilterType::Nearest)
        };
        Ok(FrameBuffer { image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(value: u32) -> PixelScale {
        PixelScale::new(value).unwrap()
    }

    #[test]
    fn buffer_dimensions_round_to_nearest_block() {
        let cases = [
            ((300, 150), 1, (100, 50)),
            ((300, 150), 2, (50, 25)),
            ((300, 150), 3, (33, 17)),
            ((1920, 1080), 1, (640, 360)),
            ((1000, 7), 1, (333, 2)),
            ((10, 10), 3, (1, 1)),
            ((4, 4), 3, (0, 0)),
        ];
        for ((w, h), s, expected) in cases {
            assert_eq!(
                FrameSampler::buffer_dimensions(PhysicalSize::new(w, h), scale(s)),
                expected,
                "{w}x{h} at scale {s}"
            );
        }
    }

    #[test]
    fn sample_matches_buffer_dimensions_for_every_scale() {
        let mut source = TestPattern::new(64, 48);
        let sampler = FrameSampler::new();
        for s in PixelScale::ALL {
            for (w, h) in [(300, 150), (641, 359), (17, 9), (1280, 720)] {
                let target = PhysicalSize::new(w, h);
                let buffer = sampler.sample(&mut source, target, s).unwrap();
                let expected = FrameSampler::buffer_dimensions(target, s);
                assert_eq!((buffer.width(), buffer.height()), expected);
                assert_eq!(buffer.as_bytes().len(), (expected.0 * expected.1 * 4) as usize);
            }
        }
    }

    #[test]
    fn nearest_filtering_keeps_texels_crisp() {
        let mut source = RgbaImage::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let buffer = FrameSampler::new()
            .sample(&mut source, PhysicalSize::new(24, 6), scale(1))
            .unwrap();
        assert_eq!((buffer.width(), buffer.height()), (8, 2));
        for pixel in buffer.image().pixels() {
            assert!(pixel.0 == [255, 0, 0, 255] || pixel.0 == [0, 0, 255, 255]);
        }
        assert_eq!(buffer.texel(0, 0), [255, 0, 0, 255]);
        assert_eq!(buffer.texel(7, 1), [0, 0, 255, 255]);
    }

    #[test]
    fn tiny_target_is_context_unavailable() {
        let mut source = TestPattern::new(8, 8);
        let err = FrameSampler::new()
            .sample(&mut source, PhysicalSize::new(4, 4), scale(3))
            .unwrap_err();
        assert!(matches!(err, SampleError::ContextUnavailable { .. }));
    }

    struct Starved;

    impl VideoFrameSource for Starved {
        fn dimensions(&self) -> (u32, u32) {
            (0, 0)
        }

        fn current_frame(&mut self) -> Option<&RgbaImage> {
            None
        }
    }

    #[test]
    fn missing_frame_is_context_unavailable() {
        let err = FrameSampler::new()
            .sample(&mut Starved, PhysicalSize::new(300, 150), scale(1))
            .unwrap_err();
        assert!(matches!(
            err,
            SampleError::ContextUnavailable {
                width: 100,
                height: 50,
                ..
            }
        ));
    }

    #[test]
    fn texel_lookup_clamps_to_edges() {
        let image = RgbaImage::from_fn(2, 2, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        let buffer = FrameBuffer::from_image(image);
        assert_eq!(buffer.texel(-5, 0), [0, 0, 0, 255]);
        assert_eq!(buffer.texel(9, 9), [1, 1, 0, 255]);
    }

    #[test]
    fn test_pattern_moves_between_frames() {
        let mut pattern = TestPattern::new(32, 8);
        let first = pattern.current_frame().unwrap().clone();
        let second = pattern.current_frame().unwrap().clone();
        assert_ne!(first, second);
    }
}
