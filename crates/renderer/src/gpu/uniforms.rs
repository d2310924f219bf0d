use bytemuck::{Pod, Zeroable};

use crate::effect::EffectUniforms;
use crate::types::RenderParameters;

/// std140 image of the `CrtParams` block.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct CrtUniforms {
    pub resolution: [f32; 2],
    pub bright_blur: f32,
    pub pixel_size: u32,
}

impl CrtUniforms {
    pub fn from_params(params: &RenderParameters) -> Self {
        Self {
            resolution: params.resolution(),
            bright_blur: params.brightness,
            pixel_size: params.pixel_scale.get(),
        }
    }
}

impl From<CrtUniforms> for EffectUniforms {
    fn from(value: CrtUniforms) -> Self {
        Self {
            resolution: value.resolution,
            bright_blur: value.bright_blur,
            pixel_size: value.pixel_size,
        }
    }
}
