//! The CRT effect program and its CPU reference model.
//!
//! Per output pixel, with `block = pixelSize * 3`:
//! - the first row of every block is a transparent scanline gap;
//! - the remaining rows sample the downsampled frame at `texCoord / 3` and
//!   add a bloom term derived from the four neighbouring texels;
//! - columns are split into phosphor stripes that keep only the red, green,
//!   or blue channel.
//!
//! Stripe boundaries are `ix < block / 3` for red and `ix < block / 3 + 1`
//! for green, so only the first third scales with the block. For a 6px block
//! the stripes are 2, 1, and 3 pixels wide.
//!
//! `gl_FragCoord` has a top-left origin with pixel centres at `n + 0.5`, so
//! the gap sits on the top row of each block.

use crate::sampler::FrameBuffer;

/// Texture coordinates span `[0, OVERSAMPLE]` across the quad.
pub const OVERSAMPLE: f32 = 3.0;

pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

pub const VERTEX_SHADER: &str = r"#version 450
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec2 a_texCoord;

layout(location = 0) out vec2 v_texCoord;

layout(std140, set = 0, binding = 0) uniform CrtParams {
    vec2 u_resolution;
    float u_brightBlur;
    uint u_pixelSize;
} params;

void main() {
    vec2 zeroToTwo = (a_position / params.u_resolution) * 2.0;
    vec2 clipSpace = zeroToTwo - 1.0;
    gl_Position = vec4(clipSpace * vec2(1.0, -1.0), 0.0, 1.0);
    v_texCoord = a_texCoord;
}
";

pub const FRAGMENT_SHADER: &str = r"#version 450
layout(location = 0) in vec2 v_texCoord;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform CrtParams {
    vec2 u_resolution;
    float u_brightBlur;
    uint u_pixelSize;
} params;

layout(set = 0, binding = 1) uniform texture2D u_image;
layout(set = 0, binding = 2) uniform sampler u_imageSampler;

vec4 sampleImage(vec2 uv) {
    return texture(sampler2D(u_image, u_imageSampler), uv);
}

void main() {
    float pixelSize = float(params.u_pixelSize) * 3.0;
    vec2 fragCoord = gl_FragCoord.xy;
    float ix = mod(fragCoord.x, pixelSize);
    float iy = mod(fragCoord.y, pixelSize);

    if (iy < 1.0) {
        outColor = vec4(0.0, 0.0, 0.0, 0.0);
        return;
    }

    vec2 tcoord = v_texCoord / 3.0;
    vec4 cl = sampleImage(tcoord);

    vec2 onePixel = vec2(1.0) / vec2(textureSize(sampler2D(u_image, u_imageSampler), 0));
    vec4 brightAvg = sampleImage(tcoord + vec2(onePixel.x, 0.0))
        + sampleImage(tcoord - vec2(onePixel.x, 0.0))
        + sampleImage(tcoord + vec2(0.0, onePixel.y))
        + sampleImage(tcoord - vec2(0.0, onePixel.y));

    float brightness = (0.299 * brightAvg.r + 0.587 * brightAvg.g + 0.114 * brightAvg.b) * params.u_brightBlur;
    brightness = brightness * brightness;

    if (ix < pixelSize / 3.0) {
        outColor = vec4(cl.r + brightness, 0.0, 0.0, 1.0);
    } else if (ix < pixelSize / 3.0 + 1.0) {
        outColor = vec4(0.0, cl.g + brightness, 0.0, 1.0);
    } else {
        outColor = vec4(0.0, 0.0, cl.b + brightness, 1.0);
    }
}
";

/// Texture coordinates of the two-triangle quad, oversampled by [`OVERSAMPLE`].
pub const QUAD_TEX_COORDS: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [OVERSAMPLE, 0.0],
    [0.0, OVERSAMPLE],
    [0.0, OVERSAMPLE],
    [OVERSAMPLE, 0.0],
    [OVERSAMPLE, OVERSAMPLE],
];

/// Pixel-space positions of a quad covering `(x, y)`-`(x + width, y + height)`.
pub fn quad_positions(x: f32, y: f32, width: f32, height: f32) -> [[f32; 2]; 6] {
    let (x1, x2) = (x, x + width);
    let (y1, y2) = (y, y + height);
    [[x1, y1], [x2, y1], [x1, y2], [x1, y2], [x2, y1], [x2, y2]]
}

/// Uniform values shared by the GPU program and [`shade`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectUniforms {
    pub resolution: [f32; 2],
    pub bright_blur: f32,
    pub pixel_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stripe {
    Red,
    Green,
    Blue,
}

/// `true` when `frag_y` falls on the scanline gap row of its block.
pub fn is_scanline_gap(frag_y: f32, pixel_size: u32) -> bool {
    let block = pixel_size as f32 * 3.0;
    glsl_mod(frag_y, block) < 1.0
}

pub fn stripe_at(frag_x: f32, pixel_size: u32) -> Stripe {
    let block = pixel_size as f32 * 3.0;
    let ix = glsl_mod(frag_x, block);
    if ix < block / 3.0 {
        Stripe::Red
    } else if ix < block / 3.0 + 1.0 {
        Stripe::Green
    } else {
        Stripe::Blue
    }
}

/// Squared luma of the summed neighbour colours, scaled by `gain`.
pub fn bloom(neighbour_sum: [f32; 3], gain: f32) -> f32 {
    let luma = LUMA_WEIGHTS[0] * neighbour_sum[0]
        + LUMA_WEIGHTS[1] * neighbour_sum[1]
        + LUMA_WEIGHTS[2] * neighbour_sum[2];
    let brightness = luma * gain;
    brightness * brightness
}

/// Evaluates the fragment program for one pixel.
///
/// `frag_coord` is the pixel centre and `tex_coord` the interpolated
/// `v_texCoord`, both as the rasterizer would supply them.
pub fn shade(
    frag_coord: [f32; 2],
    tex_coord: [f32; 2],
    uniforms: &EffectUniforms,
    image: &FrameBuffer,
) -> [f32; 4] {
    if is_scanline_gap(frag_coord[1], uniforms.pixel_size) {
        return [0.0; 4];
    }

    let uv = [tex_coord[0] / OVERSAMPLE, tex_coord[1] / OVERSAMPLE];
    let cl = sample_nearest(image, uv);

    let one_pixel = [1.0 / image.width() as f32, 1.0 / image.height() as f32];
    let neighbours = [
        sample_nearest(image, [uv[0] + one_pixel[0], uv[1]]),
        sample_nearest(image, [uv[0] - one_pixel[0], uv[1]]),
        sample_nearest(image, [uv[0], uv[1] + one_pixel[1]]),
        sample_nearest(image, [uv[0], uv[1] - one_pixel[1]]),
    ];
    let mut sum = [0.0f32; 3];
    for texel in &neighbours {
        for (total, channel) in sum.iter_mut().zip(texel.iter()) {
            *total += channel;
        }
    }
    let glow = bloom(sum, uniforms.bright_blur);

    match stripe_at(frag_coord[0], uniforms.pixel_size) {
        Stripe::Red => [cl[0] + glow, 0.0, 0.0, 1.0],
        Stripe::Green => [0.0, cl[1] + glow, 0.0, 1.0],
        Stripe::Blue => [0.0, 0.0, cl[2] + glow, 1.0],
    }
}

/// NEAREST filtering with clamp-to-edge addressing, normalised to `[0, 1]`.
pub fn sample_nearest(image: &FrameBuffer, uv: [f32; 2]) -> [f32; 4] {
    let x = (uv[0] * image.width() as f32).floor() as i64;
    let y = (uv[1] * image.height() as f32).floor() as i64;
    image.texel(x, y).map(|channel| f32::from(channel) / 255.0)
}

/// GLSL `mod`: `x - y * floor(x / y)`.
fn glsl_mod(x: f32, y: f32) -> f32 {
    x - y * (x / y).floor()
}
