//! wgpu plumbing behind [`ShaderEngine`](crate::ShaderEngine).
//!
//! - `context` owns instance/device/surface wiring and reconfigures the
//!   surface when the displayed size changes.
//! - `pipeline` compiles the CRT program and links it into a render pipeline
//!   with a single bind group (uniforms, frame texture, NEAREST sampler).
//! - `uniforms` mirrors the std140 `CrtParams` block.
//! - `resources` bundles all of the above with the vertex buffers and frame
//!   texture and records one draw per frame.

mod context;
mod pipeline;
mod resources;
mod uniforms;

pub(crate) use context::GpuContext;
pub(crate) use pipeline::CrtPipeline;
pub(crate) use resources::GpuResources;
pub(crate) use uniforms::CrtUniforms;
