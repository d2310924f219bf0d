use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use crate::effect::{quad_positions, QUAD_TEX_COORDS};
use crate::sampler::FrameBuffer;
use crate::types::{RenderFailure, RenderParameters};

use super::context::GpuContext;
use super::pipeline::CrtPipeline;
use super::uniforms::CrtUniforms;

/// Texture holding the latest frame buffer and the bind group that exposes it.
struct FrameTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    size: PhysicalSize<u32>,
}

/// Every GPU handle the engine owns. Built in one piece or not at all.
pub(crate) struct GpuResources {
    context: GpuContext,
    pipeline: CrtPipeline,
    uniform_buffer: wgpu::Buffer,
    position_buffer: wgpu::Buffer,
    tex_coord_buffer: wgpu::Buffer,
    frame: Option<FrameTexture>,
    quad_size: PhysicalSize<u32>,
}

impl GpuResources {
    pub(crate) fn new(context: GpuContext, pipeline: CrtPipeline) -> Self {
        let device = &context.device;
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("crt uniforms"),
            size: std::mem::size_of::<CrtUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let size = context.size;
        let position_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("crt positions"),
            contents: bytemuck::cast_slice(&quad_positions(
                0.0,
                0.0,
                size.width as f32,
                size.height as f32,
            )),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        let tex_coord_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("crt texcoords"),
            contents: bytemuck::cast_slice(&QUAD_TEX_COORDS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            context,
            pipeline,
            uniform_buffer,
            position_buffer,
            tex_coord_buffer,
            frame: None,
            quad_size: size,
        }
    }

    pub(crate) fn surface_size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    pub(crate) fn draw(
        &mut self,
        frame: &FrameBuffer,
        params: &RenderParameters,
    ) -> Result<(), RenderFailure> {
        if self.context.resize(params.viewport) {
            tracing::debug!(
                width = params.viewport.width,
                height = params.viewport.height,
                "resized overlay surface"
            );
        }
        self.sync_quad();

        let output = self.acquire()?;

        let uniforms = CrtUniforms::from_params(params);
        self.context
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        self.upload_frame(frame)?;
        let Some(frame_texture) = self.frame.as_ref() else {
            return Ok(());
        };

        self.present(output, Some(frame_texture));
        Ok(())
    }

    /// Presents a transparent frame without drawing the quad.
    pub(crate) fn clear(&mut self) -> Result<(), RenderFailure> {
        let output = self.acquire()?;
        self.present(output, None);
        tracing::debug!("presented cleared overlay frame");
        Ok(())
    }

    fn acquire(&mut self) -> Result<wgpu::SurfaceTexture, RenderFailure> {
        match self.context.surface.get_current_texture() {
            Ok(output) => Ok(output),
            Err(err) => {
                if matches!(err, wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) {
                    self.context.reconfigure();
                }
                Err(RenderFailure::Surface(err))
            }
        }
    }

    /// Clears to transparent, draws the quad when a frame is bound, presents.
    fn present(&self, output: wgpu::SurfaceTexture, frame: Option<&FrameTexture>) {
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("crt encoder"),
                });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("crt pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            if let Some(frame) = frame {
                render_pass.set_pipeline(&self.pipeline.pipeline);
                render_pass.set_bind_group(0, &frame.bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.position_buffer.slice(..));
                render_pass.set_vertex_buffer(1, self.tex_coord_buffer.slice(..));
                render_pass.draw(0..QUAD_TEX_COORDS.len() as u32, 0..1);
            }
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }

    /// Rewrites the quad when the backing size changed since the last frame.
    fn sync_quad(&mut self) {
        let size = self.context.size;
        if size == self.quad_size {
            return;
        }
        let positions = quad_positions(0.0, 0.0, size.width as f32, size.height as f32);
        self.context
            .queue
            .write_buffer(&self.position_buffer, 0, bytemuck::cast_slice(&positions));
        self.quad_size = size;
    }

    /// Full replace of the frame texture, reallocating when the size changes.
    fn upload_frame(&mut self, frame: &FrameBuffer) -> Result<(), RenderFailure> {
        let size = frame.size();
        let limit = self.context.max_texture_dimension;
        if size.width > limit || size.height > limit {
            return Err(RenderFailure::TextureTooLarge {
                width: size.width,
                height: size.height,
                limit,
            });
        }

        if self.frame.as_ref().map(|current| current.size) != Some(size) {
            self.frame = Some(self.create_frame_texture(size));
        }
        let Some(current) = self.frame.as_ref() else {
            return Ok(());
        };

        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &current.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_frame_texture(&self, size: PhysicalSize<u32>) -> FrameTexture {
        let device = &self.context.device;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("crt frame"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("crt bind group"),
            layout: &self.pipeline.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.pipeline.sampler),
                },
            ],
        });
        tracing::debug!(width = size.width, height = size.height, "allocated frame texture");
        FrameTexture {
            texture,
            bind_group,
            size,
        }
    }
}
