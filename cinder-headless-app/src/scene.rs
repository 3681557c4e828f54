use cinder_rhi::device::RhiDevice;
use cinder_rhi::resources::buffer::BufferDesc;
use cinder_rhi::resources::descriptor_table::{DescriptorResources, DescriptorTableDesc};
use cinder_rhi::resources::format::{DataType, DescriptorType, PipelineType, ShaderSemantic, TextureFilter, WrapMode};
use cinder_rhi::resources::pipeline::{DepthStencilState, GraphicsPipelineDesc, VertexLayout};
use cinder_rhi::resources::root_signature::RootSignatureDesc;
use cinder_rhi::resources::sampler::SamplerDesc;
use cinder_rhi::resources::shader::ShaderDesc;
use cinder_rhi::resources::states::{MemoryUsage, ResourceStates, ShaderStage};
use cinder_rhi::resources::texture::{TextureDesc, TextureUpload};
use cinder_rhi::{
    BufferHandle, DescriptorTableHandle, PipelineHandle, Rhi, RhiResult, RootSignatureHandle, SamplerHandle,
};

/// 已编译的 SPIR-V
pub struct ShaderBytes {
    pub vertex: Vec<u8>,
    pub pixel: Vec<u8>,
}

impl ShaderBytes {
    /// 只有 SPIR-V magic number，headless 设备足够用了
    pub fn placeholder() -> Self {
        Self {
            vertex: 0x0723_0203u32.to_le_bytes().to_vec(),
            pixel: 0x0723_0203u32.to_le_bytes().to_vec(),
        }
    }
}

/// 跨关卡共享的对象，persistent
struct SharedObjects {
    root_signature: RootSignatureHandle,
    sampler: SamplerHandle,
    pipeline: Option<PipelineHandle>,
}

/// 每个关卡自己的对象，short-lived，切换关卡时被 sweep
struct LevelObjects {
    vertices: BufferHandle,
    table: DescriptorTableHandle,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PixelConstants {
    tint: [f32; 4],
}

pub struct DemoRunner {
    pub frames_per_level: u32,
    pub levels: u32,
}

impl Default for DemoRunner {
    fn default() -> Self {
        Self {
            frames_per_level: 8,
            levels: 2,
        }
    }
}

impl DemoRunner {
    pub fn run<D: RhiDevice>(&self, rhi: &mut Rhi<D>, shaders: Option<ShaderBytes>) -> RhiResult<()> {
        let _span = cinder_rhi::profile_span!("DemoRunner::run");
        let shared = Self::create_shared(rhi, shaders)?;
        if shared.pipeline.is_none() {
            log::warn!("no shaders provided, frames only clear the back buffer");
        }

        for level in 0..self.levels {
            if level > 0 {
                rhi.wait_until_device_idle()?;
                let report = rhi.sweep_short_lived()?;
                log::info!("level {level}: swept {report}");
            }

            let objects = Self::load_level(rhi, &shared, level)?;
            for _ in 0..self.frames_per_level {
                Self::render_frame(rhi, &shared, &objects, level)?;
            }
        }

        rhi.wait_until_device_idle()?;
        log::info!(
            "demo finished after frame {}: {} resources alive, {} uploads through the ring",
            rhi.frame_name(),
            rhi.live_resource_count(),
            rhi.upload_ring().total_uploads()
        );
        Ok(())
    }

    fn create_shared<D: RhiDevice>(rhi: &mut Rhi<D>, shaders: Option<ShaderBytes>) -> RhiResult<SharedObjects> {
        let root_signature = rhi.create_root_signature(
            &RootSignatureDesc::new("textured", PipelineType::Graphics)
                .with_vertex_buffers()
                .with_constants(ShaderStage::Pixel, size_of::<PixelConstants>() as u32)
                .add_range(DescriptorType::Texture, 0, 1)
                .with_samplers(1),
        )?;
        let sampler = rhi.create_sampler(&SamplerDesc::new("linear-repeat", WrapMode::Repeat, TextureFilter::Linear))?;

        let pipeline = match shaders {
            Some(shaders) => {
                let vs = rhi.create_shader(&ShaderDesc::new("triangle.vs", ShaderStage::Vertex, shaders.vertex))?;
                let ps = rhi.create_shader(&ShaderDesc::new("triangle.ps", ShaderStage::Pixel, shaders.pixel))?;
                let format = rhi.config().back_buffer_format;
                let pipeline = rhi.create_graphics_pipeline(
                    &GraphicsPipelineDesc::new("triangle", root_signature, vs)
                        .with_pixel_shader(ps)
                        .with_vertex_layout(VertexLayout::default().add_attribute(
                            ShaderSemantic::Position,
                            DataType::Float32,
                            3,
                        ))
                        .with_depth_stencil(DepthStencilState::disabled())
                        .add_render_target(format, None),
                )?;
                Some(pipeline)
            }
            None => None,
        };

        Ok(SharedObjects {
            root_signature,
            sampler,
            pipeline,
        })
    }

    fn load_level<D: RhiDevice>(rhi: &mut Rhi<D>, shared: &SharedObjects, level: u32) -> RhiResult<LevelObjects> {
        let _span = cinder_rhi::profile_span!("DemoRunner::load_level");

        let positions: [[f32; 3]; 3] = [[0.0, -0.5, 0.0], [0.5, 0.5, 0.0], [-0.5, 0.5, 0.0]];
        let vertices = rhi.create_buffer(
            &BufferDesc::new(format!("level {level} vertices"), size_of_val(&positions) as u64, ResourceStates::VERTEX_BUFFER)
                .with_memory_usage(MemoryUsage::Gpu)
                .short_lived(),
        )?;
        rhi.upload_buffer(vertices, 0, bytemuck::cast_slice(&positions))?;

        // 每个关卡一张不同颜色的棋盘格
        let size = 8;
        let accent = [255, (level * 80 % 256) as u8, 64, 255];
        let pixels = (0..size * size)
            .flat_map(|i| if (i / size + i % size) % 2 == 0 { accent } else { [32, 32, 32, 255] })
            .collect::<Vec<u8>>();
        let albedo = rhi.create_texture(
            &TextureDesc::new(format!("level {level} albedo"), size, size, 1)
                .allow(ResourceStates::COPY_DESTINATION)
                .short_lived(),
        )?;
        rhi.upload_texture(albedo, &TextureUpload::full(size, size, &pixels))?;

        let table = rhi.create_descriptor_table(
            &DescriptorTableDesc::new(format!("level {level} material"), shared.root_signature).short_lived(),
        )?;
        rhi.update_descriptor_table(table, 0, DescriptorResources::Textures(&[albedo]))?;
        rhi.update_descriptor_table(table, 0, DescriptorResources::Samplers(&[shared.sampler]))?;

        log::info!("level {level} loaded, {} resources alive", rhi.live_resource_count());
        Ok(LevelObjects {
            vertices,
            table,
        })
    }

    fn render_frame<D: RhiDevice>(
        rhi: &mut Rhi<D>,
        shared: &SharedObjects,
        objects: &LevelObjects,
        level: u32,
    ) -> RhiResult<()> {
        rhi.begin_frame()?;
        for sample in rhi.get_durations() {
            log::info!("{} level {level} '{}': {} us", rhi.frame_name(), sample.name, sample.micros);
        }

        let back_buffer = rhi.swap_chain_texture();
        let (width, height) = (rhi.config().back_buffer_width, rhi.config().back_buffer_height);

        let scene = rhi.cmd_begin_duration_query("scene")?;
        rhi.cmd_bind_render_targets(&[back_buffer], None)?;
        rhi.cmd_clear_color_target(back_buffer)?;
        rhi.cmd_set_viewport(0, 0, width, height)?;
        rhi.cmd_set_scissor(0, 0, width, height)?;

        if let Some(pipeline) = shared.pipeline {
            let stride = size_of::<[f32; 3]>() as u32;
            let pulse = (rhi.frame_id() % 60) as f32 / 60.0;
            rhi.cmd_bind_root_signature(shared.root_signature)?;
            rhi.cmd_bind_pipeline(pipeline)?;
            rhi.cmd_bind_descriptor_table(shared.root_signature, objects.table)?;
            rhi.cmd_bind_vertex_buffers(&[objects.vertices], &[stride], &[0])?;
            rhi.cmd_set_root_constants_typed(
                shared.root_signature,
                ShaderStage::Pixel,
                &PixelConstants {
                    tint: [1.0, pulse, pulse, 1.0],
                },
            )?;
            rhi.cmd_draw(3, 0)?;
        }
        rhi.cmd_end_duration_query(scene)?;
        rhi.end_frame()
    }
}
