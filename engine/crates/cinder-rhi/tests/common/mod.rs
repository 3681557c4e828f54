#![allow(dead_code)]

use cinder_rhi::headless::HeadlessDevice;
use cinder_rhi::{Rhi, RhiConfig};

/// 小容量配置，方便触发容量相关的错误
pub fn small_config() -> RhiConfig {
    RhiConfig {
        frame_count: 2,
        max_buffers: 8,
        max_textures: 8,
        max_samplers: 4,
        max_root_signatures: 4,
        max_descriptor_tables: 4,
        max_pipelines: 4,
        max_shaders: 4,
        shader_resource_descriptors: 64,
        sampler_descriptors: 8,
        render_target_descriptors: 8,
        depth_stencil_descriptors: 4,
        upload_ring_bytes: 4096,
        max_duration_queries: 4,
        fence_timeout_ms: 100,
        back_buffer_width: 64,
        back_buffer_height: 64,
        ..RhiConfig::default()
    }
}

pub fn new_rhi(config: RhiConfig) -> Rhi<HeadlessDevice> {
    cinder_crate_tools::init_log::init_test_log();
    Rhi::new(HeadlessDevice::default(), config).unwrap()
}

/// 录制一个空帧并提交
pub fn empty_frame(rhi: &mut Rhi<HeadlessDevice>) {
    rhi.begin_frame().unwrap();
    rhi.end_frame().unwrap();
}
