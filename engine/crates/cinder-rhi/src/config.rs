use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::descriptor::DescriptorHeapKind;
use crate::error::{RhiError, RhiResult};
use crate::handle::{Handle, ResourceKind};
use crate::resources::format::TextureFormat;

/// 最多同时在飞的帧数
pub const MAX_FRAMES_IN_FLIGHT: u32 = 4;

/// RHI 的所有固定容量
///
/// 容量在 `Rhi::new` 时确定，之后不会增长。可以从 TOML 加载，缺省的字段使用默认值。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiConfig {
    pub frame_count: u32,

    pub max_buffers: u32,
    pub max_textures: u32,
    pub max_samplers: u32,
    pub max_root_signatures: u32,
    pub max_descriptor_tables: u32,
    pub max_pipelines: u32,
    pub max_shaders: u32,

    pub shader_resource_descriptors: u32,
    pub sampler_descriptors: u32,
    pub render_target_descriptors: u32,
    pub depth_stencil_descriptors: u32,

    pub upload_ring_bytes: u64,
    /// 每帧的 duration query 上限
    pub max_duration_queries: u32,
    pub fence_timeout_ms: u64,

    pub back_buffer_width: u32,
    pub back_buffer_height: u32,
    pub back_buffer_format: TextureFormat,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            frame_count: 2,

            max_buffers: 1024,
            max_textures: 4096,
            max_samplers: 64,
            max_root_signatures: 64,
            max_descriptor_tables: 64,
            max_pipelines: 1024,
            max_shaders: 1024,

            shader_resource_descriptors: 8192,
            sampler_descriptors: 64,
            render_target_descriptors: 64,
            depth_stencil_descriptors: 16,

            upload_ring_bytes: 64 << 20,
            max_duration_queries: 64,
            fence_timeout_ms: 5000,

            back_buffer_width: 1280,
            back_buffer_height: 720,
            back_buffer_format: TextureFormat::Rgba8Unorm,
        }
    }
}

impl RhiConfig {
    pub fn from_toml_str(text: &str) -> RhiResult<Self> {
        let config: Self = toml::from_str(text).map_err(|err| RhiError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> RhiResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| RhiError::InvalidConfig(format!("cannot read {}: {err}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        log::info!("RHI config loaded from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> RhiResult<String> {
        toml::to_string_pretty(self).map_err(|err| RhiError::InvalidConfig(err.to_string()))
    }

    pub fn validate(&self) -> RhiResult<()> {
        let fail = |message: String| Err(RhiError::InvalidConfig(message));

        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frame_count) {
            return fail(format!("frame_count must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}", self.frame_count));
        }
        for kind in ResourceKind::ALL {
            let capacity = self.pool_capacity(kind);
            if capacity == 0 || capacity > Handle::MAX_INDEX {
                return fail(format!("the {kind} pool capacity must be in 1..={}, got {capacity}", Handle::MAX_INDEX));
            }
        }
        for kind in DescriptorHeapKind::ALL {
            if self.descriptor_capacities()[kind.index()] == 0 {
                return fail(format!("the {kind} heap needs at least one descriptor"));
            }
        }
        // 每帧的 back buffer 都需要一个 RTV
        if self.render_target_descriptors < self.frame_count {
            return fail(format!(
                "render_target_descriptors ({}) must cover the {} back buffers",
                self.render_target_descriptors, self.frame_count
            ));
        }
        if self.max_textures <= self.frame_count {
            return fail(format!(
                "max_textures ({}) must leave room beyond the {} back buffers",
                self.max_textures, self.frame_count
            ));
        }
        if self.upload_ring_bytes == 0 {
            return fail("upload_ring_bytes must be positive".to_string());
        }
        if self.max_duration_queries == 0 {
            return fail("max_duration_queries must be positive".to_string());
        }
        if self.fence_timeout_ms == 0 {
            return fail("fence_timeout_ms must be positive".to_string());
        }
        if self.back_buffer_width == 0 || self.back_buffer_height == 0 {
            return fail("the back buffer cannot be empty".to_string());
        }
        if self.back_buffer_format.is_depth_stencil() {
            return fail("the back buffer cannot use a depth-stencil format".to_string());
        }
        Ok(())
    }

    pub fn pool_capacity(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Buffer => self.max_buffers,
            ResourceKind::Texture => self.max_textures,
            ResourceKind::Sampler => self.max_samplers,
            ResourceKind::RootSignature => self.max_root_signatures,
            ResourceKind::DescriptorTable => self.max_descriptor_tables,
            ResourceKind::Pipeline => self.max_pipelines,
            ResourceKind::Shader => self.max_shaders,
        }
    }

    /// 按 [`DescriptorHeapKind::index`] 排列
    pub fn descriptor_capacities(&self) -> [u32; 4] {
        [
            self.shader_resource_descriptors,
            self.sampler_descriptors,
            self.render_target_descriptors,
            self.depth_stencil_descriptors,
        ]
    }

    #[inline]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RhiConfig::default();
        config.validate().unwrap();
        assert_eq!(config.upload_ring_bytes, 64 * 1024 * 1024);
        assert_eq!(config.fence_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RhiConfig::from_toml_str(
            r#"
            frame_count = 3
            max_textures = 16
            back_buffer_format = "Rgba16Float"
            "#,
        )
        .unwrap();
        assert_eq!(config.frame_count, 3);
        assert_eq!(config.max_textures, 16);
        assert_eq!(config.back_buffer_format, TextureFormat::Rgba16Float);
        assert_eq!(config.max_buffers, RhiConfig::default().max_buffers);
    }

    #[test]
    fn toml_round_trip() {
        let mut config = RhiConfig::default();
        config.max_pipelines = 12;
        let text = config.to_toml_string().unwrap();
        assert_eq!(RhiConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(RhiConfig::from_toml_str("frame_count = 0"), Err(RhiError::InvalidConfig(_))));
        assert!(RhiConfig::from_toml_str("frame_count = 5").is_err());
        assert!(RhiConfig::from_toml_str("max_buffers = 70000").is_err());
        assert!(RhiConfig::from_toml_str("upload_ring_bytes = 0").is_err());
        assert!(RhiConfig::from_toml_str("back_buffer_format = \"Depth24UnormStencil8\"").is_err());
        assert!(RhiConfig::from_toml_str("frame_count = \"two\"").is_err());
    }
}
