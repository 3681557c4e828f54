use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{RhiError, RhiResult};

bitflags! {
    /// 资源的使用状态，barrier 在这些状态之间转换
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const RENDER_TARGET = 1 << 3;
        const VERTEX_SHADER_ACCESS = 1 << 4;
        const PIXEL_SHADER_ACCESS = 1 << 5;
        const COMPUTE_SHADER_ACCESS = 1 << 6;
        const COPY_SOURCE = 1 << 7;
        const COPY_DESTINATION = 1 << 8;
        const DEPTH_READ = 1 << 9;
        const DEPTH_WRITE = 1 << 10;
        const UNORDERED_ACCESS = 1 << 11;

        const SHADER_ACCESS = Self::VERTEX_SHADER_ACCESS.bits()
            | Self::PIXEL_SHADER_ACCESS.bits()
            | Self::COMPUTE_SHADER_ACCESS.bits();
        const DEPTH_ACCESS = Self::DEPTH_READ.bits() | Self::DEPTH_WRITE.bits();
    }
}

impl ResourceStates {
    /// 会写入资源的状态，必须单独出现
    pub const WRITE_STATES: ResourceStates = ResourceStates::RENDER_TARGET
        .union(ResourceStates::COPY_DESTINATION)
        .union(ResourceStates::DEPTH_WRITE)
        .union(ResourceStates::UNORDERED_ACCESS);

    #[inline]
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    /// 读写混合的状态组合（或多个写状态的组合）是非法的
    pub fn validate(self) -> RhiResult<Self> {
        if self.is_write() && self.bits().count_ones() > 1 {
            return Err(RhiError::InvalidResourceState(self));
        }
        Ok(self)
    }

    #[inline]
    pub fn is_shader_visible(self) -> bool {
        self.intersects(Self::SHADER_ACCESS | Self::CONSTANT_BUFFER | Self::UNORDERED_ACCESS)
    }
}

/// 资源所在的内存类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryUsage {
    /// CPU 读写，GPU 不直接访问
    Cpu,
    /// GPU 独占
    Gpu,
    /// CPU -> GPU
    #[default]
    Upload,
    /// GPU -> CPU
    Readback,
}

impl MemoryUsage {
    #[inline]
    pub fn is_cpu_visible(self) -> bool {
        !matches!(self, MemoryUsage::Gpu)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 3] = [ShaderStage::Vertex, ShaderStage::Pixel, ShaderStage::Compute];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Pixel => 1,
            ShaderStage::Compute => 2,
        }
    }

    #[inline]
    pub const fn flag(self) -> ShaderStages {
        match self {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Pixel => ShaderStages::PIXEL,
            ShaderStage::Compute => ShaderStages::COMPUTE,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const COMPUTE = 1 << 2;

        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::PIXEL.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_combinations_are_valid() {
        let state = ResourceStates::PIXEL_SHADER_ACCESS | ResourceStates::COPY_SOURCE | ResourceStates::DEPTH_READ;
        assert_eq!(state.validate().unwrap(), state);
        assert!(ResourceStates::COMMON.validate().is_ok());
        assert!(ResourceStates::UNORDERED_ACCESS.validate().is_ok());
    }

    #[test]
    fn write_states_must_be_exclusive() {
        let read_write = ResourceStates::RENDER_TARGET | ResourceStates::PIXEL_SHADER_ACCESS;
        assert!(matches!(read_write.validate(), Err(RhiError::InvalidResourceState(s)) if s == read_write));

        let two_writes = ResourceStates::COPY_DESTINATION | ResourceStates::UNORDERED_ACCESS;
        assert!(two_writes.validate().is_err());

        // DEPTH_ACCESS 同时包含读和写
        assert!(ResourceStates::DEPTH_ACCESS.validate().is_err());
    }
}
