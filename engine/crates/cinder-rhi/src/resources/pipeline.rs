use crate::device::NativePipeline;
use crate::error::{RhiError, RhiResult};
use crate::handle::{RootSignatureHandle, ShaderHandle};
use crate::lifetime::{Lifetime, LifetimeTagged};
use crate::resources::format::{
    BlendState, ComparisonFunction, CullMode, DataType, PipelineType, ShaderSemantic, TextureFormat,
};
use crate::resources::{MAX_RENDER_TARGETS, MAX_VERTEX_BUFFERS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub semantic: ShaderSemantic,
    pub data_type: DataType,
    /// 分量个数，1..=4
    pub vector_length: u32,
    pub buffer_index: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub attributes: Vec<VertexAttribute>,
    /// 每个顶点 buffer binding 的 stride
    pub binding_strides: Vec<u32>,
}

impl VertexLayout {
    /// 追加一个紧密排列在独立 buffer 中的属性
    pub fn add_attribute(mut self, semantic: ShaderSemantic, data_type: DataType, vector_length: u32) -> Self {
        let buffer_index = self.binding_strides.len() as u32;
        self.attributes.push(VertexAttribute {
            semantic,
            data_type,
            vector_length,
            buffer_index,
            offset: 0,
        });
        self.binding_strides.push(data_type.byte_size() * vector_length);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthStencilState {
    pub enable_depth_test: bool,
    pub enable_depth_writes: bool,
    pub depth_comparison: ComparisonFunction,
    pub format: TextureFormat,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            enable_depth_test: true,
            enable_depth_writes: true,
            depth_comparison: ComparisonFunction::GreaterEqual,
            format: TextureFormat::Depth24UnormStencil8,
        }
    }
}

impl DepthStencilState {
    pub fn disabled() -> Self {
        Self {
            enable_depth_test: false,
            enable_depth_writes: false,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetState {
    /// `None` 表示不混合
    pub blend: Option<BlendState>,
    pub format: TextureFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub name: String,
    pub root_signature: RootSignatureHandle,
    pub vertex_shader: ShaderHandle,
    pub pixel_shader: Option<ShaderHandle>,
    pub vertex_layout: VertexLayout,
    pub depth_stencil: DepthStencilState,
    pub cull_mode: CullMode,
    pub render_targets: Vec<RenderTargetState>,
    pub lifetime: Lifetime,
}

impl GraphicsPipelineDesc {
    pub fn new(name: impl Into<String>, root_signature: RootSignatureHandle, vertex_shader: ShaderHandle) -> Self {
        Self {
            name: name.into(),
            root_signature,
            vertex_shader,
            pixel_shader: None,
            vertex_layout: VertexLayout::default(),
            depth_stencil: DepthStencilState::default(),
            cull_mode: CullMode::default(),
            render_targets: Vec::new(),
            lifetime: Lifetime::Persistent,
        }
    }

    #[inline]
    pub fn with_pixel_shader(mut self, shader: ShaderHandle) -> Self {
        self.pixel_shader = Some(shader);
        self
    }

    #[inline]
    pub fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    #[inline]
    pub fn with_depth_stencil(mut self, state: DepthStencilState) -> Self {
        self.depth_stencil = state;
        self
    }

    #[inline]
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    #[inline]
    pub fn add_render_target(mut self, format: TextureFormat, blend: Option<BlendState>) -> Self {
        self.render_targets.push(RenderTargetState { blend, format });
        self
    }

    #[inline]
    pub fn short_lived(mut self) -> Self {
        self.lifetime = Lifetime::ShortLived;
        self
    }

    /// 不依赖池中其它资源的检查
    pub fn validate(&self) -> RhiResult<()> {
        let fail = |message: String| Err(RhiError::invalid_argument(format!("pipeline '{}': {message}", self.name)));

        if self.render_targets.len() > MAX_RENDER_TARGETS {
            return fail(format!(
                "{} render targets, at most {MAX_RENDER_TARGETS} are supported",
                self.render_targets.len()
            ));
        }
        if self.render_targets.iter().any(|rt| rt.format.is_depth_stencil()) {
            return fail("render targets cannot use a depth-stencil format".to_string());
        }
        if (self.depth_stencil.enable_depth_test || self.depth_stencil.enable_depth_writes)
            && !self.depth_stencil.format.is_depth_stencil()
        {
            return fail(format!("{:?} is not a depth-stencil format", self.depth_stencil.format));
        }

        let layout = &self.vertex_layout;
        if layout.attributes.len() > MAX_VERTEX_BUFFERS || layout.binding_strides.len() > MAX_VERTEX_BUFFERS {
            return fail(format!("at most {MAX_VERTEX_BUFFERS} vertex attributes and buffers are supported"));
        }
        for attribute in &layout.attributes {
            if !(1..=4).contains(&attribute.vector_length) {
                return fail(format!("{:?} has vector length {}", attribute.semantic, attribute.vector_length));
            }
            if attribute.buffer_index as usize >= layout.binding_strides.len() {
                return fail(format!(
                    "{:?} reads vertex buffer {} which has no stride",
                    attribute.semantic, attribute.buffer_index
                ));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub name: String,
    pub root_signature: RootSignatureHandle,
    pub shader: ShaderHandle,
    pub lifetime: Lifetime,
}

impl ComputePipelineDesc {
    pub fn new(name: impl Into<String>, root_signature: RootSignatureHandle, shader: ShaderHandle) -> Self {
        Self {
            name: name.into(),
            root_signature,
            shader,
            lifetime: Lifetime::Persistent,
        }
    }

    #[inline]
    pub fn short_lived(mut self) -> Self {
        self.lifetime = Lifetime::ShortLived;
        self
    }
}

#[derive(Debug)]
pub struct PipelineRecord {
    pub(crate) name: String,
    pub(crate) pipeline_type: PipelineType,
    pub(crate) root_signature: RootSignatureHandle,
    pub(crate) native: NativePipeline,
    pub(crate) lifetime: Lifetime,
}

impl PipelineRecord {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }
    #[inline]
    pub fn root_signature(&self) -> RootSignatureHandle {
        self.root_signature
    }
    #[inline]
    pub fn native(&self) -> NativePipeline {
        self.native
    }
}

impl LifetimeTagged for PipelineRecord {
    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Handle, PoolHandle, ResourceKind};

    fn handles() -> (RootSignatureHandle, ShaderHandle) {
        (
            RootSignatureHandle::from_raw(Handle::new(ResourceKind::RootSignature, 0, 0)),
            ShaderHandle::from_raw(Handle::new(ResourceKind::Shader, 0, 0)),
        )
    }

    #[test]
    fn vertex_layout_builder_packs_one_buffer_per_attribute() {
        let layout = VertexLayout::default()
            .add_attribute(ShaderSemantic::Position, DataType::Float32, 3)
            .add_attribute(ShaderSemantic::Color, DataType::UNorm8, 4);
        assert_eq!(layout.binding_strides, vec![12, 4]);
        assert_eq!(layout.attributes[1].buffer_index, 1);
    }

    #[test]
    fn too_many_render_targets_are_rejected() {
        let (root_signature, shader) = handles();
        let mut desc = GraphicsPipelineDesc::new("gbuffer", root_signature, shader);
        for _ in 0..=MAX_RENDER_TARGETS {
            desc = desc.add_render_target(TextureFormat::Rgba16Float, None);
        }
        assert!(desc.validate().is_err());
    }

    #[test]
    fn attribute_needs_a_stride_and_sane_length() {
        let (root_signature, shader) = handles();
        let mut layout = VertexLayout::default().add_attribute(ShaderSemantic::Position, DataType::Float32, 3);
        layout.attributes[0].vector_length = 5;
        let desc = GraphicsPipelineDesc::new("bad", root_signature, shader).with_vertex_layout(layout.clone());
        assert!(desc.validate().is_err());

        layout.attributes[0].vector_length = 3;
        layout.attributes[0].buffer_index = 2;
        let desc = GraphicsPipelineDesc::new("bad", root_signature, shader).with_vertex_layout(layout);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn depth_state_needs_depth_format() {
        let (root_signature, shader) = handles();
        let mut state = DepthStencilState::default();
        state.format = TextureFormat::Rgba8Unorm;
        let desc = GraphicsPipelineDesc::new("bad", root_signature, shader).with_depth_stencil(state);
        assert!(desc.validate().is_err());

        let desc = GraphicsPipelineDesc::new("ui", root_signature, shader)
            .with_depth_stencil(DepthStencilState::disabled())
            .add_render_target(TextureFormat::Rgba8Unorm, Some(BlendState::ALPHA));
        assert!(desc.validate().is_ok());
    }
}
