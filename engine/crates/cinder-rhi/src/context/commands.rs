use crate::context::Rhi;
use crate::descriptor::{DescriptorHeapKind, DescriptorIndex};
use crate::device::{BufferTransition, NativeCommand, NativeView, RhiDevice, TextureTransition};
use crate::error::{RhiError, RhiResult};
use crate::handle::{
    BufferHandle, DescriptorTableHandle, PipelineHandle, PoolHandle, RootSignatureHandle, TextureHandle,
};
use crate::queries::DurationQueryId;
use crate::resources::format::IndexType;
use crate::resources::states::{ResourceStates, ShaderStage};
use crate::resources::{MAX_RENDER_TARGETS, MAX_VERTEX_BUFFERS};

/// texture 转换到 `state`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBarrier {
    pub texture: TextureHandle,
    pub state: ResourceStates,
}

impl TextureBarrier {
    #[inline]
    pub fn new(texture: TextureHandle, state: ResourceStates) -> Self {
        Self { texture, state }
    }
}

/// buffer 转换到 `state`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub state: ResourceStates,
}

impl BufferBarrier {
    #[inline]
    pub fn new(buffer: BufferHandle, state: ResourceStates) -> Self {
        Self { buffer, state }
    }
}

// tools
impl<D: RhiDevice> Rhi<D> {
    /// 录制到临时 command list（如果打开），否则录制到当前帧
    fn record(&mut self, command: NativeCommand) -> RhiResult<()> {
        let recorder = self.frames.active_recorder()?;
        recorder.record(&mut self.device, command);
        Ok(())
    }

    fn view_of(&self, kind: DescriptorHeapKind, index: DescriptorIndex) -> RhiResult<NativeView> {
        self.heaps.view(kind, index).ok_or(RhiError::DescriptorDoubleFree { heap: kind, index: index.0 })
    }
}

// barrier
impl<D: RhiDevice> Rhi<D> {
    /// 状态转换；已经处于目标状态的资源被跳过，其余的合并成一个 native barrier
    ///
    /// 所有转换在生效前先检查，任何一个非法时不会改变任何资源的状态。
    pub fn cmd_barrier(&mut self, textures: &[TextureBarrier], buffers: &[BufferBarrier]) -> RhiResult<()> {
        self.frames.active_recorder()?;

        for barrier in textures {
            barrier.state.validate()?;
            let allowed = self.textures.get(barrier.texture)?.desc.all_allowed_states();
            if !allowed.contains(barrier.state) {
                return Err(RhiError::StateNotAllowed {
                    handle: barrier.texture.raw(),
                    requested: barrier.state,
                    allowed,
                });
            }
        }
        for barrier in buffers {
            barrier.state.validate()?;
            let allowed = self.buffers.get(barrier.buffer)?.desc.all_allowed_states();
            if !allowed.contains(barrier.state) {
                return Err(RhiError::StateNotAllowed {
                    handle: barrier.buffer.raw(),
                    requested: barrier.state,
                    allowed,
                });
            }
        }

        let mark = self.frames.active_mark();
        let recorder = self.frames.active_recorder()?;
        for barrier in textures {
            let record = self.textures.get_mut(barrier.texture)?;
            if record.current_state == barrier.state {
                continue;
            }
            recorder.queue_texture_barrier(TextureTransition {
                texture: record.native,
                format: record.desc.format,
                before: record.current_state,
                after: barrier.state,
            });
            record.current_state = barrier.state;
            if let Some(mark) = mark {
                record.transitions.record(mark);
            }
        }
        for barrier in buffers {
            let record = self.buffers.get_mut(barrier.buffer)?;
            if record.current_state == barrier.state {
                continue;
            }
            recorder.queue_buffer_barrier(BufferTransition {
                buffer: record.native,
                before: record.current_state,
                after: barrier.state,
            });
            record.current_state = barrier.state;
        }
        Ok(())
    }
}

// render target
impl<D: RhiDevice> Rhi<D> {
    /// 所有 target 的尺寸必须一致
    pub fn cmd_bind_render_targets(
        &mut self,
        colors: &[TextureHandle],
        depth_stencil: Option<TextureHandle>,
    ) -> RhiResult<()> {
        if colors.len() > MAX_RENDER_TARGETS {
            return Err(RhiError::invalid_argument(format!(
                "{} render targets, at most {MAX_RENDER_TARGETS} can be bound",
                colors.len()
            )));
        }
        if colors.is_empty() && depth_stencil.is_none() {
            return Err(RhiError::invalid_argument("bind_render_targets without any target"));
        }

        let mut extent = None;
        let mut check_extent = |name: &str, size: (u32, u32)| {
            let expected = *extent.get_or_insert(size);
            if expected != size {
                return Err(RhiError::invalid_argument(format!(
                    "'{name}' is {}x{}, other targets are {}x{}",
                    size.0, size.1, expected.0, expected.1
                )));
            }
            Ok(())
        };

        let mut views = Vec::with_capacity(colors.len());
        let mut formats = Vec::with_capacity(colors.len());
        for &handle in colors {
            let record = self.textures.get(handle)?;
            let rtv = record
                .rtv
                .ok_or_else(|| RhiError::invalid_argument(format!("'{}' is not a render target", record.name())))?;
            check_extent(record.name(), (record.desc.width, record.desc.height))?;
            views.push(self.view_of(DescriptorHeapKind::RenderTarget, rtv)?);
            formats.push(record.desc.format);
        }

        let depth_view = match depth_stencil {
            Some(handle) => {
                let record = self.textures.get(handle)?;
                let dsv = record
                    .dsv
                    .ok_or_else(|| RhiError::invalid_argument(format!("'{}' is not a depth stencil", record.name())))?;
                check_extent(record.name(), (record.desc.width, record.desc.height))?;
                Some(self.view_of(DescriptorHeapKind::DepthStencil, dsv)?)
            }
            None => None,
        };

        let (width, height) = extent.unwrap_or_default();
        self.record(NativeCommand::BindRenderTargets {
            colors: views,
            color_formats: formats,
            depth_stencil: depth_view,
            width,
            height,
        })
    }

    /// 用 texture 创建时指定的 clear color 清空
    pub fn cmd_clear_color_target(&mut self, texture: TextureHandle) -> RhiResult<()> {
        let record = self.textures.get(texture)?;
        let rtv = record
            .rtv
            .ok_or_else(|| RhiError::invalid_argument(format!("'{}' is not a render target", record.name())))?;
        let color = record.desc.clear_color;
        let view = self.view_of(DescriptorHeapKind::RenderTarget, rtv)?;
        self.record(NativeCommand::ClearColor { view, color })
    }
}

// binding
impl<D: RhiDevice> Rhi<D> {
    pub fn cmd_bind_root_signature(&mut self, root_signature: RootSignatureHandle) -> RhiResult<()> {
        let record = self.root_signatures.get(root_signature)?;
        let command = NativeCommand::BindRootSignature {
            root_signature: record.native,
            pipeline_type: record.pipeline_type(),
        };
        self.record(command)
    }

    /// 表必须是用同一个 root signature 创建的
    pub fn cmd_bind_descriptor_table(
        &mut self,
        root_signature: RootSignatureHandle,
        table: DescriptorTableHandle,
    ) -> RhiResult<()> {
        let signature = self.root_signatures.get(root_signature)?;
        let table_record = self.descriptor_tables.get(table)?;
        if table_record.root_signature != root_signature {
            return Err(RhiError::invalid_argument(format!(
                "descriptor table '{}' was created for {}, not {root_signature}",
                table_record.name, table_record.root_signature
            )));
        }
        let command = NativeCommand::BindDescriptorTable {
            root_signature: signature.native,
            table: table_record.native,
            pipeline_type: signature.pipeline_type(),
        };
        self.record(command)
    }

    pub fn cmd_bind_pipeline(&mut self, pipeline: PipelineHandle) -> RhiResult<()> {
        let record = self.pipelines.get(pipeline)?;
        let command = NativeCommand::BindPipeline {
            pipeline: record.native,
            pipeline_type: record.pipeline_type,
        };
        self.record(command)
    }

    pub fn cmd_bind_vertex_buffers(&mut self, buffers: &[BufferHandle], strides: &[u32], offsets: &[u32]) -> RhiResult<()> {
        if buffers.len() != strides.len() || buffers.len() != offsets.len() {
            return Err(RhiError::invalid_argument(format!(
                "{} vertex buffers with {} strides and {} offsets",
                buffers.len(),
                strides.len(),
                offsets.len()
            )));
        }
        if buffers.len() > MAX_VERTEX_BUFFERS {
            return Err(RhiError::invalid_argument(format!(
                "{} vertex buffers, at most {MAX_VERTEX_BUFFERS} can be bound",
                buffers.len()
            )));
        }

        let mut natives = Vec::with_capacity(buffers.len());
        for &handle in buffers {
            natives.push(self.buffers.get(handle)?.native);
        }
        self.record(NativeCommand::BindVertexBuffers {
            buffers: natives,
            strides: strides.to_vec(),
            offsets: offsets.to_vec(),
        })
    }

    pub fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle, index_type: IndexType, offset: u32) -> RhiResult<()> {
        let record = self.buffers.get(buffer)?;
        let command = NativeCommand::BindIndexBuffer {
            buffer: record.native,
            index_type,
            offset,
        };
        self.record(command)
    }

    /// depth 范围固定为 0..1
    pub fn cmd_set_viewport(&mut self, x: u32, y: u32, width: u32, height: u32) -> RhiResult<()> {
        self.record(NativeCommand::SetViewport {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        })
    }

    pub fn cmd_set_scissor(&mut self, x: u32, y: u32, width: u32, height: u32) -> RhiResult<()> {
        self.record(NativeCommand::SetScissor { x, y, width, height })
    }

    /// `data` 的长度必须等于 root signature 为该 stage 声明的常量大小
    pub fn cmd_set_root_constants(
        &mut self,
        root_signature: RootSignatureHandle,
        stage: ShaderStage,
        data: &[u8],
    ) -> RhiResult<()> {
        let record = self.root_signatures.get(root_signature)?;
        let declared = record.desc.constants_byte_count(stage) as usize;
        if declared == 0 || data.len() != declared {
            return Err(RhiError::invalid_argument(format!(
                "'{}' declares {declared} bytes of {stage:?} constants, got {}",
                record.desc.name,
                data.len()
            )));
        }
        let command = NativeCommand::SetRootConstants {
            root_signature: record.native,
            stage,
            data: data.to_vec(),
        };
        self.record(command)
    }
}

impl<D: RhiDevice> Rhi<D> {
    /// 按字节写入 `constants`，布局需要和 shader 中的声明一致
    pub fn cmd_set_root_constants_typed<T: bytemuck::Pod>(
        &mut self,
        root_signature: RootSignatureHandle,
        stage: ShaderStage,
        constants: &T,
    ) -> RhiResult<()> {
        self.cmd_set_root_constants(root_signature, stage, bytemuck::bytes_of(constants))
    }
}

// draw & dispatch
impl<D: RhiDevice> Rhi<D> {
    pub fn cmd_draw(&mut self, vertex_count: u32, first_vertex: u32) -> RhiResult<()> {
        self.record(NativeCommand::Draw {
            vertex_count,
            first_vertex,
        })
    }

    pub fn cmd_draw_indexed(&mut self, index_count: u32, first_index: u32, first_vertex: i32) -> RhiResult<()> {
        self.record(NativeCommand::DrawIndexed {
            index_count,
            first_index,
            first_vertex,
        })
    }

    pub fn cmd_dispatch(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()> {
        self.record(NativeCommand::Dispatch { x, y, z })
    }

    /// 把 `src` 的全部内容拷贝到 `dst` 的开头
    pub fn cmd_copy_buffer(&mut self, dst: BufferHandle, src: BufferHandle) -> RhiResult<()> {
        let src_record = self.buffers.get(src)?;
        let dst_record = self.buffers.get(dst)?;
        if dst_record.desc.byte_count < src_record.desc.byte_count {
            return Err(RhiError::invalid_argument(format!(
                "cannot copy {} bytes of '{}' into '{}' ({} bytes)",
                src_record.desc.byte_count,
                src_record.name(),
                dst_record.name(),
                dst_record.desc.byte_count
            )));
        }

        let command = NativeCommand::CopyBuffer {
            dst: dst_record.native,
            dst_offset: 0,
            src: src_record.native,
            src_offset: 0,
            byte_count: src_record.desc.byte_count,
        };
        self.record(command)
    }
}

// duration query
impl<D: RhiDevice> Rhi<D> {
    /// 只能在帧内使用；结果在该 frame slot 下一次 `begin_frame` 时读回
    pub fn cmd_begin_duration_query(&mut self, name: &str) -> RhiResult<DurationQueryId> {
        let index = self.frames.frame_index();
        self.frames.frame_recorder()?;
        let (id, command) = self.queries.begin(index, name)?;
        self.frames.frame_recorder()?.record(&mut self.device, command);
        Ok(id)
    }

    pub fn cmd_end_duration_query(&mut self, id: DurationQueryId) -> RhiResult<()> {
        let index = self.frames.frame_index();
        self.frames.frame_recorder()?;
        let command = self.queries.end(index, id)?;
        self.frames.frame_recorder()?.record(&mut self.device, command);
        Ok(())
    }
}
