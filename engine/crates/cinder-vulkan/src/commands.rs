//! `NativeCommand` 到 vk 命令的翻译
//!
//! 渲染使用 dynamic rendering：`BindRenderTargets` 开始一个 rendering scope，
//! barrier、拷贝、dispatch 以及 close 之前会先结束它。

use ash::vk;
use itertools::Itertools;

use cinder_rhi::device::{NativeCommand, NativeView};
use cinder_rhi::resources::format::TextureFormat;
use cinder_rhi::resources::states::ResourceStates;
use cinder_rhi::{RhiError, RhiResult};

use crate::convert::{self, StateSync};
use crate::device::VulkanDevice;
use crate::error::unknown;
use crate::objects::{ListKey, RenderingScope, VkView, from_id};

pub(crate) fn layout_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    src: StateSync,
    dst: StateSync,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .image(image)
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .old_layout(src.layout)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
}

fn texture_barrier(
    image: vk::Image,
    format: TextureFormat,
    before: ResourceStates,
    after: ResourceStates,
) -> vk::ImageMemoryBarrier2<'static> {
    layout_barrier(image, convert::aspect(format), convert::state_sync(before), convert::state_sync(after))
}

impl VulkanDevice {
    pub(crate) fn record_command(&mut self, key: ListKey, command: NativeCommand) -> RhiResult<()> {
        let list = self.lists.get_mut(key).ok_or_else(|| unknown("record", "command list"))?;
        if !list.recording {
            return Err(RhiError::Native {
                call: "record",
                message: "command list is not recording".to_string(),
            });
        }
        let cmd = list.buffer;
        let mut rendering = list.rendering.take();

        let result = self.encode(cmd, &mut rendering, command);

        if let Some(list) = self.lists.get_mut(key) {
            list.rendering = rendering;
        }
        result
    }

    fn end_rendering(&self, cmd: vk::CommandBuffer, rendering: &mut Option<RenderingScope>) {
        if rendering.take().is_some() {
            unsafe { self.core.device.cmd_end_rendering(cmd) };
        }
    }

    fn attachment(&self, view: NativeView) -> RhiResult<(vk::ImageView, vk::Extent2D)> {
        match self.view(view)? {
            VkView::Attachment { view, extent } => Ok((*view, *extent)),
            _ => Err(RhiError::Native {
                call: "record",
                message: format!("{view} is not a render target or depth stencil view"),
            }),
        }
    }

    fn encode(
        &self,
        cmd: vk::CommandBuffer,
        rendering: &mut Option<RenderingScope>,
        command: NativeCommand,
    ) -> RhiResult<()> {
        let device = &self.core.device;
        match command {
            NativeCommand::Barrier { textures, buffers } => {
                self.end_rendering(cmd, rendering);
                let image_barriers = textures
                    .iter()
                    .map(|t| Ok(texture_barrier(self.texture(t.texture)?.handle, t.format, t.before, t.after)))
                    .collect::<RhiResult<Vec<_>>>()?;
                let buffer_barriers = buffers
                    .iter()
                    .map(|b| {
                        let src = convert::state_sync(b.before);
                        let dst = convert::state_sync(b.after);
                        Ok(vk::BufferMemoryBarrier2::default()
                            .buffer(self.buffer(b.buffer)?.handle)
                            .offset(0)
                            .size(vk::WHOLE_SIZE)
                            .src_stage_mask(src.stage)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stage)
                            .dst_access_mask(dst.access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED))
                    })
                    .collect::<RhiResult<Vec<_>>>()?;
                let dependency = vk::DependencyInfo::default()
                    .image_memory_barriers(&image_barriers)
                    .buffer_memory_barriers(&buffer_barriers);
                unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
            }

            NativeCommand::BindRenderTargets {
                colors,
                depth_stencil,
                width,
                height,
                ..
            } => {
                self.end_rendering(cmd, rendering);
                let color_views = colors.iter().map(|view| Ok(self.attachment(*view)?.0)).collect::<RhiResult<Vec<_>>>()?;
                let color_attachments = color_views
                    .iter()
                    .map(|view| {
                        vk::RenderingAttachmentInfo::default()
                            .image_view(*view)
                            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                            .load_op(vk::AttachmentLoadOp::LOAD)
                            .store_op(vk::AttachmentStoreOp::STORE)
                    })
                    .collect_vec();
                let depth_attachment = depth_stencil
                    .map(|view| self.attachment(view))
                    .transpose()?
                    .map(|(view, _)| {
                        vk::RenderingAttachmentInfo::default()
                            .image_view(view)
                            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                            .load_op(vk::AttachmentLoadOp::LOAD)
                            .store_op(vk::AttachmentStoreOp::STORE)
                    });

                let extent = vk::Extent2D { width, height };
                let mut rendering_info = vk::RenderingInfo::default()
                    .render_area(extent.into())
                    .layer_count(1)
                    .color_attachments(&color_attachments);
                if let Some(depth) = &depth_attachment {
                    rendering_info = rendering_info.depth_attachment(depth).stencil_attachment(depth);
                }
                unsafe { device.cmd_begin_rendering(cmd, &rendering_info) };
                *rendering = Some(RenderingScope {
                    colors: color_views,
                    extent,
                });
            }

            NativeCommand::ClearColor { view, color } => {
                let (image_view, extent) = self.attachment(view)?;
                let clear_value = vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                };
                match rendering.as_ref() {
                    Some(scope) => match scope.colors.iter().position(|bound| *bound == image_view) {
                        Some(index) => {
                            let attachment = vk::ClearAttachment {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                color_attachment: index as u32,
                                clear_value,
                            };
                            let rect = vk::ClearRect {
                                rect: scope.extent.into(),
                                base_array_layer: 0,
                                layer_count: 1,
                            };
                            unsafe { device.cmd_clear_attachments(cmd, &[attachment], &[rect]) };
                        }
                        None => log::warn!("{view} is not bound in the current render pass, clear skipped"),
                    },
                    // 不在 rendering 中时，用一个只做 clear 的 rendering
                    None => {
                        let attachments = [vk::RenderingAttachmentInfo::default()
                            .image_view(image_view)
                            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                            .load_op(vk::AttachmentLoadOp::CLEAR)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .clear_value(clear_value)];
                        let rendering_info = vk::RenderingInfo::default()
                            .render_area(extent.into())
                            .layer_count(1)
                            .color_attachments(&attachments);
                        unsafe {
                            device.cmd_begin_rendering(cmd, &rendering_info);
                            device.cmd_end_rendering(cmd);
                        }
                    }
                }
            }

            // vk 的 push constants 和 descriptor set 绑定时直接带上 pipeline layout
            NativeCommand::BindRootSignature { root_signature, .. } => {
                self.root_signature(root_signature)?;
            }

            NativeCommand::BindDescriptorTable {
                root_signature,
                table,
                pipeline_type,
            } => {
                let layout = self.root_signature(root_signature)?.pipeline_layout;
                let set = self.tables.get(from_id(table.0)).ok_or_else(|| unknown("record", table))?.set;
                unsafe {
                    device.cmd_bind_descriptor_sets(cmd, convert::bind_point(pipeline_type), layout, 0, &[set], &[])
                };
            }

            NativeCommand::BindPipeline {
                pipeline,
                pipeline_type,
            } => {
                let handle = self.pipelines.get(from_id(pipeline.0)).copied().ok_or_else(|| unknown("record", pipeline))?;
                unsafe { device.cmd_bind_pipeline(cmd, convert::bind_point(pipeline_type), handle) };
            }

            // stride 已经写在 pipeline 的 vertex input 中
            NativeCommand::BindVertexBuffers { buffers, offsets, .. } => {
                let handles = buffers.iter().map(|b| Ok(self.buffer(*b)?.handle)).collect::<RhiResult<Vec<_>>>()?;
                let offsets = offsets.iter().map(|offset| *offset as vk::DeviceSize).collect_vec();
                unsafe { device.cmd_bind_vertex_buffers(cmd, 0, &handles, &offsets) };
            }

            NativeCommand::BindIndexBuffer {
                buffer,
                index_type,
                offset,
            } => {
                let handle = self.buffer(buffer)?.handle;
                unsafe {
                    device.cmd_bind_index_buffer(cmd, handle, offset as vk::DeviceSize, convert::index_type(index_type))
                };
            }

            NativeCommand::SetViewport {
                x,
                y,
                width,
                height,
                min_depth,
                max_depth,
            } => {
                let viewport = vk::Viewport {
                    x: x as f32,
                    y: y as f32,
                    width: width as f32,
                    height: height as f32,
                    min_depth,
                    max_depth,
                };
                unsafe { device.cmd_set_viewport(cmd, 0, &[viewport]) };
            }

            NativeCommand::SetScissor { x, y, width, height } => {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D {
                        x: x as i32,
                        y: y as i32,
                    },
                    extent: vk::Extent2D { width, height },
                };
                unsafe { device.cmd_set_scissor(cmd, 0, &[scissor]) };
            }

            NativeCommand::SetRootConstants {
                root_signature,
                stage,
                data,
            } => {
                let record = self.root_signature(root_signature)?;
                let (offset, _) = record.push_constants[stage.index()];
                unsafe {
                    device.cmd_push_constants(
                        cmd,
                        record.pipeline_layout,
                        convert::shader_stage(stage),
                        offset,
                        &data,
                    )
                };
            }

            NativeCommand::Draw {
                vertex_count,
                first_vertex,
            } => unsafe { device.cmd_draw(cmd, vertex_count, 1, first_vertex, 0) },

            NativeCommand::DrawIndexed {
                index_count,
                first_index,
                first_vertex,
            } => unsafe { device.cmd_draw_indexed(cmd, index_count, 1, first_index, first_vertex, 0) },

            NativeCommand::Dispatch { x, y, z } => {
                self.end_rendering(cmd, rendering);
                unsafe { device.cmd_dispatch(cmd, x, y, z) };
            }

            NativeCommand::WriteTimestamp { pool, index } => {
                let (handle, _) =
                    self.query_pools.get(from_id(pool.0)).copied().ok_or_else(|| unknown("record", pool))?;
                unsafe { device.cmd_write_timestamp2(cmd, vk::PipelineStageFlags2::ALL_COMMANDS, handle, index) };
            }

            NativeCommand::CopyBuffer {
                dst,
                dst_offset,
                src,
                src_offset,
                byte_count,
            } => {
                self.end_rendering(cmd, rendering);
                let region = vk::BufferCopy {
                    src_offset,
                    dst_offset,
                    size: byte_count,
                };
                unsafe { device.cmd_copy_buffer(cmd, self.buffer(src)?.handle, self.buffer(dst)?.handle, &[region]) };
            }

            NativeCommand::CopyBufferToTexture {
                dst,
                dst_state,
                src,
                src_offset,
                region,
            } => {
                self.end_rendering(cmd, rendering);
                let image = self.texture(dst)?.handle;
                let src = self.buffer(src)?.handle;

                let to_copy = texture_barrier(image, region.format, dst_state, ResourceStates::COPY_DESTINATION);
                let copy = vk::BufferImageCopy {
                    buffer_offset: src_offset,
                    buffer_row_length: region.row_pitch / region.format.bytes_per_pixel(),
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: convert::aspect(region.format),
                        mip_level: region.mip,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D {
                        x: region.x as i32,
                        y: region.y as i32,
                        z: 0,
                    },
                    image_extent: vk::Extent3D {
                        width: region.width,
                        height: region.height,
                        depth: 1,
                    },
                };
                let back = texture_barrier(image, region.format, ResourceStates::COPY_DESTINATION, dst_state);

                unsafe {
                    device.cmd_pipeline_barrier2(cmd, &vk::DependencyInfo::default().image_memory_barriers(&[to_copy]));
                    device.cmd_copy_buffer_to_image(cmd, src, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[copy]);
                    device.cmd_pipeline_barrier2(cmd, &vk::DependencyInfo::default().image_memory_barriers(&[back]));
                }
            }
        }
        Ok(())
    }
}
