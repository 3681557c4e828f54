use crate::context::Rhi;
use crate::device::{FenceWait, RhiDevice, TextureCopyRegion};
use crate::error::{RhiError, RhiResult};
use crate::handle::{BufferHandle, Handle, PoolHandle, TextureHandle};
use crate::resources::texture::TextureUpload;
use crate::resources::{TEXTURE_PLACEMENT_ALIGNMENT, TEXTURE_ROW_PITCH_ALIGNMENT};
use crate::upload_ring::{MappedTexture, UploadTarget};

/// buffer 拷贝在 staging 中的偏移对齐
const BUFFER_COPY_ALIGNMENT: u64 = 16;

impl<D: RhiDevice> Rhi<D> {
    /// 在 upload ring 中预留 `byte_count` 字节，返回可写的 staging 内存
    ///
    /// 数据在 `end_upload` 时通过 copy queue 拷贝到 `buffer` 的 `offset` 处。
    pub fn begin_buffer_upload(&mut self, buffer: BufferHandle, offset: u64, byte_count: u64) -> RhiResult<&mut [u8]> {
        let record = self.buffers.get(buffer)?;
        if offset.checked_add(byte_count).is_none_or(|end| end > record.desc.byte_count) {
            return Err(RhiError::invalid_argument(format!(
                "upload of {byte_count} bytes at {offset} overruns buffer '{}' ({} bytes)",
                record.desc.name, record.desc.byte_count
            )));
        }

        let target = UploadTarget::Buffer {
            owner: buffer.raw(),
            buffer: record.native,
            offset,
            byte_count,
        };
        let staging_offset = self
            .upload
            .begin(&mut self.device, target, BUFFER_COPY_ALIGNMENT, self.config.fence_timeout())?;
        self.map_staging(staging_offset, byte_count)
    }

    /// 整个 mip 0 的上传
    pub fn begin_texture_upload(&mut self, texture: TextureHandle) -> RhiResult<MappedTexture<'_>> {
        let desc = &self.textures.get(texture)?.desc;
        let (width, height) = (desc.width, desc.height);
        self.begin_texture_region_upload(texture, 0, 0, width, height)
    }

    /// mip 0 中一块矩形区域的上传；staging 中的行按 256 字节对齐
    pub fn begin_texture_region_upload(
        &mut self,
        texture: TextureHandle,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> RhiResult<MappedTexture<'_>> {
        let record = self.textures.get(texture)?;
        let desc = &record.desc;
        if desc.format.is_depth_stencil() {
            return Err(RhiError::invalid_argument(format!(
                "depth-stencil texture '{}' cannot be uploaded",
                desc.name
            )));
        }
        // 上传在 copy queue 上先于当前录制的命令执行，不能基于它们转换后的状态
        if self.frames.has_unsubmitted_transition(&record.transitions) {
            return Err(RhiError::invalid_operation(format!(
                "texture '{}' was transitioned by commands that are not submitted yet, upload it before the barrier",
                desc.name
            )));
        }
        let fits = |start: u32, extent: u32, limit: u32| start.checked_add(extent).is_some_and(|end| end <= limit);
        if width == 0 || height == 0 || !fits(x, width, desc.width) || !fits(y, height, desc.height) {
            return Err(RhiError::invalid_argument(format!(
                "region {width}x{height} at ({x}, {y}) is outside texture '{}' ({}x{})",
                desc.name, desc.width, desc.height
            )));
        }

        let src_row_byte_count = width * desc.format.bytes_per_pixel();
        let dst_row_byte_count = src_row_byte_count.next_multiple_of(TEXTURE_ROW_PITCH_ALIGNMENT);
        let target = UploadTarget::Texture {
            owner: texture.raw(),
            texture: record.native,
            state: record.current_state,
            region: TextureCopyRegion {
                mip: 0,
                x,
                y,
                width,
                height,
                format: desc.format,
                row_pitch: dst_row_byte_count,
            },
        };
        let byte_count = target.staging_size();

        let staging_offset = self.upload.begin(
            &mut self.device,
            target,
            TEXTURE_PLACEMENT_ALIGNMENT,
            self.config.fence_timeout(),
        )?;
        let data = self.map_staging(staging_offset, byte_count)?;
        Ok(MappedTexture {
            data,
            row_count: height,
            src_row_byte_count,
            dst_row_byte_count,
        })
    }

    /// 提交当前上传；copy queue 先等待最近提交的帧，避免覆盖 GPU 仍在读取的数据
    pub fn end_upload(&mut self) -> RhiResult<()> {
        let _span = crate::profile_span!("Rhi::end_upload");
        if !self.upload.is_open() {
            return Err(RhiError::invalid_operation("end_upload without a matching begin"));
        }
        self.device.unmap_buffer(self.upload.staging());

        let frame_fence = self.frames.fence();
        let waits: Vec<FenceWait> = (frame_fence.value() > 0)
            .then(|| FenceWait {
                fence: frame_fence.native(),
                value: frame_fence.value(),
            })
            .into_iter()
            .collect();
        self.upload.end(&mut self.device, &waits)?;
        Ok(())
    }

    /// 一次性上传 `data` 到 `buffer` 的 `offset` 处
    pub fn upload_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
        let staging = self.begin_buffer_upload(buffer, offset, data.len() as u64)?;
        staging.copy_from_slice(data);
        self.end_upload()
    }

    /// 一次性上传 mip 0 的一块区域，`upload.data` 按紧密排列的行存放
    pub fn upload_texture(&mut self, texture: TextureHandle, upload: &TextureUpload<'_>) -> RhiResult<()> {
        let format = self.textures.get(texture)?.desc.format;
        let expected = upload.width as usize * upload.height as usize * format.bytes_per_pixel() as usize;
        if upload.data.len() != expected {
            return Err(RhiError::invalid_argument(format!(
                "texture upload of {}x{} {format:?} expects {expected} bytes, got {}",
                upload.width,
                upload.height,
                upload.data.len()
            )));
        }

        let mut mapped = self.begin_texture_region_upload(texture, upload.x, upload.y, upload.width, upload.height)?;
        if let Err(err) = mapped.write_rows(upload.data) {
            self.cancel_upload();
            return Err(err);
        }
        self.end_upload()
    }

    /// 放弃已经 begin 的上传，staging 区域不会被占用
    pub fn cancel_upload(&mut self) {
        if self.upload.is_open() {
            self.device.unmap_buffer(self.upload.staging());
            self.upload.cancel();
        }
    }

    /// 正在上传的资源不能被销毁
    pub(crate) fn ensure_not_uploading(&self, resource: Handle) -> RhiResult<()> {
        if self.upload.pending_owner() == Some(resource) {
            return Err(RhiError::invalid_operation(format!(
                "{resource} has an open upload, call end_upload first"
            )));
        }
        Ok(())
    }

    fn map_staging(&mut self, offset: u64, byte_count: u64) -> RhiResult<&mut [u8]> {
        let staging = self.upload.staging();
        match self.device.map_buffer(staging) {
            Ok(memory) => Ok(&mut memory[offset as usize..(offset + byte_count) as usize]),
            Err(err) => {
                self.upload.cancel();
                Err(err)
            }
        }
    }
}
