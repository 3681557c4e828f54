use crate::context::Rhi;
use crate::device::{NativeTexture, RhiDevice};
use crate::error::{RhiError, RhiResult};
use crate::handle::{PoolHandle, ResourceKind};
use crate::lifetime::{LifetimeTagged, SweepReport, SweepScope, sweep_pool};

impl<D: RhiDevice> Rhi<D> {
    /// 销毁所有 short-lived 资源，例如切换场景时
    ///
    /// 调用方保证没有在飞的帧仍在使用这些资源。
    pub fn sweep_short_lived(&mut self) -> RhiResult<SweepReport> {
        self.sweep(SweepScope::ShortLivedOnly)
    }

    /// 销毁所有资源（back buffer 除外），用于关闭前
    pub fn sweep_all(&mut self) -> RhiResult<SweepReport> {
        self.sweep(SweepScope::Everything)
    }

    /// 依赖方先于被依赖方销毁：表、pipeline、root signature、shader、sampler、texture、buffer
    fn sweep(&mut self, scope: SweepScope) -> RhiResult<SweepReport> {
        let _span = crate::profile_span!("Rhi::sweep");
        if self.frames.is_recording() {
            return Err(RhiError::invalid_operation(format!(
                "{scope:?} sweep while {} is recording",
                self.frame_name()
            )));
        }
        if self.upload.is_open() {
            return Err(RhiError::invalid_operation(format!("{scope:?} sweep while an upload is open")));
        }

        let mut report = SweepReport::default();

        let tables = sweep_pool(&mut self.descriptor_tables, scope);
        report.record(ResourceKind::DescriptorTable, tables.len());
        for (_, record) in tables {
            self.device.destroy_descriptor_table(record.native);
        }

        let pipelines = sweep_pool(&mut self.pipelines, scope);
        report.record(ResourceKind::Pipeline, pipelines.len());
        for (_, record) in pipelines {
            self.device.destroy_pipeline(record.native);
        }

        let root_signatures = sweep_pool(&mut self.root_signatures, scope);
        report.record(ResourceKind::RootSignature, root_signatures.len());
        for (handle, record) in root_signatures {
            let dependents = self.descriptor_tables.iter().filter(|(_, t)| t.root_signature == handle).count()
                + self.pipelines.iter().filter(|(_, p)| p.root_signature == handle).count();
            if dependents > 0 {
                log::warn!(
                    "root signature '{}' was swept while {dependents} persistent objects still use it",
                    record.desc.name
                );
            }
            self.device.destroy_root_signature(record.native);
        }

        let shaders = sweep_pool(&mut self.shaders, scope);
        report.record(ResourceKind::Shader, shaders.len());
        for (_, record) in shaders {
            self.device.destroy_shader(record.native);
        }

        let samplers = sweep_pool(&mut self.samplers, scope);
        report.record(ResourceKind::Sampler, samplers.len());
        for (handle, record) in samplers {
            self.reset_table_bindings(handle.raw());
            self.release_sampler(record)?;
        }

        // back buffer 属于 RHI 自己，只在 shutdown 时销毁
        let back_buffers: Vec<NativeTexture> = self
            .back_buffers
            .iter()
            .filter_map(|handle| self.textures.try_get(*handle))
            .map(|record| record.native)
            .collect();
        let textures = self
            .textures
            .remove_where(|record| scope.includes(record.lifetime()) && !back_buffers.contains(&record.native));
        report.record(ResourceKind::Texture, textures.len());
        for (handle, record) in textures {
            self.reset_table_bindings(handle.raw());
            self.release_texture(record)?;
        }

        let buffers = sweep_pool(&mut self.buffers, scope);
        report.record(ResourceKind::Buffer, buffers.len());
        for (handle, record) in buffers {
            self.reset_table_bindings(handle.raw());
            self.release_buffer(record)?;
        }

        log::info!("{scope:?} sweep destroyed {report}");
        Ok(report)
    }
}
