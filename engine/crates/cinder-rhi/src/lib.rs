//! Cinder 的 RHI 核心
//!
//! 在 native 图形 API（[`device::RhiDevice`]）之上提供：
//! - 代际句柄池，过期句柄在使用时被发现
//! - 固定容量的描述符 heap，描述符表中未绑定的 slot 指向 null view
//! - 上传环形缓冲，在独立的 copy queue 上提交
//! - N 帧在飞的帧流水线，以及 GPU 耗时查询
//! - persistent / short-lived 两种资源生命周期
//!
//! 入口是 [`Rhi`]。[`headless::HeadlessDevice`] 是纯软件的设备实现，用于测试和 CI。

pub mod config;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod fence;
pub mod frame_pipeline;
pub mod handle;
pub mod handle_pool;
pub mod headless;
pub mod lifetime;
pub mod queries;
pub mod resources;
pub mod upload_ring;

pub use config::RhiConfig;
pub use context::{BufferBarrier, Rhi, TextureBarrier};
pub use error::{ErrorClass, OrAbort, RhiError, RhiResult, StaleReason};
pub use handle::{
    BufferHandle, DescriptorTableHandle, Handle, PipelineHandle, PoolHandle, ResourceKind, RootSignatureHandle,
    SamplerHandle, ShaderHandle, TextureHandle,
};
pub use lifetime::{Lifetime, SweepReport};

#[doc(hidden)]
pub use tracy_client;

/// tracy 的 span；没有运行中的 tracy client 时什么都不做
///
/// ```ignore
/// let _span = cinder_rhi::profile_span!("Rhi::begin_frame");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:literal) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span($crate::tracy_client::span_location!($name), 0))
    };
}
