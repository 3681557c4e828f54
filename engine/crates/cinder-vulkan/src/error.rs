use ash::vk;
use cinder_rhi::RhiError;

/// 把 vk 的错误码翻译为 `RhiError`；`ERROR_DEVICE_LOST` 单独归为设备丢失
pub(crate) fn vk_error(call: &'static str) -> impl Fn(vk::Result) -> RhiError {
    move |result| match result {
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost {
            reason: format!("{call} returned {result:?}"),
        },
        _ => RhiError::Native {
            call,
            message: format!("{result:?}"),
        },
    }
}

/// 查找 native 对象失败
pub(crate) fn unknown(call: &'static str, what: impl std::fmt::Display) -> RhiError {
    RhiError::Native {
        call,
        message: format!("unknown {what}"),
    }
}
