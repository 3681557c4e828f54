use std::fmt;

use crate::descriptor::DescriptorHeapKind;
use crate::frame_pipeline::FrameState;
use crate::handle::{Handle, ResourceKind};
use crate::resources::states::ResourceStates;

pub type RhiResult<T> = Result<T, RhiError>;

/// 错误的三个大类
///
/// - `Capacity`：固定容量耗尽，属于配置问题
/// - `Contract`：调用方违反了使用约定（过期句柄、重复释放等）
/// - `Device`：设备丢失或 GPU 卡死，调用方只能整体重建子系统
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Capacity,
    Contract,
    Device,
}

/// 句柄校验失败的具体原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StaleReason {
    WrongKind { expected: ResourceKind },
    BadIndex,
    UnusedSlot,
    /// 句柄的 generation 比 slot 更新
    FromFuture,
    /// slot 已经被释放并可能被复用
    Freed,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::WrongKind { expected } => write!(f, "wrong resource kind, expected {expected}"),
            StaleReason::BadIndex => write!(f, "bad index"),
            StaleReason::UnusedSlot => write!(f, "unused slot"),
            StaleReason::FromFuture => write!(f, "allocation from the future"),
            StaleReason::Freed => write!(f, "the object has been freed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RhiError {
    // capacity
    #[error("the {kind} pool is full (capacity {capacity})")]
    PoolExhausted { kind: ResourceKind, capacity: usize },

    #[error("the {heap} descriptor heap is exhausted (capacity {capacity})")]
    DescriptorsExhausted { heap: DescriptorHeapKind, capacity: u32 },

    #[error("upload of {requested} bytes exceeds the upload ring capacity of {capacity} bytes")]
    UploadTooLarge { requested: u64, capacity: u64 },

    #[error("no more than {limit} duration queries can be issued per frame")]
    DurationQueriesExhausted { limit: u32 },

    // contract
    #[error("invalid handle {handle}: {reason}")]
    StaleHandle { handle: Handle, reason: StaleReason },

    #[error("{0} was already freed")]
    DoubleFree(Handle),

    #[error("descriptor {index} of the {heap} heap is not allocated")]
    DescriptorDoubleFree { heap: DescriptorHeapKind, index: u32 },

    #[error("resource state {0:?} combines a write state with other states")]
    InvalidResourceState(ResourceStates),

    #[error("state {requested:?} is not in the allowed states {allowed:?} of {handle}")]
    StateNotAllowed {
        handle: Handle,
        requested: ResourceStates,
        allowed: ResourceStates,
    },

    #[error("{operation} is not allowed while the frame is {state:?}")]
    FrameState { operation: &'static str, state: FrameState },

    #[error("{0}")]
    InvalidOperation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // device
    #[error("device lost: {reason}")]
    DeviceLost { reason: String },

    #[error("timed out after {timeout_ms} ms waiting for fence '{fence}' to reach {value} (completed {completed})")]
    FenceTimeout {
        fence: String,
        value: u64,
        completed: u64,
        timeout_ms: u64,
    },

    #[error("native call '{call}' failed: {message}")]
    Native { call: &'static str, message: String },
}

impl RhiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RhiError::PoolExhausted { .. }
            | RhiError::DescriptorsExhausted { .. }
            | RhiError::UploadTooLarge { .. }
            | RhiError::DurationQueriesExhausted { .. }
            | RhiError::InvalidConfig(_) => ErrorClass::Capacity,

            RhiError::StaleHandle { .. }
            | RhiError::DoubleFree(_)
            | RhiError::DescriptorDoubleFree { .. }
            | RhiError::InvalidResourceState(_)
            | RhiError::StateNotAllowed { .. }
            | RhiError::FrameState { .. }
            | RhiError::InvalidOperation(_)
            | RhiError::InvalidArgument(_) => ErrorClass::Contract,

            RhiError::DeviceLost { .. } | RhiError::FenceTimeout { .. } | RhiError::Native { .. } => {
                ErrorClass::Device
            }
        }
    }

    #[inline]
    pub fn is_device_failure(&self) -> bool {
        self.class() == ErrorClass::Device
    }

    #[inline]
    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        RhiError::InvalidOperation(message.into())
    }

    #[inline]
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        RhiError::InvalidArgument(message.into())
    }
}

/// 默认的 "出错即终止" 包装
///
/// API 边界统一返回 `RhiResult`；不需要自行处理错误的调用方使用 `or_abort()`，
/// 错误会先以 error 级别写入日志，然后 panic（release 下 `panic = 'abort'`）。
pub trait OrAbort<T> {
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for RhiResult<T> {
    #[track_caller]
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                log::error!("fatal {:?} error: {}", err.class(), err);
                panic!("fatal RHI error: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_the_taxonomy() {
        let capacity = RhiError::UploadTooLarge {
            requested: 10,
            capacity: 4,
        };
        assert_eq!(capacity.class(), ErrorClass::Capacity);

        let contract = RhiError::StaleHandle {
            handle: Handle::new(ResourceKind::Texture, 3, 1),
            reason: StaleReason::Freed,
        };
        assert_eq!(contract.class(), ErrorClass::Contract);
        assert_eq!(contract.to_string(), "invalid handle Texture#3@1: the object has been freed");

        let lost = RhiError::DeviceLost {
            reason: "device hung".to_string(),
        };
        assert!(lost.is_device_failure());
    }

    #[test]
    fn or_abort_passes_values_through() {
        let ok: RhiResult<u32> = Ok(7);
        assert_eq!(ok.or_abort(), 7);
    }

    #[test]
    #[should_panic(expected = "fatal RHI error")]
    fn or_abort_panics_on_error() {
        let err: RhiResult<()> = Err(RhiError::DoubleFree(Handle::new(ResourceKind::Buffer, 0, 0)));
        err.or_abort();
    }
}
