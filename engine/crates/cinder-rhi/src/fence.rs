use std::time::{Duration, Instant};

use crate::device::{NativeFence, RhiDevice};
use crate::error::{RhiError, RhiResult};

/// CPU 发出的单调递增值，与 GPU 报告的完成值配对
///
/// `value` 是 CPU 最后一次请求 signal 的值；`completed` 是 CPU 观察到的 GPU 完成值，只会增加。
pub struct Fence {
    native: NativeFence,
    name: String,
    value: u64,
    completed: u64,
}

// new & init
impl Fence {
    pub fn new(device: &mut dyn RhiDevice, name: impl Into<String>) -> RhiResult<Self> {
        let name = name.into();
        let native = device.create_fence(0, &name)?;
        log::debug!("fence '{name}' created: {native}");
        Ok(Self {
            native,
            name,
            value: 0,
            completed: 0,
        })
    }
}

// destroy
impl Fence {
    pub fn destroy(self, device: &mut dyn RhiDevice) {
        log::debug!("fence '{}' destroyed at value {}", self.name, self.value);
        device.destroy_fence(self.native);
    }
}

// getters
impl Fence {
    #[inline]
    pub fn native(&self) -> NativeFence {
        self.native
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// 最后一次请求 signal 的值
    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }
    /// 上一次轮询得到的完成值，不访问设备
    #[inline]
    pub fn completed_value(&self) -> u64 {
        self.completed
    }
}

// tools
impl Fence {
    /// 为下一次提交预留一个新的 signal 值
    #[inline]
    pub fn next_value(&mut self) -> u64 {
        self.value += 1;
        self.value
    }

    /// 向设备查询最新的完成值
    pub fn poll(&mut self, device: &mut dyn RhiDevice) -> RhiResult<u64> {
        let reported = device.fence_completed_value(self.native)?;
        self.observe(reported);
        Ok(self.completed)
    }

    #[inline]
    pub fn is_complete(&mut self, device: &mut dyn RhiDevice, value: u64) -> RhiResult<bool> {
        if self.completed >= value {
            return Ok(true);
        }
        Ok(self.poll(device)? >= value)
    }

    /// 阻塞直到 `completed >= value`
    ///
    /// 超时意味着 GPU 卡死，返回 `RhiError::FenceTimeout`。
    pub fn wait(&mut self, device: &mut dyn RhiDevice, value: u64, timeout: Duration) -> RhiResult<()> {
        if value > self.value {
            return Err(RhiError::invalid_operation(format!(
                "waiting for value {value} of fence '{}' which was only issued up to {}",
                self.name, self.value
            )));
        }
        if self.is_complete(device, value)? {
            return Ok(());
        }

        let _span = crate::profile_span!("Fence::wait");
        let start = Instant::now();
        let signaled = device.wait_fence(self.native, value, timeout)?;
        self.poll(device)?;
        if !signaled || self.completed < value {
            log::error!(
                "fence '{}' stuck at {} while waiting for {value} ({:?})",
                self.name,
                self.completed,
                start.elapsed()
            );
            return Err(RhiError::FenceTimeout {
                fence: self.name.clone(),
                value,
                completed: self.completed,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn observe(&mut self, reported: u64) {
        if reported < self.completed {
            log::warn!(
                "fence '{}' reported completed value {reported}, lower than the observed {}",
                self.name,
                self.completed
            );
            return;
        }
        self.completed = reported;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FenceSignal, QueueKind};
    use crate::headless::HeadlessDevice;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn submit_signal(device: &mut HeadlessDevice, fence: &mut Fence) -> u64 {
        let list = device.create_command_list(QueueKind::Main, "test").unwrap();
        device.reset_command_list(list).unwrap();
        device.close_command_list(list).unwrap();
        let value = fence.next_value();
        device
            .submit(QueueKind::Main, list, &[], FenceSignal { fence: fence.native(), value })
            .unwrap();
        value
    }

    #[test]
    fn completed_value_is_non_decreasing() {
        let mut device = HeadlessDevice::default();
        let mut fence = Fence::new(&mut device, "frame").unwrap();
        assert_eq!(fence.completed_value(), 0);

        let first = submit_signal(&mut device, &mut fence);
        let second = submit_signal(&mut device, &mut fence);
        assert_eq!((first, second), (1, 2));
        assert!(!fence.is_complete(&mut device, first).unwrap());

        fence.wait(&mut device, second, TIMEOUT).unwrap();
        assert_eq!(fence.completed_value(), 2);
        assert!(fence.is_complete(&mut device, first).unwrap());
        fence.destroy(&mut device);
    }

    #[test]
    fn waiting_for_an_unissued_value_is_a_contract_error() {
        let mut device = HeadlessDevice::default();
        let mut fence = Fence::new(&mut device, "frame").unwrap();
        assert!(matches!(fence.wait(&mut device, 1, TIMEOUT), Err(RhiError::InvalidOperation(_))));
    }

    #[test]
    fn hung_device_times_out() {
        let mut device = HeadlessDevice::default();
        let mut fence = Fence::new(&mut device, "frame").unwrap();
        let value = submit_signal(&mut device, &mut fence);
        device.hang();

        let err = fence.wait(&mut device, value, TIMEOUT).unwrap_err();
        assert!(err.is_device_failure());
        assert!(matches!(err, RhiError::FenceTimeout { value: 1, completed: 0, .. }));

        device.resume();
        fence.wait(&mut device, value, TIMEOUT).unwrap();
    }
}
