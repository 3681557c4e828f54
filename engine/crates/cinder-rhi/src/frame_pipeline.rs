//! N 帧流水线
//!
//! 每个 frame slot 有自己的 command list，以及提交时 signal 的 frame fence 值。
//! `begin_frame` 会等待同一个 slot 上一次提交的 fence 值，因此 CPU 最多领先 GPU N 帧。

use std::fmt;
use std::time::Duration;

use crate::device::{
    BufferTransition, FenceSignal, FenceWait, NativeCommand, NativeCommandList, QueueKind, RhiDevice,
    TextureTransition,
};
use crate::error::{RhiError, RhiResult};
use crate::fence::Fence;

/// frame slot 的标签，用于日志和调试名
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
    C,
    D,
}

impl FrameLabel {
    pub const ALL: [FrameLabel; 4] = [FrameLabel::A, FrameLabel::B, FrameLabel::C, FrameLabel::D];

    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }
}

impl fmt::Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    frame_count: u32,
}

// new & init
impl FrameCounter {
    pub fn new(frame_count: u32) -> Self {
        Self { frame_id: 0, frame_count }
    }
}

// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}

// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }
    /// 当前帧使用的 slot
    #[inline]
    pub fn frame_index(&self) -> usize {
        (self.frame_id % self.frame_count as u64) as usize
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_index(self.frame_index())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

/// frame slot 的状态机
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
    /// 提交的工作已经完成
    Retired,
}

/// 正在录制的 command list，以及尚未发出的 barrier
///
/// barrier 会被合并，在下一个非 barrier 命令之前（或者 close 之前）一次性发出。
pub struct CommandRecorder {
    list: NativeCommandList,
    texture_barriers: Vec<TextureTransition>,
    buffer_barriers: Vec<BufferTransition>,
    open: bool,
    recorded: usize,
}

impl CommandRecorder {
    fn new(list: NativeCommandList) -> Self {
        Self {
            list,
            texture_barriers: Vec::new(),
            buffer_barriers: Vec::new(),
            open: false,
            recorded: 0,
        }
    }

    fn open(&mut self, device: &mut dyn RhiDevice) -> RhiResult<()> {
        device.reset_command_list(self.list)?;
        self.texture_barriers.clear();
        self.buffer_barriers.clear();
        self.open = true;
        self.recorded = 0;
        Ok(())
    }

    fn close(&mut self, device: &mut dyn RhiDevice) -> RhiResult<()> {
        self.flush_barriers(device);
        self.open = false;
        device.close_command_list(self.list)
    }

    pub fn record(&mut self, device: &mut dyn RhiDevice, command: NativeCommand) {
        debug_assert!(self.open);
        if !command.is_barrier() {
            self.flush_barriers(device);
        }
        device.record(self.list, command);
        self.recorded += 1;
    }

    #[inline]
    pub fn queue_texture_barrier(&mut self, transition: TextureTransition) {
        self.texture_barriers.push(transition);
    }

    #[inline]
    pub fn queue_buffer_barrier(&mut self, transition: BufferTransition) {
        self.buffer_barriers.push(transition);
    }

    pub fn flush_barriers(&mut self, device: &mut dyn RhiDevice) {
        if self.texture_barriers.is_empty() && self.buffer_barriers.is_empty() {
            return;
        }
        let command = NativeCommand::Barrier {
            textures: std::mem::take(&mut self.texture_barriers),
            buffers: std::mem::take(&mut self.buffer_barriers),
        };
        device.record(self.list, command);
        self.recorded += 1;
    }

    #[inline]
    pub fn pending_barrier_count(&self) -> usize {
        self.texture_barriers.len() + self.buffer_barriers.len()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// 本次录制中发出的 native 命令数（合并后的 barrier 算一个）
    #[inline]
    pub fn recorded_count(&self) -> usize {
        self.recorded
    }

    #[inline]
    pub fn list(&self) -> NativeCommandList {
        self.list
    }
}

pub struct FrameSlot {
    recorder: CommandRecorder,
    state: FrameState,
    fence_value_at_submit: u64,
}

impl FrameSlot {
    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }
    #[inline]
    pub fn fence_value_at_submit(&self) -> u64 {
        self.fence_value_at_submit
    }
}

/// 状态转换被录制进的 command list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderMark {
    /// 帧的 frame id
    Frame(u64),
    /// 第几个临时 command list
    Temp(u64),
}

/// 资源最近一次在帧中、在临时 command list 中被转换的位置
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionMarks {
    frame: Option<u64>,
    temp: Option<u64>,
}

impl TransitionMarks {
    #[inline]
    pub fn record(&mut self, mark: RecorderMark) {
        match mark {
            RecorderMark::Frame(frame_id) => self.frame = Some(frame_id),
            RecorderMark::Temp(serial) => self.temp = Some(serial),
        }
    }
}

pub struct FramePipeline {
    counter: FrameCounter,
    fence: Fence,
    slots: Vec<FrameSlot>,
    temp: CommandRecorder,
    temp_serial: u64,
}

// new & init
impl FramePipeline {
    pub fn new(device: &mut dyn RhiDevice, frame_count: u32) -> RhiResult<Self> {
        let fence = Fence::new(device, "frame")?;
        let mut slots = Vec::with_capacity(frame_count as usize);
        for index in 0..frame_count as usize {
            let name = format!("frame [{}]", FrameLabel::from_index(index));
            let list = device.create_command_list(QueueKind::Main, &name)?;
            slots.push(FrameSlot {
                recorder: CommandRecorder::new(list),
                state: FrameState::Idle,
                fence_value_at_submit: 0,
            });
        }
        let temp = CommandRecorder::new(device.create_command_list(QueueKind::Main, "temp")?);

        log::info!("frame pipeline created with {frame_count} frames in flight");
        Ok(Self {
            counter: FrameCounter::new(frame_count),
            fence,
            slots,
            temp,
            temp_serial: 0,
        })
    }
}

// destroy
impl FramePipeline {
    /// 调用方保证设备已经空闲
    pub fn destroy(self, device: &mut dyn RhiDevice) {
        for slot in self.slots {
            device.destroy_command_list(slot.recorder.list);
        }
        device.destroy_command_list(self.temp.list);
        self.fence.destroy(device);
    }
}

// phase call
impl FramePipeline {
    /// 等待当前 slot 上一次提交完成，然后开始录制；返回 slot 下标
    pub fn begin_frame(&mut self, device: &mut dyn RhiDevice, timeout: Duration) -> RhiResult<usize> {
        let index = self.counter.frame_index();
        let state = self.slots[index].state;
        if state == FrameState::Recording {
            return Err(RhiError::FrameState {
                operation: "begin_frame",
                state,
            });
        }
        if self.temp.open {
            return Err(RhiError::invalid_operation("begin_frame while a temporary command list is open"));
        }

        {
            let _span = crate::profile_span!("FramePipeline::wait_frame");
            self.fence.wait(device, self.slots[index].fence_value_at_submit, timeout)?;
        }
        self.refresh_states();

        let slot = &mut self.slots[index];
        slot.recorder.open(device)?;
        slot.state = FrameState::Recording;
        Ok(index)
    }

    /// 提交当前帧，返回 signal 的 frame fence 值
    pub fn end_frame(&mut self, device: &mut dyn RhiDevice, waits: &[FenceWait]) -> RhiResult<u64> {
        let index = self.counter.frame_index();
        let state = self.slots[index].state;
        if state != FrameState::Recording {
            return Err(RhiError::FrameState {
                operation: "end_frame",
                state,
            });
        }
        if self.temp.open {
            return Err(RhiError::invalid_operation("end_frame while a temporary command list is open"));
        }

        let slot = &mut self.slots[index];
        slot.recorder.close(device)?;
        let value = self.fence.next_value();
        device.submit(
            QueueKind::Main,
            slot.recorder.list,
            waits,
            FenceSignal {
                fence: self.fence.native(),
                value,
            },
        )?;
        slot.fence_value_at_submit = value;
        slot.state = FrameState::Submitted;

        self.counter.next_frame();
        Ok(value)
    }

    pub fn begin_temp(&mut self, device: &mut dyn RhiDevice) -> RhiResult<()> {
        if self.temp.open {
            return Err(RhiError::invalid_operation("temporary command lists cannot be nested"));
        }
        self.temp.open(device)?;
        self.temp_serial += 1;
        Ok(())
    }

    /// 提交临时 command list 并阻塞到它完成
    pub fn end_temp(&mut self, device: &mut dyn RhiDevice, waits: &[FenceWait], timeout: Duration) -> RhiResult<()> {
        if !self.temp.open {
            return Err(RhiError::invalid_operation("end_temp_command_list without a matching begin"));
        }

        self.temp.close(device)?;
        let value = self.fence.next_value();
        device.submit(
            QueueKind::Main,
            self.temp.list,
            waits,
            FenceSignal {
                fence: self.fence.native(),
                value,
            },
        )?;
        self.fence.wait(device, value, timeout)?;
        self.refresh_states();
        Ok(())
    }

    /// 等待所有已提交的帧完成
    pub fn wait_all(&mut self, device: &mut dyn RhiDevice, timeout: Duration) -> RhiResult<()> {
        let last = self.fence.value();
        self.fence.wait(device, last, timeout)?;
        self.refresh_states();
        Ok(())
    }

    /// 根据上一次观察到的完成值，把已完成的 slot 标记为 Retired
    fn refresh_states(&mut self) {
        let completed = self.fence.completed_value();
        for slot in &mut self.slots {
            if slot.state == FrameState::Submitted && slot.fence_value_at_submit <= completed {
                slot.state = FrameState::Retired;
            }
        }
    }
}

// getters
impl FramePipeline {
    #[inline]
    pub fn counter(&self) -> &FrameCounter {
        &self.counter
    }
    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.fence
    }
    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.counter.frame_count()
    }
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.counter.frame_index()
    }
    #[inline]
    pub fn frame_state(&self, index: usize) -> Option<FrameState> {
        self.slots.get(index).map(|slot| slot.state)
    }
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }
    #[inline]
    pub fn is_frame_recording(&self) -> bool {
        self.slots[self.counter.frame_index()].state == FrameState::Recording
    }
    #[inline]
    pub fn is_temp_open(&self) -> bool {
        self.temp.open
    }
    /// frame 或临时 command list 正在录制
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.is_frame_recording() || self.temp.open
    }

    /// 当前录制目标的标记，用于记录资源在哪里被转换
    pub fn active_mark(&self) -> Option<RecorderMark> {
        if self.temp.open {
            Some(RecorderMark::Temp(self.temp_serial))
        } else if self.is_frame_recording() {
            Some(RecorderMark::Frame(self.counter.frame_id()))
        } else {
            None
        }
    }

    /// 资源的转换是否在尚未提交的 command list 中
    ///
    /// copy queue 上的上传会先于这些 command list 执行，此时 CPU 端记录的状态在 GPU 上还没有生效。
    pub fn has_unsubmitted_transition(&self, marks: &TransitionMarks) -> bool {
        let in_frame = self.is_frame_recording() && marks.frame == Some(self.counter.frame_id());
        let in_temp = self.temp.open && marks.temp == Some(self.temp_serial);
        in_frame || in_temp
    }

    /// 命令录制的目标：打开的临时 command list，否则是当前帧
    pub fn active_recorder(&mut self) -> RhiResult<&mut CommandRecorder> {
        if self.temp.open {
            return Ok(&mut self.temp);
        }
        let slot = &mut self.slots[self.counter.frame_index()];
        if slot.state != FrameState::Recording {
            return Err(RhiError::invalid_operation(
                "commands can only be recorded inside a frame or a temporary command list",
            ));
        }
        Ok(&mut slot.recorder)
    }

    /// 当前帧的 recorder，忽略临时 command list
    pub fn frame_recorder(&mut self) -> RhiResult<&mut CommandRecorder> {
        let slot = &mut self.slots[self.counter.frame_index()];
        if slot.state != FrameState::Recording {
            return Err(RhiError::FrameState {
                operation: "frame commands",
                state: slot.state,
            });
        }
        Ok(&mut slot.recorder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NativeTexture;
    use crate::headless::HeadlessDevice;
    use crate::resources::format::TextureFormat;
    use crate::resources::states::ResourceStates;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn frame_names_cycle_labels() {
        let mut counter = FrameCounter::new(3);
        assert_eq!(counter.frame_name(), "[F0A]");
        counter.next_frame();
        counter.next_frame();
        assert_eq!(counter.frame_name(), "[F2C]");
        counter.next_frame();
        assert_eq!(counter.frame_name(), "[F3A]");
    }

    #[test]
    fn state_machine_follows_begin_and_end() {
        let mut device = HeadlessDevice::default();
        let mut pipeline = FramePipeline::new(&mut device, 2).unwrap();
        assert_eq!(pipeline.frame_state(0), Some(FrameState::Idle));

        assert_eq!(pipeline.begin_frame(&mut device, TIMEOUT).unwrap(), 0);
        assert_eq!(pipeline.frame_state(0), Some(FrameState::Recording));
        assert!(matches!(
            pipeline.begin_frame(&mut device, TIMEOUT),
            Err(RhiError::FrameState { operation: "begin_frame", state: FrameState::Recording })
        ));

        assert_eq!(pipeline.end_frame(&mut device, &[]).unwrap(), 1);
        assert_eq!(pipeline.frame_state(0), Some(FrameState::Submitted));
        assert!(matches!(pipeline.end_frame(&mut device, &[]), Err(RhiError::FrameState { .. })));

        // slot 1 从未提交，不需要等待
        assert_eq!(pipeline.begin_frame(&mut device, TIMEOUT).unwrap(), 1);
        pipeline.end_frame(&mut device, &[]).unwrap();
        assert_eq!(device.stats().max_frames_in_flight, 2);

        // slot 0 需要等待第一帧完成
        assert_eq!(pipeline.begin_frame(&mut device, TIMEOUT).unwrap(), 0);
        assert!(pipeline.fence().completed_value() >= 1);
        pipeline.end_frame(&mut device, &[]).unwrap();

        pipeline.wait_all(&mut device, TIMEOUT).unwrap();
        assert_eq!(pipeline.frame_state(0), Some(FrameState::Retired));
        assert_eq!(pipeline.frame_state(1), Some(FrameState::Retired));
    }

    #[test]
    fn barriers_are_batched_until_the_next_command() {
        let mut device = HeadlessDevice::default();
        let mut pipeline = FramePipeline::new(&mut device, 1).unwrap();
        pipeline.begin_frame(&mut device, TIMEOUT).unwrap();

        let recorder = pipeline.active_recorder().unwrap();
        for i in 0..3 {
            recorder.queue_texture_barrier(TextureTransition {
                texture: NativeTexture(i),
                format: TextureFormat::Rgba8Unorm,
                before: ResourceStates::PIXEL_SHADER_ACCESS,
                after: ResourceStates::RENDER_TARGET,
            });
        }
        assert_eq!(recorder.pending_barrier_count(), 3);
        assert_eq!(recorder.recorded_count(), 0);

        recorder.record(&mut device, NativeCommand::Draw { vertex_count: 3, first_vertex: 0 });
        assert_eq!(recorder.pending_barrier_count(), 0);
        assert_eq!(recorder.recorded_count(), 2);

        pipeline.end_frame(&mut device, &[]).unwrap();
        pipeline.wait_all(&mut device, TIMEOUT).unwrap();
        assert_eq!(device.stats().barrier_batches, 1);
        assert_eq!(device.stats().draws, 1);
    }

    #[test]
    fn temp_list_is_synchronous_and_not_nested() {
        let mut device = HeadlessDevice::default();
        let mut pipeline = FramePipeline::new(&mut device, 2).unwrap();
        assert!(pipeline.active_recorder().is_err());

        pipeline.begin_temp(&mut device).unwrap();
        assert!(matches!(pipeline.begin_temp(&mut device), Err(RhiError::InvalidOperation(_))));
        pipeline
            .active_recorder()
            .unwrap()
            .record(&mut device, NativeCommand::Dispatch { x: 1, y: 1, z: 1 });
        pipeline.end_temp(&mut device, &[], TIMEOUT).unwrap();

        assert_eq!(pipeline.fence().completed_value(), pipeline.fence().value());
        assert_eq!(device.stats().dispatches, 1);
        assert!(pipeline.end_temp(&mut device, &[], TIMEOUT).is_err());
    }
}
