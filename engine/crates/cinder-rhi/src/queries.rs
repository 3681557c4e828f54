use std::fmt;

use crate::device::{NativeCommand, NativeQueryPool, RhiDevice};
use crate::error::{RhiError, RhiResult};

/// `cmd_begin_duration_query` 返回的标识，只在发出它的那一帧内有效
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DurationQueryId {
    frame_id: u64,
    index: u32,
}

impl fmt::Display for DurationQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query {} of frame {}", self.index, self.frame_id)
    }
}

/// 一个已经解析的 GPU 耗时
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DurationSample {
    pub name: String,
    pub micros: u64,
}

struct PendingQuery {
    name: String,
    ended: bool,
}

#[derive(Default)]
struct FrameQueries {
    frame_id: u64,
    /// slot 是否录制过帧
    started: bool,
    queries: Vec<PendingQuery>,
}

/// GPU timestamp 查询
///
/// 所有帧共用一个 query pool，每个 frame slot 占 `2 * max_per_frame` 个 timestamp。
/// slot 的 fence 完成之后，该 slot 的查询才会被读回。
pub struct DurationQueries {
    pool: NativeQueryPool,
    max_per_frame: u32,
    frames: Vec<FrameQueries>,
    resolved: Vec<DurationSample>,
    resolved_frame_id: Option<u64>,
}

// new & init
impl DurationQueries {
    pub fn new(device: &mut dyn RhiDevice, frame_count: u32, max_per_frame: u32) -> RhiResult<Self> {
        let pool = device.create_query_pool(2 * max_per_frame * frame_count, "duration queries")?;
        Ok(Self {
            pool,
            max_per_frame,
            frames: (0..frame_count).map(|_| FrameQueries::default()).collect(),
            resolved: Vec::new(),
            resolved_frame_id: None,
        })
    }
}

// destroy
impl DurationQueries {
    pub fn destroy(self, device: &mut dyn RhiDevice) {
        device.destroy_query_pool(self.pool);
    }
}

// getters
impl DurationQueries {
    #[inline]
    pub fn max_per_frame(&self) -> u32 {
        self.max_per_frame
    }

    /// 最近一次解析的帧的结果
    #[inline]
    pub fn durations(&self) -> &[DurationSample] {
        &self.resolved
    }

    #[inline]
    pub fn resolved_frame_id(&self) -> Option<u64> {
        self.resolved_frame_id
    }

    #[inline]
    pub fn pending_count(&self, frame_index: usize) -> usize {
        self.frames[frame_index].queries.len()
    }
}

// tools
impl DurationQueries {
    /// 开始一帧的记录；该 slot 之前的查询必须已经被 `resolve`
    pub fn start_frame(&mut self, frame_index: usize, frame_id: u64) {
        let frame = &mut self.frames[frame_index];
        debug_assert!(frame.queries.is_empty());
        frame.frame_id = frame_id;
        frame.started = true;
        frame.queries.clear();
    }

    /// 分配一个查询，返回需要录制的起始 timestamp 命令
    pub fn begin(&mut self, frame_index: usize, name: &str) -> RhiResult<(DurationQueryId, NativeCommand)> {
        let frame = &mut self.frames[frame_index];
        if frame.queries.len() as u32 >= self.max_per_frame {
            return Err(RhiError::DurationQueriesExhausted {
                limit: self.max_per_frame,
            });
        }

        let index = frame.queries.len() as u32;
        frame.queries.push(PendingQuery {
            name: name.to_string(),
            ended: false,
        });
        let id = DurationQueryId {
            frame_id: frame.frame_id,
            index,
        };
        let command = NativeCommand::WriteTimestamp {
            pool: self.pool,
            index: self.timestamp_index(frame_index, index),
        };
        Ok((id, command))
    }

    pub fn end(&mut self, frame_index: usize, id: DurationQueryId) -> RhiResult<NativeCommand> {
        let frame = &mut self.frames[frame_index];
        if id.frame_id != frame.frame_id {
            return Err(RhiError::invalid_operation(format!(
                "{id} cannot be ended in frame {}",
                frame.frame_id
            )));
        }
        let query = frame
            .queries
            .get_mut(id.index as usize)
            .ok_or_else(|| RhiError::invalid_operation(format!("{id} was never started")))?;
        if query.ended {
            return Err(RhiError::invalid_operation(format!("{id} ('{}') was already ended", query.name)));
        }

        query.ended = true;
        Ok(NativeCommand::WriteTimestamp {
            pool: self.pool,
            index: self.timestamp_index(frame_index, id.index) + 1,
        })
    }

    /// 结束帧内所有未结束的查询，返回需要录制的结束 timestamp 命令
    ///
    /// 未写入的 timestamp 在读回时可能永远不可用，所以每个查询在提交前都必须有结束 timestamp。
    pub fn close_open(&mut self, frame_index: usize) -> Vec<NativeCommand> {
        let base = self.timestamp_index(frame_index, 0);
        let pool = self.pool;
        self.frames[frame_index]
            .queries
            .iter_mut()
            .enumerate()
            .filter(|(_, query)| !query.ended)
            .map(|(index, query)| {
                log::warn!("duration query '{}' was not ended, closing it at the end of the frame", query.name);
                query.ended = true;
                NativeCommand::WriteTimestamp {
                    pool,
                    index: base + index as u32 * 2 + 1,
                }
            })
            .collect()
    }

    /// 读回 slot 中的查询；调用方保证这一帧已经在 GPU 上完成
    pub fn resolve(&mut self, device: &mut dyn RhiDevice, frame_index: usize) -> RhiResult<()> {
        let frame = &mut self.frames[frame_index];
        if !frame.started {
            return Ok(());
        }
        let frame_id = frame.frame_id;
        let queries = std::mem::take(&mut frame.queries);

        self.resolved.clear();
        self.resolved_frame_id = Some(frame_id);
        if queries.is_empty() {
            return Ok(());
        }

        let mut timestamps = vec![0u64; queries.len() * 2];
        device.read_timestamps(self.pool, self.timestamp_index(frame_index, 0), &mut timestamps)?;
        let frequency = device.timestamp_frequency().max(1);

        for (query, ticks) in queries.into_iter().zip(timestamps.chunks_exact(2)) {
            debug_assert!(query.ended, "duration query '{}' reached the GPU without an end", query.name);
            let elapsed = ticks[1].saturating_sub(ticks[0]);
            let micros = (elapsed as u128 * 1_000_000 / frequency as u128) as u64;
            self.resolved.push(DurationSample {
                name: query.name,
                micros,
            });
        }
        Ok(())
    }

    #[inline]
    fn timestamp_index(&self, frame_index: usize, query_index: u32) -> u32 {
        (frame_index as u32 * self.max_per_frame + query_index) * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn frames_use_disjoint_timestamp_ranges() {
        let mut device = HeadlessDevice::default();
        let mut queries = DurationQueries::new(&mut device, 2, 4).unwrap();

        queries.start_frame(1, 7);
        let (id, begin) = queries.begin(1, "world").unwrap();
        let end = queries.end(1, id).unwrap();
        assert!(matches!(begin, NativeCommand::WriteTimestamp { index: 8, .. }));
        assert!(matches!(end, NativeCommand::WriteTimestamp { index: 9, .. }));
    }

    #[test]
    fn per_frame_limit_is_enforced() {
        let mut device = HeadlessDevice::default();
        let mut queries = DurationQueries::new(&mut device, 1, 2).unwrap();
        queries.start_frame(0, 0);
        queries.begin(0, "a").unwrap();
        queries.begin(0, "b").unwrap();
        assert!(matches!(queries.begin(0, "c"), Err(RhiError::DurationQueriesExhausted { limit: 2 })));
    }

    #[test]
    fn ending_twice_or_across_frames_fails() {
        let mut device = HeadlessDevice::default();
        let mut queries = DurationQueries::new(&mut device, 2, 4).unwrap();
        queries.start_frame(0, 0);
        let (id, _) = queries.begin(0, "world").unwrap();
        queries.end(0, id).unwrap();
        assert!(matches!(queries.end(0, id), Err(RhiError::InvalidOperation(_))));

        queries.start_frame(1, 1);
        assert!(matches!(queries.end(1, id), Err(RhiError::InvalidOperation(_))));
    }

    #[test]
    fn open_queries_are_closed_with_their_end_timestamp() {
        let mut device = HeadlessDevice::default();
        let mut queries = DurationQueries::new(&mut device, 2, 4).unwrap();
        queries.start_frame(1, 3);
        let (first, _) = queries.begin(1, "closed").unwrap();
        queries.end(1, first).unwrap();
        queries.begin(1, "left open").unwrap();

        let commands = queries.close_open(1);
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], NativeCommand::WriteTimestamp { index: 11, .. }));
        assert!(queries.close_open(1).is_empty());
    }

    #[test]
    fn empty_frame_replaces_older_results() {
        let mut device = HeadlessDevice::default();
        let mut queries = DurationQueries::new(&mut device, 1, 4).unwrap();

        // slot 还没有录制过帧
        queries.resolve(&mut device, 0).unwrap();
        assert_eq!(queries.resolved_frame_id(), None);

        queries.start_frame(0, 0);
        let (id, _) = queries.begin(0, "scene").unwrap();
        queries.end(0, id).unwrap();
        queries.resolve(&mut device, 0).unwrap();
        assert_eq!(queries.durations().len(), 1);
        assert_eq!(queries.resolved_frame_id(), Some(0));

        queries.start_frame(0, 1);
        queries.resolve(&mut device, 0).unwrap();
        assert!(queries.durations().is_empty());
        assert_eq!(queries.resolved_frame_id(), Some(1));
    }
}
