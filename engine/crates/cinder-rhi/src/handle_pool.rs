use std::marker::PhantomData;

use crate::error::{RhiError, RhiResult, StaleReason};
use crate::handle::{Handle, PoolHandle, ResourceKind};

struct Slot<T> {
    /// `Some` 表示 slot 正在使用
    payload: Option<T>,
    generation: u16,
    next_free: Option<u32>,
}

/// 固定容量的代际句柄池
///
/// - slot 存放在连续的数组中，句柄中的 index 直接索引数组
/// - `add` 不改变 generation；`remove` 使 generation 加一（回绕），因此释放前拿到的句柄
///   在 slot 被复用后一定校验失败
/// - 容量在创建时确定，不会增长；超出容量是配置错误
pub struct HandlePool<T, H: PoolHandle> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    used_count: usize,

    _marker: PhantomData<H>,
}

// new & init
impl<T, H: PoolHandle> HandlePool<T, H> {
    pub fn new(capacity: usize) -> RhiResult<Self> {
        if capacity == 0 || capacity > Handle::MAX_INDEX as usize {
            return Err(RhiError::InvalidConfig(format!(
                "{} pool capacity must be in 1..={}, got {}",
                H::KIND,
                Handle::MAX_INDEX,
                capacity
            )));
        }

        let slots = (0..capacity as u32)
            .map(|index| Slot {
                payload: None,
                generation: 0,
                next_free: if index + 1 < capacity as u32 { Some(index + 1) } else { None },
            })
            .collect();

        Ok(Self {
            slots,
            free_head: Some(0),
            used_count: 0,
            _marker: PhantomData,
        })
    }
}

// add & remove
impl<T, H: PoolHandle> HandlePool<T, H> {
    pub fn add(&mut self, payload: T) -> RhiResult<H> {
        let Some(index) = self.free_head else {
            return Err(RhiError::PoolExhausted {
                kind: H::KIND,
                capacity: self.capacity(),
            });
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.payload.is_none());
        self.free_head = slot.next_free.take();
        slot.payload = Some(payload);
        self.used_count += 1;

        Ok(H::from_raw(Handle::new(H::KIND, index, slot.generation)))
    }

    /// 释放句柄对应的 slot，返回其中的资源，由调用者负责销毁 native 对象
    pub fn remove(&mut self, handle: H) -> RhiResult<T> {
        let raw = handle.raw();
        let index = match self.check_kind_and_index(raw) {
            Ok(index) => index,
            Err(reason) => return Err(RhiError::StaleHandle { handle: raw, reason }),
        };

        let slot = &self.slots[index];
        if slot.payload.is_none() {
            return Err(RhiError::DoubleFree(raw));
        }
        if let Err(reason) = Self::check_generation(raw, slot.generation) {
            return Err(RhiError::StaleHandle { handle: raw, reason });
        }

        self.release_slot(index).ok_or(RhiError::DoubleFree(raw))
    }

    /// 移除所有满足条件的资源，按 index 顺序返回
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Vec<(H, T)> {
        let mut removed = Vec::new();
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            let matches = slot.payload.as_ref().is_some_and(&mut predicate);
            if matches {
                let handle = H::from_raw(Handle::new(H::KIND, index as u32, slot.generation));
                if let Some(payload) = self.release_slot(index) {
                    removed.push((handle, payload));
                }
            }
        }
        removed
    }

    fn release_slot(&mut self, index: usize) -> Option<T> {
        let slot = &mut self.slots[index];
        let payload = slot.payload.take()?;
        // 释放时 generation 加一，使旧句柄失效
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = self.free_head;
        self.free_head = Some(index as u32);
        self.used_count -= 1;
        Some(payload)
    }
}

// lookup
impl<T, H: PoolHandle> HandlePool<T, H> {
    pub fn get(&self, handle: H) -> RhiResult<&T> {
        let raw = handle.raw();
        let index = self.validate(raw).map_err(|reason| RhiError::StaleHandle { handle: raw, reason })?;
        self.slots[index].payload.as_ref().ok_or(RhiError::StaleHandle {
            handle: raw,
            reason: StaleReason::UnusedSlot,
        })
    }

    pub fn get_mut(&mut self, handle: H) -> RhiResult<&mut T> {
        let raw = handle.raw();
        let index = self.validate(raw).map_err(|reason| RhiError::StaleHandle { handle: raw, reason })?;
        self.slots[index].payload.as_mut().ok_or(RhiError::StaleHandle {
            handle: raw,
            reason: StaleReason::UnusedSlot,
        })
    }

    /// 防御性查询：句柄无效时返回 None
    pub fn try_get(&self, handle: H) -> Option<&T> {
        let index = self.validate(handle.raw()).ok()?;
        self.slots[index].payload.as_ref()
    }

    pub fn try_get_mut(&mut self, handle: H) -> Option<&mut T> {
        let index = self.validate(handle.raw()).ok()?;
        self.slots[index].payload.as_mut()
    }

    #[inline]
    pub fn contains(&self, handle: H) -> bool {
        self.validate(handle.raw()).is_ok()
    }

    fn validate(&self, raw: Handle) -> Result<usize, StaleReason> {
        let index = self.check_kind_and_index(raw)?;
        let slot = &self.slots[index];
        if slot.payload.is_none() {
            return Err(StaleReason::UnusedSlot);
        }
        Self::check_generation(raw, slot.generation)?;
        Ok(index)
    }

    fn check_kind_and_index(&self, raw: Handle) -> Result<usize, StaleReason> {
        if raw.kind() != H::KIND {
            return Err(StaleReason::WrongKind { expected: H::KIND });
        }
        let index = raw.index() as usize;
        if index >= self.slots.len() {
            return Err(StaleReason::BadIndex);
        }
        Ok(index)
    }

    /// generation 比较按 16 bit 回绕处理：slot 领先说明句柄已被释放，落后说明句柄来自 "未来"
    fn check_generation(raw: Handle, slot_generation: u16) -> Result<(), StaleReason> {
        let ahead = slot_generation.wrapping_sub(raw.generation()) as i16;
        match ahead {
            0 => Ok(()),
            n if n > 0 => Err(StaleReason::Freed),
            _ => Err(StaleReason::FromFuture),
        }
    }
}

// iteration
impl<T, H: PoolHandle> HandlePool<T, H> {
    /// 从 `cursor` 开始查找下一个正在使用的 slot，并把 `cursor` 推进到它之后
    pub fn find_next(&self, cursor: &mut usize) -> Option<H> {
        while *cursor < self.slots.len() {
            let index = *cursor;
            *cursor += 1;
            let slot = &self.slots[index];
            if slot.payload.is_some() {
                return Some(H::from_raw(Handle::new(H::KIND, index as u32, slot.generation)));
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.payload
                .as_ref()
                .map(|payload| (H::from_raw(Handle::new(H::KIND, index as u32, slot.generation)), payload))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (H, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.payload
                .as_mut()
                .map(|payload| (H::from_raw(Handle::new(H::KIND, index as u32, generation)), payload))
        })
    }

    pub fn handles(&self) -> Vec<H> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

// getters
impl<T, H: PoolHandle> HandlePool<T, H> {
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        H::KIND
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn count_used(&self) -> usize {
        self.used_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used_count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{BufferHandle, TextureHandle};

    fn pool(capacity: usize) -> HandlePool<String, BufferHandle> {
        HandlePool::new(capacity).unwrap()
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut pool = pool(4);
        let a = pool.add("a".to_string()).unwrap();
        let b = pool.add("b".to_string()).unwrap();

        assert_eq!(pool.get(a).unwrap(), "a");
        assert_eq!(pool.get(b).unwrap(), "b");
        assert_eq!(pool.count_used(), 2);

        pool.get_mut(a).unwrap().push('!');
        assert_eq!(pool.try_get(a).map(String::as_str), Some("a!"));
    }

    #[test]
    fn stale_handle_fails_after_slot_reuse() {
        let mut pool = pool(1);
        let old = pool.add("old".to_string()).unwrap();
        assert_eq!(pool.remove(old).unwrap(), "old");

        let new = pool.add("new".to_string()).unwrap();
        assert_eq!(new.raw().index(), old.raw().index());
        assert_ne!(new.raw().generation(), old.raw().generation());

        assert!(pool.try_get(old).is_none());
        assert!(matches!(
            pool.get(old),
            Err(RhiError::StaleHandle {
                reason: StaleReason::Freed,
                ..
            })
        ));
        assert_eq!(pool.get(new).unwrap(), "new");
    }

    #[test]
    fn stale_handles_fail_for_arbitrary_sequences() {
        let mut pool = pool(8);
        let mut live: Vec<(BufferHandle, u32)> = Vec::new();
        let mut dead: Vec<BufferHandle> = Vec::new();

        // 简单的 LCG，保证序列可重复
        let mut seed = 0x2545_f491_u32;
        for step in 0..2000_u32 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let remove = !live.is_empty() && (seed >> 16) % 3 == 0 || pool.is_full();
            if remove {
                let victim = live.swap_remove((seed as usize >> 4) % live.len());
                pool.remove(victim.0).unwrap();
                dead.push(victim.0);
            } else {
                let handle = pool.add(step.to_string()).unwrap();
                live.push((handle, step));
            }

            for (handle, value) in &live {
                assert_eq!(pool.get(*handle).unwrap(), &value.to_string());
            }
        }

        for handle in dead {
            assert!(pool.try_get(handle).is_none(), "{handle} should be stale");
        }
    }

    #[test]
    fn double_free_is_reported() {
        let mut pool = pool(2);
        let handle = pool.add("x".to_string()).unwrap();
        pool.remove(handle).unwrap();
        assert!(matches!(pool.remove(handle), Err(RhiError::DoubleFree(h)) if h == handle.raw()));
    }

    #[test]
    fn exhausted_pool_keeps_existing_handles_valid() {
        let mut pool = pool(1);
        let first = pool.add("first".to_string()).unwrap();
        let second = pool.add("second".to_string());

        assert!(matches!(
            second,
            Err(RhiError::PoolExhausted {
                kind: ResourceKind::Buffer,
                capacity: 1
            })
        ));
        assert_eq!(pool.get(first).unwrap(), "first");
    }

    #[test]
    fn wrong_kind_bad_index_and_future_are_distinguished() {
        let mut pool = pool(2);
        let handle = pool.add("x".to_string()).unwrap();

        let wrong_kind = BufferHandle::from_raw(TextureHandle::from_raw(Handle::new(ResourceKind::Texture, 0, 0)).raw());
        assert!(matches!(
            pool.get(wrong_kind),
            Err(RhiError::StaleHandle {
                reason: StaleReason::WrongKind { .. },
                ..
            })
        ));

        let bad_index = BufferHandle::from_raw(Handle::new(ResourceKind::Buffer, 99, 0));
        assert!(matches!(
            pool.get(bad_index),
            Err(RhiError::StaleHandle {
                reason: StaleReason::BadIndex,
                ..
            })
        ));

        let future = BufferHandle::from_raw(Handle::new(ResourceKind::Buffer, handle.raw().index(), 5));
        assert!(matches!(
            pool.get(future),
            Err(RhiError::StaleHandle {
                reason: StaleReason::FromFuture,
                ..
            })
        ));

        let unused = BufferHandle::from_raw(Handle::new(ResourceKind::Buffer, 1, 0));
        assert!(matches!(
            pool.get(unused),
            Err(RhiError::StaleHandle {
                reason: StaleReason::UnusedSlot,
                ..
            })
        ));
    }

    #[test]
    fn generation_wraps_at_sixteen_bits() {
        let mut pool = pool(1);
        let mut handle = pool.add(String::new()).unwrap();
        for _ in 0..u16::MAX as u32 {
            pool.remove(handle).unwrap();
            handle = pool.add(String::new()).unwrap();
        }
        assert_eq!(handle.raw().generation(), u16::MAX);

        pool.remove(handle).unwrap();
        let wrapped = pool.add(String::new()).unwrap();
        assert_eq!(wrapped.raw().generation(), 0);
        assert!(pool.try_get(handle).is_none());
    }

    #[test]
    fn find_next_visits_used_slots_in_order() {
        let mut pool = pool(5);
        let handles: Vec<_> = (0..5).map(|i| pool.add(i.to_string()).unwrap()).collect();
        pool.remove(handles[1]).unwrap();
        pool.remove(handles[3]).unwrap();

        let mut cursor = 0;
        let mut visited = Vec::new();
        while let Some(handle) = pool.find_next(&mut cursor) {
            visited.push(handle);
        }
        assert_eq!(visited, vec![handles[0], handles[2], handles[4]]);
        assert_eq!(pool.count_used(), 3);
    }

    #[test]
    fn remove_where_only_takes_matching_payloads() {
        let mut pool = pool(4);
        let keep = pool.add("keep".to_string()).unwrap();
        let drop_a = pool.add("drop".to_string()).unwrap();
        let drop_b = pool.add("drop".to_string()).unwrap();

        let removed = pool.remove_where(|payload| payload == "drop");
        let removed_handles: Vec<_> = removed.iter().map(|(h, _)| *h).collect();
        assert_eq!(removed_handles, vec![drop_a, drop_b]);
        assert!(pool.contains(keep));
        assert!(!pool.contains(drop_a));
        assert_eq!(pool.count_used(), 1);
    }

    #[test]
    fn zero_capacity_is_a_config_error() {
        assert!(matches!(
            HandlePool::<u8, BufferHandle>::new(0),
            Err(RhiError::InvalidConfig(_))
        ));
    }
}
