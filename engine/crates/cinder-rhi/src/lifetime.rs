//! 资源生命周期策略
//!
//! 每个资源在创建时标记为 persistent 或 short-lived。short-lived 资源（例如只属于当前地图的
//! PSO cache、level texture）在切换场景时通过 [`sweep_pool`] 整体销毁，persistent 资源不受影响。
//!
//! 这里没有引用计数：sweep 之后继续使用被回收的句柄是调用方的错误，
//! 由句柄的 generation 校验在下一次查询时发现。

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::handle::{PoolHandle, ResourceKind};
use crate::handle_pool::HandlePool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifetime {
    /// 直到显式 destroy
    #[default]
    Persistent,
    /// 直到下一次 short-lived sweep
    ShortLived,
}

impl Lifetime {
    #[inline]
    pub fn from_short_lived(short_lived: bool) -> Self {
        if short_lived { Lifetime::ShortLived } else { Lifetime::Persistent }
    }

    #[inline]
    pub fn is_short_lived(self) -> bool {
        self == Lifetime::ShortLived
    }
}

/// 所有资源记录都需要报告自己的生命周期
pub trait LifetimeTagged {
    fn lifetime(&self) -> Lifetime;
}

/// sweep 的范围
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepScope {
    ShortLivedOnly,
    Everything,
}

impl SweepScope {
    #[inline]
    pub fn includes(self, lifetime: Lifetime) -> bool {
        match self {
            SweepScope::ShortLivedOnly => lifetime.is_short_lived(),
            SweepScope::Everything => true,
        }
    }
}

/// 从池中取出 scope 覆盖的所有资源；native 对象的销毁由调用方完成
pub fn sweep_pool<T: LifetimeTagged, H: PoolHandle>(pool: &mut HandlePool<T, H>, scope: SweepScope) -> Vec<(H, T)> {
    pool.remove_where(|record| scope.includes(record.lifetime()))
}

/// 一次 sweep 销毁的资源数量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    counts: [usize; ResourceKind::ALL.len()],
}

impl SweepReport {
    #[inline]
    pub fn record(&mut self, kind: ResourceKind, count: usize) {
        self.counts[kind as usize] += count;
    }

    #[inline]
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.counts[kind as usize]
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = ResourceKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let count = self.count(kind);
                (count > 0).then(|| format!("{count} {kind}"))
            })
            .join(", ");
        if counts.is_empty() { f.write_str("nothing") } else { f.write_str(&counts) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TextureHandle;

    struct Tagged(Lifetime, u32);
    impl LifetimeTagged for Tagged {
        fn lifetime(&self) -> Lifetime {
            self.0
        }
    }

    #[test]
    fn short_lived_sweep_leaves_persistent_records_untouched() {
        let mut pool: HandlePool<Tagged, TextureHandle> = HandlePool::new(8).unwrap();
        let persistent = pool.add(Tagged(Lifetime::Persistent, 1)).unwrap();
        let short_a = pool.add(Tagged(Lifetime::ShortLived, 2)).unwrap();
        let short_b = pool.add(Tagged(Lifetime::ShortLived, 3)).unwrap();

        let swept = sweep_pool(&mut pool, SweepScope::ShortLivedOnly);
        let swept_handles: Vec<_> = swept.iter().map(|(h, _)| *h).collect();
        assert_eq!(swept_handles, vec![short_a, short_b]);

        let kept = pool.get(persistent).unwrap();
        assert_eq!(kept.1, 1);
        assert!(pool.try_get(short_a).is_none());
        assert!(pool.try_get(short_b).is_none());
    }

    #[test]
    fn everything_scope_empties_the_pool() {
        let mut pool: HandlePool<Tagged, TextureHandle> = HandlePool::new(4).unwrap();
        pool.add(Tagged(Lifetime::Persistent, 1)).unwrap();
        pool.add(Tagged(Lifetime::ShortLived, 2)).unwrap();

        assert_eq!(sweep_pool(&mut pool, SweepScope::Everything).len(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn report_display_lists_non_zero_kinds() {
        let mut report = SweepReport::default();
        assert_eq!(report.to_string(), "nothing");
        report.record(ResourceKind::Texture, 2);
        report.record(ResourceKind::Pipeline, 1);
        assert_eq!(report.total(), 3);
        assert_eq!(report.to_string(), "2 Texture, 1 Pipeline");
    }
}
