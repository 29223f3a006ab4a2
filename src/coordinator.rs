//! Double-buffer coordinator.
//!
//! Writers append into the active buffer; the coordinator periodically flips
//! the selector and clears the buffer that was just deactivated. The clear is
//! only safe once no writer can still be acting on the pre-flip selector,
//! which is what the quiescence barrier guarantees.
//!
//! One cycle, with `active` the logical index before the call:
//!
//! ```text
//! active ^= 1                 // B becomes active, A is now vacant
//! selector.set(active)
//! barrier.synchronize()?      // synchronized mode only
//! buffers[active ^ 1].clear() // clear A
//! ```
//!
//! The next cycle checks that A is still empty before flipping it back in.
//! Without the barrier a writer that read the old selector can land an entry
//! in A after it was cleared, and that check fails.
//!
//! 双缓冲协调者。协调者翻转选择器，然后清空刚刚被停用的缓冲区。
//! 只有在没有写入者仍按翻转前的选择器行事时清空才是安全的，这正是静默屏障所保证的。

use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::barrier::QuiescenceBarrier;
use crate::buffer::{AssocBuffer, BufferSpec};
use crate::error::{Error, Result};
use crate::selector::ActiveSelector;
use crate::sync::Arc;

/// The buffer set writers are attached to: two buffers and the selector
/// naming the active one.
///
/// 写入者所附加的缓冲区集合：两个缓冲区以及命名活跃缓冲区的选择器。
pub struct StatsMaps<K, V> {
    buffers: [Arc<AssocBuffer<K, V>>; 2],
    selector: ActiveSelector,
}

impl<K, V> Clone for StatsMaps<K, V> {
    fn clone(&self) -> Self {
        Self {
            buffers: [self.buffers[0].clone(), self.buffers[1].clone()],
            selector: self.selector.clone(),
        }
    }
}

impl<K, V> StatsMaps<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    /// Create both buffers from `spec` and a selector pointing at buffer 0.
    /// 根据 `spec` 创建两个缓冲区，以及指向缓冲区 0 的选择器。
    pub fn create(spec: BufferSpec) -> Result<Self> {
        let first = AssocBuffer::create(spec).map_err(Error::BufferSetup)?;
        let second = AssocBuffer::create(spec).map_err(Error::BufferSetup)?;
        let selector = ActiveSelector::new(0).map_err(Error::SelectorSetup)?;
        Ok(Self::from_parts(Arc::new(first), Arc::new(second), selector))
    }

    /// Assemble a set from existing handles.
    /// 用已有的句柄组装一个集合。
    pub fn from_parts(
        first: Arc<AssocBuffer<K, V>>,
        second: Arc<AssocBuffer<K, V>>,
        selector: ActiveSelector,
    ) -> Self {
        Self {
            buffers: [first, second],
            selector,
        }
    }

    /// Buffer `index & 1`.
    /// 缓冲区 `index & 1`。
    #[inline]
    pub fn buffer(&self, index: u32) -> &Arc<AssocBuffer<K, V>> {
        &self.buffers[(index & 1) as usize]
    }

    /// Index the selector currently names. May be stale, like any read.
    /// 选择器当前命名的索引，与任何读取一样可能是过期的。
    pub fn active_index(&self) -> Result<u32> {
        Ok(self.selector.get()?)
    }

    /// Buffer the selector currently names.
    /// 选择器当前命名的缓冲区。
    pub fn active(&self) -> Result<&Arc<AssocBuffer<K, V>>> {
        Ok(self.buffer(self.active_index()?))
    }

    /// Buffer the selector does not name.
    /// 选择器没有命名的缓冲区。
    pub fn inactive(&self) -> Result<&Arc<AssocBuffer<K, V>>> {
        Ok(self.buffer(self.active_index()? ^ 1))
    }

    /// The shared selector.
    /// 共享的选择器。
    #[inline]
    pub fn selector(&self) -> &ActiveSelector {
        &self.selector
    }

    /// Tear down both buffers and the selector.
    /// 销毁两个缓冲区和选择器。
    pub fn destroy(&self) {
        self.buffers[0].destroy();
        self.buffers[1].destroy();
        self.selector.destroy();
    }
}

impl<K, V> std::fmt::Debug for StatsMaps<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsMaps")
            .field("buffers", &self.buffers)
            .field("selector", &self.selector)
            .finish()
    }
}

/// Whether a swap cycle waits for a grace period before clearing.
/// 交换周期在清空之前是否等待宽限期。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Flip, synchronize, then clear.
    /// 翻转、同步，然后清空。
    Synchronized,
    /// Flip, then clear immediately. Racy on purpose.
    /// 翻转后立即清空，故意存在竞争。
    Unsynchronized,
}

/// Result of one [`SwapCoordinator::swap_and_clear`] call.
/// 一次 [`SwapCoordinator::swap_and_clear`] 调用的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapReport {
    /// Index made active by this cycle.
    /// 本周期设为活跃的索引。
    pub active: u32,
    /// Entries removed from the deactivated buffer.
    /// 从被停用的缓冲区中删除的条目数。
    pub cleared: usize,
    /// Whether a grace period separated the flip from the clear.
    /// 翻转与清空之间是否隔着一个宽限期。
    pub synchronized: bool,
}

/// How a [`SwapCoordinator::run`] loop ended.
/// [`SwapCoordinator::run`] 循环如何结束。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The budget ran out and every vacant-buffer check passed.
    /// 预算耗尽且每次空闲缓冲区检查都通过。
    Clean {
        /// Completed swap cycles.
        /// 完成的交换周期数。
        cycles: u64,
        /// Time spent in the loop.
        /// 循环所用的时间。
        elapsed: Duration,
    },
    /// A vacant buffer held entries when it was about to be reused.
    /// 空闲缓冲区在即将被复用时仍有条目。
    Violated {
        /// Completed swap cycles before the violation.
        /// 违规之前完成的交换周期数。
        cycles: u64,
        /// Time until the violation was seen.
        /// 观察到违规之前的时间。
        elapsed: Duration,
        /// Entries found in the vacant buffer.
        /// 在空闲缓冲区中发现的条目数。
        residual: usize,
    },
}

impl RunOutcome {
    /// Whether a residual entry was observed.
    /// 是否观察到残留条目。
    pub fn is_violated(&self) -> bool {
        matches!(self, RunOutcome::Violated { .. })
    }

    /// Completed swap cycles.
    /// 完成的交换周期数。
    pub fn cycles(&self) -> u64 {
        match *self {
            RunOutcome::Clean { cycles, .. } | RunOutcome::Violated { cycles, .. } => cycles,
        }
    }
}

/// Drives the flip / grace period / clear cycle. Sole writer of the selector.
/// 驱动翻转 / 宽限期 / 清空周期，是选择器唯一的写入者。
pub struct SwapCoordinator<K, V> {
    maps: StatsMaps<K, V>,
    active: u32,
    barrier: Option<QuiescenceBarrier>,
}

impl<K, V> SwapCoordinator<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    /// Take over `maps`, starting from the selector's current index.
    ///
    /// Without a barrier only [`SyncMode::Unsynchronized`] cycles can run.
    ///
    /// 接管 `maps`，从选择器的当前索引开始。
    pub fn new(maps: StatsMaps<K, V>, barrier: Option<QuiescenceBarrier>) -> Result<Self> {
        let active = maps.selector().get().map_err(Error::SelectorSetup)?;
        Ok(Self {
            maps,
            active,
            barrier,
        })
    }

    /// Logical active index.
    /// 逻辑上的活跃索引。
    #[inline]
    pub fn active_index(&self) -> u32 {
        self.active
    }

    /// The buffer set.
    /// 缓冲区集合。
    #[inline]
    pub fn maps(&self) -> &StatsMaps<K, V> {
        &self.maps
    }

    /// The barrier, if any.
    /// 屏障（如果有）。
    #[inline]
    pub fn barrier(&self) -> Option<&QuiescenceBarrier> {
        self.barrier.as_ref()
    }

    /// The buffer writers should not be targeting.
    /// 写入者不应指向的缓冲区。
    #[inline]
    pub fn vacant(&self) -> &Arc<AssocBuffer<K, V>> {
        self.maps.buffer(self.active ^ 1)
    }

    /// Whether the vacant buffer is empty. Enumeration errors propagate.
    /// 空闲缓冲区是否为空。枚举错误会被传播。
    pub fn check_vacant(&self) -> Result<bool> {
        Ok(self.vacant().is_empty()?)
    }

    /// Run one cycle: flip, optionally synchronize, clear the deactivated buffer.
    /// 运行一个周期：翻转，可选地同步，然后清空被停用的缓冲区。
    pub fn swap_and_clear(&mut self, mode: SyncMode) -> Result<SwapReport> {
        if mode == SyncMode::Synchronized && self.barrier.is_none() {
            return Err(Error::MissingBarrier);
        }

        let next = self.active ^ 1;
        self.maps.selector().set(next)?;
        self.active = next;

        if mode == SyncMode::Synchronized {
            if let Some(barrier) = self.barrier.as_mut() {
                barrier.synchronize()?;
            }
        }

        let cleared = self.vacant().clear()?;

        Ok(SwapReport {
            active: next,
            cleared,
            synchronized: mode == SyncMode::Synchronized,
        })
    }

    /// Bring the vacant buffer back to empty before a new run.
    ///
    /// Waits for a grace period first when a barrier is present, so no writer
    /// acting on an older selector reading can refill the buffer afterwards.
    /// Returns the number of stale entries removed.
    ///
    /// 在新一轮运行之前将空闲缓冲区恢复为空。有屏障时先等待一个宽限期，
    /// 使按旧选择器行事的写入者之后无法再填充该缓冲区。返回被移除的残留条目数。
    pub fn reclaim_vacant(&mut self) -> Result<usize> {
        if let Some(barrier) = self.barrier.as_mut() {
            barrier.synchronize()?;
        }
        let stale = self.vacant().clear()?;
        if stale > 0 {
            tracing::debug!(stale, vacant = %self.vacant().id(), "reclaimed stale entries");
        }
        Ok(stale)
    }

    /// Check-then-swap until `budget` elapses or the vacant buffer is found
    /// non-empty.
    ///
    /// A violation is returned as [`RunOutcome::Violated`], never as an error;
    /// whether it counts as a pass depends on `mode`. Errors are
    /// infrastructure failures and end the loop.
    ///
    /// 先检查后交换，直到 `budget` 耗尽或发现空闲缓冲区非空。
    pub fn run(&mut self, mode: SyncMode, budget: Duration) -> Result<RunOutcome> {
        if mode == SyncMode::Synchronized && self.barrier.is_none() {
            return Err(Error::MissingBarrier);
        }

        let start = Instant::now();
        let mut cycles = 0u64;

        while start.elapsed() < budget {
            if !self.check_vacant()? {
                let residual = self.vacant().len()?;
                let elapsed = start.elapsed();
                tracing::warn!(
                    ?mode,
                    cycles,
                    residual,
                    vacant = %self.vacant().id(),
                    "vacant buffer not empty before reuse"
                );
                return Ok(RunOutcome::Violated {
                    cycles,
                    elapsed,
                    residual,
                });
            }

            self.swap_and_clear(mode)?;
            cycles += 1;
        }

        let elapsed = start.elapsed();
        tracing::debug!(?mode, cycles, ?elapsed, "swap loop finished clean");
        Ok(RunOutcome::Clean { cycles, elapsed })
    }
}

impl<K, V> std::fmt::Debug for SwapCoordinator<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapCoordinator")
            .field("active", &self.active)
            .field("barrier", &self.barrier)
            .finish_non_exhaustive()
    }
}
