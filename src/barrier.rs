use std::time::{Duration, Instant};
use std::vec::Vec;

use crate::error::BarrierError;
use crate::state::{ContextSlot, DomainState, INACTIVE_EPOCH};
use crate::sync::{Arc, Ordering, fence, spin_loop, yield_now};

/// The unique quiescence barrier of a domain.
///
/// There is exactly one `QuiescenceBarrier` per `QuiescenceDomain`, owned by
/// the coordinator. It is responsible for:
/// - Advancing the global epoch once per grace period.
/// - Waiting until no writer context is still inside a critical section that
///   began before the advance.
/// - Pruning slots of contexts that were dropped.
///
/// **Thread Safety**: `synchronize` takes `&mut self`; one caller at a time.
///
/// 一个静默域的唯一屏障，由协调者持有。
/// 它负责：
/// - 每个宽限期推进一次全局纪元。
/// - 等待直到没有写入上下文仍处于推进之前开始的临界区内。
/// - 清理已被 drop 的上下文槽。
pub struct QuiescenceBarrier {
    pub(crate) shared: Arc<DomainState>,
    pub(crate) spin_before_yield: u32,
    pub(crate) cleanup_interval: usize,
    pub(crate) max_wait: Option<Duration>,
    pub(crate) collection_counter: usize,
}

impl QuiescenceBarrier {
    /// Block until every critical section that may have observed state
    /// published before this call has ended.
    ///
    /// When this returns `Ok`, any write issued by a context that read the
    /// selector before the caller's last `set` has completed, and every
    /// critical section entered from now on observes that `set`. Nothing is
    /// promised about writes issued after the return.
    ///
    /// **Algorithm**:
    /// 1. Advance the global epoch to `target`.
    /// 2. Snapshot registered slots (pruning dead ones every `cleanup_interval` calls).
    /// 3. For each slot, wait until it is inactive or at an epoch `>= target`.
    ///
    /// Safe to call with no registered contexts.
    ///
    /// 阻塞直到每个可能观察到此调用之前发布的状态的临界区都已结束。
    /// 返回 `Ok` 时，在调用者最后一次 `set` 之前读取选择器的上下文发出的写入都已完成，
    /// 此后进入的每个临界区都能观察到该 `set`。对返回之后发出的写入不作任何保证。
    pub fn synchronize(&mut self) -> Result<(), BarrierError> {
        let start = Instant::now();
        let target = self.shared.global_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        // Pairs with the fence in `ContextEpoch::enter`.
        fence(Ordering::SeqCst);

        self.collection_counter += 1;
        let should_cleanup =
            self.cleanup_interval > 0 && self.collection_counter % self.cleanup_interval == 0;

        let slots: Vec<Arc<ContextSlot>> = {
            let mut contexts = self.shared.contexts.lock();
            if should_cleanup {
                let before = contexts.len();
                // Only this Vec holds a reference once the ContextEpoch is dropped
                contexts.retain(|slot| Arc::strong_count(slot) > 1);
                let pruned = before - contexts.len();
                if pruned > 0 {
                    tracing::trace!(pruned, "pruned dead context slots");
                }
            }
            contexts.clone()
        };

        for slot in &slots {
            self.wait_for_slot(slot, target, start)?;
        }

        self.shared.grace_periods.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            epoch = target,
            contexts = slots.len(),
            waited_us = start.elapsed().as_micros() as u64,
            "grace period complete"
        );
        Ok(())
    }

    fn wait_for_slot(
        &self,
        slot: &ContextSlot,
        target: usize,
        start: Instant,
    ) -> Result<(), BarrierError> {
        let mut spins = 0u32;
        loop {
            let epoch = slot.active_epoch.load(Ordering::Acquire);
            if epoch == INACTIVE_EPOCH || epoch >= target {
                return Ok(());
            }

            if spins < self.spin_before_yield {
                spins += 1;
                spin_loop();
                continue;
            }

            if let Some(max_wait) = self.max_wait {
                let waited = start.elapsed();
                if waited > max_wait {
                    tracing::warn!(epoch = target, ?waited, "grace period timed out");
                    return Err(BarrierError::Timeout {
                        epoch: target,
                        waited,
                    });
                }
            }
            yield_now();
        }
    }

    /// Number of grace periods completed by this barrier's domain.
    /// 此屏障所属域已完成的宽限期数量。
    #[inline]
    pub fn grace_periods(&self) -> usize {
        self.shared.grace_periods.load(Ordering::Relaxed)
    }

    /// Current global epoch.
    /// 当前全局纪元。
    #[inline]
    pub fn global_epoch(&self) -> usize {
        self.shared.global_epoch.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for QuiescenceBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiescenceBarrier")
            .field("global_epoch", &self.global_epoch())
            .field("grace_periods", &self.grace_periods())
            .field("max_wait", &self.max_wait)
            .finish()
    }
}
