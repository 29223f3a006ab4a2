use crate::sync::{Arc, AtomicUsize, Mutex};
use std::vec::Vec;

/// Default number of spin iterations before the barrier starts yielding.
/// 屏障开始让出 CPU 之前的默认自旋次数。
pub(crate) const DEFAULT_SPIN_BEFORE_YIELD: u32 = 128;

/// Default interval for pruning dead context slots (in grace periods).
/// 清理死上下文槽的默认间隔（以宽限期为单位）。
pub(crate) const DEFAULT_CLEANUP_INTERVAL: usize = 16;

/// Represents a writer context that is not inside a critical section.
/// 表示当前不在临界区内的写入上下文。
pub(crate) const INACTIVE_EPOCH: usize = usize::MAX;

/// A slot allocated for one writer context to record the epoch at which its
/// current critical section began.
///
/// Cache-aligned to prevent false sharing between contexts.
///
/// 为写入上下文分配的槽，记录其当前临界区开始时的纪元。
/// 缓存对齐以防止上下文之间的伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct ContextSlot {
    /// The epoch observed on entry, or INACTIVE_EPOCH.
    /// 进入时观察到的纪元，或 INACTIVE_EPOCH。
    pub(crate) active_epoch: AtomicUsize,
}

/// Shared state of a quiescence domain.
///
/// 静默域的共享状态。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct DomainState {
    /// The global monotonic epoch counter. Only the barrier advances it.
    /// 全局单调纪元计数器。只有屏障推进它。
    pub(crate) global_epoch: AtomicUsize,
    /// Number of grace periods completed so far.
    /// 已完成的宽限期数量。
    pub(crate) grace_periods: AtomicUsize,
    /// All registered context slots.
    /// 所有注册的上下文槽。
    pub(crate) contexts: Mutex<Vec<Arc<ContextSlot>>>,
}

impl DomainState {
    pub(crate) fn new() -> Self {
        Self {
            global_epoch: AtomicUsize::new(0),
            grace_periods: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }
}
