use crate::state::{ContextSlot, DomainState, INACTIVE_EPOCH};
use crate::sync::{Arc, AtomicUsize, Cell, Ordering, fence};

/// A writer context's local epoch state.
///
/// Each writer context (a worker thread, an attached program instance) should
/// create exactly one `ContextEpoch` via `QuiescenceDomain::register_context()`.
/// It is `!Sync` (due to `Cell`) and must be used by only one thread.
///
/// The context brackets every read of the active selector and the write that
/// follows it with [`ContextEpoch::enter`]. The barrier waits for exactly
/// those brackets.
///
/// 写入上下文的本地纪元状态。
/// 每个写入上下文应通过 `QuiescenceDomain::register_context()` 创建恰好一个 `ContextEpoch`。
/// 它是 `!Sync` 的（因为 `Cell`），必须仅由一个线程使用。
/// 上下文用 `enter` 包围每一次选择器读取以及随后的写入，屏障恰好等待这些区间。
pub struct ContextEpoch {
    slot: Arc<ContextSlot>,
    shared: Arc<DomainState>,
    depth: Cell<usize>,
}

impl ContextEpoch {
    pub(crate) fn new(shared: Arc<DomainState>) -> Self {
        let slot = Arc::new(ContextSlot {
            active_epoch: AtomicUsize::new(INACTIVE_EPOCH),
        });

        shared.contexts.lock().push(Arc::clone(&slot));

        ContextEpoch {
            slot,
            shared,
            depth: Cell::new(0),
        }
    }

    /// Enter a critical section at the current epoch.
    ///
    /// Everything the caller reads after this returns (in particular the
    /// active selector) is either observed *after* any concurrent flip, or
    /// the barrier that follows the flip will wait for this section to end.
    ///
    /// **Reentrancy**: nested calls are allowed; the context stays in flight
    /// until every returned guard is dropped.
    ///
    /// 在当前纪元进入临界区。
    /// 返回后调用者读取的一切（尤其是活跃选择器）要么在并发翻转之后被观察到，
    /// 要么翻转之后的屏障会等待此临界区结束。
    /// **可重入性**：允许嵌套调用；直到所有返回的守卫被 drop，上下文才离开临界区。
    #[inline]
    pub fn enter(&self) -> CriticalSection<'_> {
        let depth = self.depth.get();

        if depth == 0 {
            let current_epoch = self.shared.global_epoch.load(Ordering::Acquire);
            self.slot
                .active_epoch
                .store(current_epoch, Ordering::SeqCst);
            // Pairs with the fence in `QuiescenceBarrier::synchronize`: either
            // the barrier sees this slot, or we see the selector it published.
            fence(Ordering::SeqCst);
        }

        self.depth.set(depth + 1);

        CriticalSection { context: self }
    }

    /// Whether this context is currently inside a critical section.
    /// 此上下文当前是否处于临界区内。
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.depth.get() > 0
    }
}

impl std::fmt::Debug for ContextEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEpoch")
            .field("depth", &self.depth.get())
            .field("active_epoch", &self.slot.active_epoch.load(Ordering::Relaxed))
            .finish()
    }
}

/// Guard marking its context as in flight.
///
/// `!Send` and `!Sync` because it borrows a `!Sync` `ContextEpoch`.
///
/// 标记其上下文处于临界区的守卫。
#[must_use]
pub struct CriticalSection<'a> {
    context: &'a ContextEpoch,
}

impl<'a> CriticalSection<'a> {
    /// The epoch this section was entered at.
    /// 此临界区进入时的纪元。
    #[inline]
    pub fn epoch(&self) -> usize {
        self.context.slot.active_epoch.load(Ordering::Relaxed)
    }
}

impl<'a> Clone for CriticalSection<'a> {
    #[inline]
    fn clone(&self) -> Self {
        let depth = self.context.depth.get();

        assert!(
            depth > 0,
            "BUG: Cloning a CriticalSection outside a critical section (depth = 0). \
             This indicates incorrect API usage or a library bug."
        );

        self.context.depth.set(depth + 1);

        CriticalSection {
            context: self.context,
        }
    }
}

impl<'a> Drop for CriticalSection<'a> {
    #[inline]
    fn drop(&mut self) {
        let depth = self.context.depth.get();

        assert!(
            depth > 0,
            "BUG: Dropping a CriticalSection outside a critical section (depth = 0). \
             This indicates incorrect API usage or a library bug."
        );

        if depth == 1 {
            self.context
                .slot
                .active_epoch
                .store(INACTIVE_EPOCH, Ordering::Release);
        }

        self.context.depth.set(depth - 1);
    }
}
