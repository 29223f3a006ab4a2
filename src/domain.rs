use std::time::Duration;

use crate::barrier::QuiescenceBarrier;
use crate::context::ContextEpoch;
use crate::state::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_SPIN_BEFORE_YIELD, DomainState};
use crate::sync::{Arc, Ordering};

/// Builder for configuring a `QuiescenceDomain`.
///
/// - `spin_before_yield`: spin iterations per waiting slot before the barrier
///   starts yielding the CPU
/// - `cleanup_interval`: how often (in grace periods) dead context slots are pruned
/// - `max_wait`: upper bound on one grace period; exceeding it is an error
///
/// # Example
/// ```
/// use std::time::Duration;
/// use epoch_swap::QuiescenceDomain;
///
/// let (barrier, domain) = QuiescenceDomain::builder()
///     .spin_before_yield(64)
///     .cleanup_interval(32)
///     .max_wait(Duration::from_secs(5))
///     .build();
/// ```
///
/// 用于配置 `QuiescenceDomain` 的构建器。
pub struct QuiescenceDomainBuilder {
    spin_before_yield: u32,
    cleanup_interval: usize,
    max_wait: Option<Duration>,
}

impl QuiescenceDomainBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            spin_before_yield: DEFAULT_SPIN_BEFORE_YIELD,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            max_wait: None,
        }
    }

    /// Set the number of spins before yielding while waiting on a context.
    ///
    /// Default: `128`
    ///
    /// 设置等待上下文时让出 CPU 之前的自旋次数。
    #[inline]
    pub fn spin_before_yield(mut self, spins: u32) -> Self {
        self.spin_before_yield = spins;
        self
    }

    /// Set the cleanup interval for dead context slots.
    ///
    /// Set to `0` to disable periodic cleanup.
    ///
    /// Default: `16`
    ///
    /// 设置死上下文槽的清理间隔。设置为 `0` 可禁用定期清理。
    #[inline]
    pub fn cleanup_interval(mut self, interval: usize) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Bound the time one `synchronize()` may block.
    ///
    /// Pass `None` to wait forever.
    ///
    /// Default: `None`
    ///
    /// 限制一次 `synchronize()` 可阻塞的时间。传递 `None` 表示无限等待。
    #[inline]
    pub fn max_wait(mut self, max_wait: impl Into<Option<Duration>>) -> Self {
        self.max_wait = max_wait.into();
        self
    }

    /// Build the domain. Returns the unique barrier and the shareable domain.
    ///
    /// 构建域。返回唯一的屏障和可共享的域。
    #[inline]
    pub fn build(self) -> (QuiescenceBarrier, QuiescenceDomain) {
        let shared = Arc::new(DomainState::new());

        let barrier = QuiescenceBarrier {
            shared: shared.clone(),
            spin_before_yield: self.spin_before_yield,
            cleanup_interval: self.cleanup_interval,
            max_wait: self.max_wait,
            collection_counter: 0,
        };

        (barrier, QuiescenceDomain { shared })
    }
}

impl Default for QuiescenceDomainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A quiescence domain.
///
/// The domain tracks every writer context that may read the active selector.
/// It manages:
/// - The global epoch counter.
/// - Registration of writer contexts.
/// - Creation of the unique [`QuiescenceBarrier`].
///
/// `QuiescenceDomain` is `Clone`; hand a clone to every writer context.
///
/// **Typical Usage**:
/// ```
/// use epoch_swap::QuiescenceDomain;
///
/// // Coordinator: create the domain and keep the barrier
/// let (mut barrier, domain) = QuiescenceDomain::new();
///
/// // Writer context: register once, bracket every selector read + write
/// let ctx = domain.register_context();
/// {
///     let _section = ctx.enter();
///     // read selector, write the selected buffer
/// }
///
/// // Coordinator: after flipping the selector
/// barrier.synchronize().unwrap();
/// ```
///
/// 静默域。域跟踪每个可能读取活跃选择器的写入上下文。
/// `QuiescenceDomain` 是 `Clone` 的；将克隆交给每个写入上下文。
#[derive(Clone)]
pub struct QuiescenceDomain {
    shared: Arc<DomainState>,
}

impl QuiescenceDomain {
    /// Create a new domain with default settings.
    /// 使用默认设置创建一个新域。
    #[inline]
    pub fn new() -> (QuiescenceBarrier, Self) {
        Self::builder().build()
    }

    /// Create a builder for configuring the domain.
    /// 创建一个用于配置域的构建器。
    #[inline]
    pub fn builder() -> QuiescenceDomainBuilder {
        QuiescenceDomainBuilder::new()
    }

    /// Register a new writer context.
    ///
    /// The returned `ContextEpoch` must be used by one thread only.
    ///
    /// 注册一个新的写入上下文。返回的 `ContextEpoch` 只能由一个线程使用。
    #[inline]
    pub fn register_context(&self) -> ContextEpoch {
        ContextEpoch::new(self.shared.clone())
    }

    /// Current global epoch.
    #[inline]
    pub fn global_epoch(&self) -> usize {
        self.shared.global_epoch.load(Ordering::Relaxed)
    }

    /// Number of context slots currently tracked, including dead ones not yet pruned.
    pub fn registered_contexts(&self) -> usize {
        self.shared.contexts.lock().len()
    }
}

impl std::fmt::Debug for QuiescenceDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiescenceDomain")
            .field("global_epoch", &self.global_epoch())
            .finish()
    }
}
