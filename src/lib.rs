//! Double-buffered statistics maps with epoch-based quiescence.
//!
//! Many uncoordinated writer contexts append into whichever of two buffers an
//! [`ActiveSelector`] names. A single [`SwapCoordinator`] periodically flips
//! the selector and clears the buffer that was just deactivated. Writers may
//! act on a stale selector reading, so the clear is deferred until a
//! [`QuiescenceBarrier`] has proven that every pre-flip critical section is
//! over.
//!
//! The [`RaceTest`] driver demonstrates both sides: with the barrier the
//! reused buffer is always empty, without it a stale write is observed.
//!
//! ```no_run
//! use std::time::Duration;
//! use epoch_swap::{RaceConfig, RaceTest, Verdict};
//!
//! let config = RaceConfig::builder()
//!     .workers(8)
//!     .barrier_budget(Duration::from_secs(5))
//!     .build();
//! let mut test = RaceTest::loopback(config).unwrap();
//! assert!(matches!(test.run_with_barrier().unwrap(), Verdict::Pass(_)));
//! test.teardown().unwrap();
//! ```
//!
//! 带有基于纪元静默的双缓冲统计映射。协调者翻转选择器，
//! 并在静默屏障证明所有翻转前的临界区都已结束之后清空刚刚停用的缓冲区。

mod barrier;
mod buffer;
mod context;
mod coordinator;
mod domain;
mod driver;
mod error;
mod harness;
mod selector;
mod state;
mod substrate;
mod sync;

pub use barrier::QuiescenceBarrier;
pub use buffer::{AssocBuffer, BufferFlags, BufferId, BufferKind, BufferSpec, WriteMode};
pub use context::{ContextEpoch, CriticalSection};
pub use coordinator::{RunOutcome, StatsMaps, SwapCoordinator, SwapReport, SyncMode};
pub use domain::{QuiescenceDomain, QuiescenceDomainBuilder};
pub use driver::{
    DEFAULT_BARRIER_BUDGET, DEFAULT_NO_BARRIER_BUDGET, DEFAULT_WORKERS, FailReason, RaceConfig,
    RaceConfigBuilder, RaceTest, Scenario, ShutdownReport, Verdict,
};
pub use error::{
    BarrierError, BufferError, Error, HarnessError, Result, SelectorError, SubstrateError,
};
pub use harness::{CancellationToken, WorkerPool, WorkerReport};
pub use selector::{ACTIVE_SELECTOR_KEY, ActiveSelector};
pub use substrate::{
    Endpoint, LoopbackSubstrate, LoopbackSubstrateBuilder, PacketFilter, StatsValue,
    WriterSubstrate,
};

#[cfg(all(test, not(feature = "loom")))]
mod tests;
