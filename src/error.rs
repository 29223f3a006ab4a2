//! Error types.
//!
//! Each component has its own error enum. [`Error`] wraps them and sorts them
//! into setup failures (abort before any cycle runs) and protocol failures
//! (abort the running swap loop). A detected race is not an error: it is
//! reported as [`RunOutcome::Violated`](crate::RunOutcome::Violated).
//!
//! 错误类型。每个组件有自己的错误枚举，[`Error`] 将它们分为初始化错误和协议错误。
//! 检测到的竞争不是错误。

use std::time::Duration;

use thiserror::Error;

use crate::buffer::BufferId;

/// Errors from [`AssocBuffer`](crate::AssocBuffer) operations.
/// [`AssocBuffer`](crate::AssocBuffer) 操作的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// `max_entries` was zero.
    /// `max_entries` 为零。
    #[error("buffer capacity must be non-zero")]
    ZeroCapacity,

    /// The backing store could not reserve the declared capacity.
    /// 底层存储无法保留声明的容量。
    #[error("could not allocate {max_entries} entries for buffer")]
    AllocationFailed {
        /// Requested capacity.
        /// 请求的容量。
        max_entries: usize,
    },

    /// Insert-only write on a key that is already present.
    /// 对已存在的键进行仅插入写入。
    #[error("key already exists")]
    AlreadyExists,

    /// Read, remove or update-only write on an absent key.
    /// 对不存在的键进行读取、删除或仅更新写入。
    #[error("key not found")]
    NotFound,

    /// Inserting a new key into a buffer at capacity.
    /// 向已满的缓冲区插入新键。
    #[error("buffer full: capacity {capacity}")]
    Full {
        /// Declared `max_entries`.
        /// 声明的 `max_entries`。
        capacity: usize,
    },

    /// The buffer was destroyed; the handle is dangling.
    /// 缓冲区已被销毁，句柄悬空。
    #[error("buffer {0} has been destroyed")]
    Destroyed(BufferId),
}

/// Errors from the [`ActiveSelector`](crate::ActiveSelector).
/// [`ActiveSelector`](crate::ActiveSelector) 的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// Only indices 0 and 1 name a buffer.
    /// 只有索引 0 和 1 命名缓冲区。
    #[error("invalid selector index {0}, expected 0 or 1")]
    InvalidIndex(u32),

    /// The selector was destroyed.
    /// 选择器已被销毁。
    #[error("selector has been destroyed")]
    Destroyed,
}

/// Errors from [`QuiescenceBarrier::synchronize`](crate::QuiescenceBarrier::synchronize).
/// [`QuiescenceBarrier::synchronize`](crate::QuiescenceBarrier::synchronize) 的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarrierError {
    /// Some context stayed in a pre-flip critical section past `max_wait`.
    /// 某个上下文在翻转前的临界区中停留超过 `max_wait`。
    #[error("grace period for epoch {epoch} did not complete within {waited:?}")]
    Timeout {
        /// Target epoch of the grace period.
        /// 宽限期的目标纪元。
        epoch: usize,
        /// How long the barrier waited.
        /// 屏障等待了多久。
        waited: Duration,
    },
}

/// Errors from a [`WriterSubstrate`](crate::WriterSubstrate).
/// [`WriterSubstrate`](crate::WriterSubstrate) 的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    /// The substrate cannot run in this environment.
    /// 基底无法在此环境中运行。
    #[error("writer substrate is not supported in this environment")]
    Unsupported,

    /// The endpoint already has a program attached.
    /// 端点已经附加了程序。
    #[error("endpoint {cookie} already has a program attached")]
    AlreadyAttached {
        /// Cookie of the endpoint.
        /// 端点的 cookie。
        cookie: u64,
    },

    /// The endpoint has no program attached.
    /// 端点没有附加程序。
    #[error("endpoint {cookie} has no program attached")]
    NotAttached {
        /// Cookie of the endpoint.
        /// 端点的 cookie。
        cookie: u64,
    },

    /// The endpoint's peer is gone.
    /// 端点的对端已不存在。
    #[error("endpoint {cookie} is disconnected")]
    Disconnected {
        /// Cookie of the endpoint.
        /// 端点的 cookie。
        cookie: u64,
    },
}

/// Errors from the [`WorkerPool`](crate::WorkerPool).
/// [`WorkerPool`](crate::WorkerPool) 的错误。
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A worker failed to attach before the pool started.
    /// 某个工作线程在线程池启动之前附加失败。
    #[error("worker {worker} failed to attach: {source}")]
    Attach {
        /// Index of the worker.
        /// 工作线程的索引。
        worker: usize,
        /// Underlying substrate error.
        /// 底层基底错误。
        #[source]
        source: SubstrateError,
    },

    /// A worker thread could not be spawned.
    /// 无法启动工作线程。
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        /// Index of the worker.
        /// 工作线程的索引。
        worker: usize,
        /// OS error.
        /// 操作系统错误。
        #[source]
        source: std::io::Error,
    },

    /// A worker exited before reporting whether it attached.
    /// 某个工作线程在报告是否附加之前退出。
    #[error("worker {worker} exited during startup")]
    StartupAborted {
        /// Index of the worker.
        /// 工作线程的索引。
        worker: usize,
    },

    /// A worker thread panicked.
    /// 某个工作线程 panic。
    #[error("worker {worker} panicked")]
    WorkerPanicked {
        /// Index of the worker.
        /// 工作线程的索引。
        worker: usize,
    },

    /// A worker's send/receive loop failed.
    /// 某个工作线程的收发循环失败。
    #[error("worker {worker} loop failed: {source}")]
    Loop {
        /// Index of the worker.
        /// 工作线程的索引。
        worker: usize,
        /// Underlying substrate error.
        /// 底层基底错误。
        #[source]
        source: SubstrateError,
    },
}

/// Crate-level error.
/// crate 级错误。
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer creation failed.
    /// 缓冲区创建失败。
    #[error("setup: {0}")]
    BufferSetup(#[source] BufferError),

    /// The selector could not be created or initialised.
    /// 选择器无法创建或初始化。
    #[error("setup: {0}")]
    SelectorSetup(#[source] SelectorError),

    /// Writer pool or substrate attachment failed.
    /// 工作线程池或基底附加失败。
    #[error("setup: {0}")]
    Harness(#[from] HarnessError),

    /// The coordinator has no barrier but synchronized mode was requested.
    /// 协调者没有屏障却请求了同步模式。
    #[error("setup: synchronized mode requires a quiescence barrier")]
    MissingBarrier,

    /// The barrier call failed during a cycle.
    /// 屏障调用在周期中失败。
    #[error("protocol: {0}")]
    Barrier(#[from] BarrierError),

    /// A buffer operation (enumeration, clear) failed during a cycle.
    /// 缓冲区操作（枚举、清空）在周期中失败。
    #[error("protocol: {0}")]
    Buffer(#[from] BufferError),

    /// Setting the selector failed during a cycle.
    /// 设置选择器在周期中失败。
    #[error("protocol: {0}")]
    Selector(#[from] SelectorError),
}

impl Error {
    /// Whether this error happened before any swap cycle ran.
    /// 此错误是否发生在任何交换周期运行之前。
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::BufferSetup(_)
                | Error::SelectorSetup(_)
                | Error::Harness(_)
                | Error::MissingBarrier
        )
    }

    /// Whether this error aborted a running swap loop.
    /// 此错误是否中止了正在运行的交换循环。
    pub fn is_protocol(&self) -> bool {
        !self.is_setup()
    }
}

/// Result type for crate operations.
/// crate 操作的结果类型。
pub type Result<T> = std::result::Result<T, Error>;
