//! Writer substrate: the execution contexts that write into the stats maps.
//!
//! In production the substrate is a packet filter running wherever packets are
//! delivered, entirely outside the coordinator's scheduling domain. Here it is
//! behind [`WriterSubstrate`]: a capability check plus attach/detach on an
//! [`Endpoint`]. [`LoopbackSubstrate`] is the in-process implementation; its
//! program runs on the delivering thread each time a datagram reaches an
//! attached endpoint.
//!
//! 写入基底：向统计映射写入的执行上下文。[`LoopbackSubstrate`] 是进程内实现，
//! 每当数据报到达已附加的端点时，其程序在投递线程上运行。

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering as StdOrdering};
use std::sync::Arc as StdArc;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::context::ContextEpoch;
use crate::coordinator::StatsMaps;
use crate::domain::QuiescenceDomain;
use crate::error::SubstrateError;

static NEXT_COOKIE: AtomicU64 = AtomicU64::new(1);

/// Per-endpoint traffic counters, the value type of the stats maps.
/// 每个端点的流量计数器，即统计映射的值类型。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsValue {
    /// Datagrams delivered to the endpoint.
    /// 投递到端点的数据报数量。
    pub rx_packets: u64,
    /// Bytes delivered to the endpoint.
    /// 投递到端点的字节数。
    pub rx_bytes: u64,
}

/// Program run on every delivery to an attached endpoint.
/// 每次投递到已附加端点时运行的程序。
pub trait PacketFilter {
    /// Called on the delivering thread before the datagram is queued.
    /// 在数据报入队之前于投递线程上调用。
    fn on_deliver(&self, cookie: u64, len: usize);
}

/// A loopback datagram endpoint bound to itself.
///
/// `send` delivers to this endpoint's own queue, running the attached filter
/// first. The endpoint is meant to live on one thread.
///
/// 绑定到自身的回环数据报端点。
pub struct Endpoint {
    cookie: u64,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    filter: RefCell<Option<Box<dyn PacketFilter>>>,
}

impl Endpoint {
    /// Bind a fresh endpoint with a unique cookie.
    /// 绑定一个带有唯一 cookie 的新端点。
    pub fn bind() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            cookie: NEXT_COOKIE.fetch_add(1, StdOrdering::Relaxed),
            tx,
            rx,
            filter: RefCell::new(None),
        }
    }

    /// Identity used as the stats-map key.
    /// 用作统计映射键的标识。
    #[inline]
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Whether a filter is attached.
    /// 是否附加了过滤器。
    pub fn is_attached(&self) -> bool {
        self.filter.borrow().is_some()
    }

    /// Attach `filter`. Fails if one is already attached.
    /// 附加 `filter`，如果已经附加则失败。
    pub fn install_filter(&self, filter: Box<dyn PacketFilter>) -> Result<(), SubstrateError> {
        let mut slot = self.filter.borrow_mut();
        if slot.is_some() {
            return Err(SubstrateError::AlreadyAttached {
                cookie: self.cookie,
            });
        }
        *slot = Some(filter);
        Ok(())
    }

    /// Detach the current filter.
    /// 分离当前过滤器。
    pub fn remove_filter(&self) -> Result<(), SubstrateError> {
        match self.filter.borrow_mut().take() {
            Some(_) => Ok(()),
            None => Err(SubstrateError::NotAttached {
                cookie: self.cookie,
            }),
        }
    }

    /// Send `payload` to this endpoint. Returns the number of bytes sent.
    /// 向此端点发送 `payload`，返回发送的字节数。
    pub fn send(&self, payload: &[u8]) -> Result<usize, SubstrateError> {
        if let Some(filter) = self.filter.borrow().as_ref() {
            filter.on_deliver(self.cookie, payload.len());
        }
        self.tx
            .send(payload.to_vec())
            .map_err(|_| SubstrateError::Disconnected {
                cookie: self.cookie,
            })?;
        Ok(payload.len())
    }

    /// Block until a datagram arrives.
    /// 阻塞直到数据报到达。
    pub fn recv(&self) -> Result<Vec<u8>, SubstrateError> {
        self.rx.recv().map_err(|_| SubstrateError::Disconnected {
            cookie: self.cookie,
        })
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("cookie", &self.cookie)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// The external set of writers, seen through a narrow interface.
/// 通过窄接口看到的外部写入者集合。
pub trait WriterSubstrate: Send + Sync {
    /// Whether the substrate can run here. Callers skip, not fail, when it can't.
    /// 基底能否在此运行。不能运行时调用者应跳过而不是失败。
    fn is_supported(&self) -> bool;

    /// Attach the stats program to `endpoint`, writing into `maps`.
    /// 将统计程序附加到 `endpoint`，写入 `maps`。
    fn attach(
        &self,
        endpoint: &Endpoint,
        maps: &StatsMaps<u64, StatsValue>,
    ) -> Result<(), SubstrateError>;

    /// Detach whatever is attached to `endpoint`.
    /// 分离附加在 `endpoint` 上的程序。
    fn detach(&self, endpoint: &Endpoint) -> Result<(), SubstrateError>;
}

/// Builder for [`LoopbackSubstrate`].
/// [`LoopbackSubstrate`] 的构建器。
pub struct LoopbackSubstrateBuilder {
    domain: QuiescenceDomain,
    dwell_spins: u32,
    yield_in_dwell: bool,
    supported: bool,
}

impl LoopbackSubstrateBuilder {
    /// Spins between reading the selector and writing the selected buffer.
    ///
    /// Default: `256`
    ///
    /// 读取选择器与写入所选缓冲区之间的自旋次数。
    pub fn dwell_spins(mut self, spins: u32) -> Self {
        self.dwell_spins = spins;
        self
    }

    /// Also yield the CPU once inside that window.
    ///
    /// Default: `true`
    ///
    /// 在该窗口内额外让出一次 CPU。
    pub fn yield_in_dwell(mut self, yield_in_dwell: bool) -> Self {
        self.yield_in_dwell = yield_in_dwell;
        self
    }

    /// Whether the substrate reports itself as supported.
    ///
    /// Default: `true`
    ///
    /// 基底是否报告自己受支持。
    pub fn supported(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    /// Build the substrate.
    /// 构建基底。
    pub fn build(self) -> LoopbackSubstrate {
        LoopbackSubstrate {
            domain: self.domain,
            dwell_spins: self.dwell_spins,
            yield_in_dwell: self.yield_in_dwell,
            supported: self.supported,
            failed_updates: StdArc::new(AtomicU64::new(0)),
        }
    }
}

/// In-process writer substrate.
///
/// Each attachment registers a writer context in `domain`. Its program:
/// enter a critical section, read the selector, dwell, then bump the
/// endpoint's counters in the selected buffer. Failed updates are counted and
/// otherwise ignored, as a packet filter would.
///
/// 进程内的写入基底。
pub struct LoopbackSubstrate {
    domain: QuiescenceDomain,
    dwell_spins: u32,
    yield_in_dwell: bool,
    supported: bool,
    failed_updates: StdArc<AtomicU64>,
}

impl LoopbackSubstrate {
    /// Substrate with default settings whose writers register in `domain`.
    /// 使用默认设置的基底，其写入者注册到 `domain`。
    pub fn new(domain: QuiescenceDomain) -> Self {
        Self::builder(domain).build()
    }

    /// Builder for a substrate whose writers register in `domain`.
    /// 写入者注册到 `domain` 的基底的构建器。
    pub fn builder(domain: QuiescenceDomain) -> LoopbackSubstrateBuilder {
        LoopbackSubstrateBuilder {
            domain,
            dwell_spins: 256,
            yield_in_dwell: true,
            supported: true,
        }
    }

    /// Map updates the program could not apply (full or destroyed buffer,
    /// destroyed selector).
    ///
    /// 程序未能应用的映射更新数量（缓冲区已满或已销毁，选择器已销毁）。
    pub fn failed_updates(&self) -> u64 {
        self.failed_updates.load(StdOrdering::Relaxed)
    }
}

impl WriterSubstrate for LoopbackSubstrate {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn attach(
        &self,
        endpoint: &Endpoint,
        maps: &StatsMaps<u64, StatsValue>,
    ) -> Result<(), SubstrateError> {
        if !self.supported {
            return Err(SubstrateError::Unsupported);
        }
        let program = StatsProgram {
            context: self.domain.register_context(),
            maps: maps.clone(),
            dwell_spins: self.dwell_spins,
            yield_in_dwell: self.yield_in_dwell,
            failed_updates: self.failed_updates.clone(),
        };
        endpoint.install_filter(Box::new(program))?;
        tracing::trace!(cookie = endpoint.cookie(), "stats program attached");
        Ok(())
    }

    fn detach(&self, endpoint: &Endpoint) -> Result<(), SubstrateError> {
        endpoint.remove_filter()
    }
}

struct StatsProgram {
    context: ContextEpoch,
    maps: StatsMaps<u64, StatsValue>,
    dwell_spins: u32,
    yield_in_dwell: bool,
    failed_updates: StdArc<AtomicU64>,
}

impl StatsProgram {
    fn dwell(&self) {
        for _ in 0..self.dwell_spins {
            std::hint::spin_loop();
        }
        if self.yield_in_dwell {
            std::thread::yield_now();
        }
    }

    fn record_failure(&self) {
        self.failed_updates.fetch_add(1, StdOrdering::Relaxed);
    }
}

impl PacketFilter for StatsProgram {
    fn on_deliver(&self, cookie: u64, len: usize) {
        let _section = self.context.enter();

        let active = match self.maps.selector().get() {
            Ok(active) => active,
            Err(_) => {
                self.record_failure();
                return;
            }
        };

        self.dwell();

        let bytes = len as u64;
        let updated = self.maps.buffer(active).update_with(
            cookie,
            StatsValue::default,
            |stats| {
                stats.rx_packets += 1;
                stats.rx_bytes += bytes;
            },
        );
        if updated.is_err() {
            self.record_failure();
        }
    }
}
