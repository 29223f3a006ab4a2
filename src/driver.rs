//! Race-detection driver.
//!
//! Builds the full stack (two buffers, selector, quiescence domain, writer
//! pool) and runs the coordinator's swap loop in one of two scenarios:
//!
//! - **with barrier**: the vacant buffer must be empty on every cycle for the
//!   whole budget; a single residual entry fails the run.
//! - **without barrier**: a residual entry must show up before the budget
//!   runs out; a clean run fails, since it means the test gives no signal.
//!
//! 竞争检测驱动。有屏障时空闲缓冲区在每个周期都必须为空；
//! 无屏障时必须在预算耗尽前观察到残留条目。

use std::sync::Arc;
use std::time::Duration;

use crate::barrier::QuiescenceBarrier;
use crate::buffer::BufferSpec;
use crate::coordinator::{RunOutcome, StatsMaps, SwapCoordinator, SyncMode};
use crate::domain::QuiescenceDomain;
use crate::error::{Error, Result};
use crate::harness::{CancellationToken, WorkerPool, WorkerReport};
use crate::substrate::{LoopbackSubstrate, StatsValue, WriterSubstrate};

/// Default number of writer workers.
/// 默认的写入工作线程数量。
pub const DEFAULT_WORKERS: usize = 8;

/// Default budget of the barrier-present scenario.
/// 有屏障场景的默认预算。
pub const DEFAULT_BARRIER_BUDGET: Duration = Duration::from_secs(60);

/// Default budget of the barrier-absent scenario.
/// 无屏障场景的默认预算。
pub const DEFAULT_NO_BARRIER_BUDGET: Duration = Duration::from_secs(20);

/// Parameters of a race test.
/// 竞争测试的参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceConfig {
    /// Writer workers to spawn.
    /// 要启动的写入工作线程数。
    pub workers: usize,
    /// Capacity of each buffer. `None` means one slot per worker.
    /// 每个缓冲区的容量。`None` 表示每个工作线程一个槽位。
    pub capacity: Option<usize>,
    /// How long the barrier-present scenario runs.
    /// 有屏障场景运行多久。
    pub barrier_budget: Duration,
    /// How long the barrier-absent scenario may run before giving up.
    /// 无屏障场景在放弃之前可以运行多久。
    pub no_barrier_budget: Duration,
    /// Upper bound on one grace period.
    /// 单个宽限期的上限。
    pub barrier_max_wait: Option<Duration>,
    /// Spins in the loopback program between selector read and write.
    /// 回环程序在读取选择器与写入之间的自旋次数。
    pub dwell_spins: u32,
    /// Delay between the two snapshots of the shutdown check.
    /// 关闭检查中两次快照之间的延迟。
    pub settle_delay: Duration,
}

impl RaceConfig {
    /// Start from the defaults.
    /// 从默认值开始。
    pub fn builder() -> RaceConfigBuilder {
        RaceConfigBuilder {
            config: RaceConfig::default(),
        }
    }

    /// Buffer capacity actually used.
    /// 实际使用的缓冲区容量。
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or(self.workers)
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            capacity: None,
            barrier_budget: DEFAULT_BARRIER_BUDGET,
            no_barrier_budget: DEFAULT_NO_BARRIER_BUDGET,
            barrier_max_wait: None,
            dwell_spins: 256,
            settle_delay: Duration::from_millis(50),
        }
    }
}

/// Builder for [`RaceConfig`].
/// [`RaceConfig`] 的构建器。
#[derive(Debug, Clone)]
pub struct RaceConfigBuilder {
    config: RaceConfig,
}

impl RaceConfigBuilder {
    /// Set the number of writer workers.
    ///
    /// Default: `8`
    ///
    /// 设置写入工作线程数。
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the capacity of each buffer.
    ///
    /// Default: one slot per worker.
    ///
    /// 设置每个缓冲区的容量。
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    /// Set how long the barrier-present scenario runs.
    ///
    /// Default: 60 s
    ///
    /// 设置有屏障场景的预算。
    pub fn barrier_budget(mut self, budget: Duration) -> Self {
        self.config.barrier_budget = budget;
        self
    }

    /// Set how long the barrier-absent scenario may run.
    ///
    /// Default: 20 s
    ///
    /// 设置无屏障场景的预算。
    pub fn no_barrier_budget(mut self, budget: Duration) -> Self {
        self.config.no_barrier_budget = budget;
        self
    }

    /// Bound one grace period.
    ///
    /// Default: unbounded
    ///
    /// 设置单个宽限期的上限。
    pub fn barrier_max_wait(mut self, max_wait: impl Into<Option<Duration>>) -> Self {
        self.config.barrier_max_wait = max_wait.into();
        self
    }

    /// Set the loopback program's dwell spins.
    ///
    /// Default: `256`
    ///
    /// 设置回环程序的驻留自旋次数。
    pub fn dwell_spins(mut self, spins: u32) -> Self {
        self.config.dwell_spins = spins;
        self
    }

    /// Set the delay of the shutdown check.
    ///
    /// Default: 50 ms
    ///
    /// 设置关闭检查的稳定延迟。
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    /// Finish.
    /// 完成构建。
    pub fn build(self) -> RaceConfig {
        self.config
    }
}

/// Which scenario to run.
/// 要运行的场景。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Grace period between flip and clear; no violation allowed.
    /// 翻转与清空之间有宽限期，不允许违规。
    WithBarrier,
    /// Clear right after the flip; a violation is expected.
    /// 翻转后立即清空，预期出现违规。
    WithoutBarrier,
}

impl Scenario {
    fn mode(self) -> SyncMode {
        match self {
            Scenario::WithBarrier => SyncMode::Synchronized,
            Scenario::WithoutBarrier => SyncMode::Unsynchronized,
        }
    }
}

/// Why a scenario failed.
/// 场景失败的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The vacant buffer held entries although a grace period preceded every clear.
    /// 尽管每次清空之前都有宽限期，空闲缓冲区仍有条目。
    RaceWithBarrier(RunOutcome),
    /// The budget ran out and the race never showed up without the barrier.
    /// 预算耗尽，无屏障时竞争始终没有出现。
    TimedOutWithoutRace(RunOutcome),
}

/// Result of one scenario.
/// 单个场景的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The scenario behaved as expected.
    /// 场景表现符合预期。
    Pass(RunOutcome),
    /// The scenario did not.
    /// 场景表现不符合预期。
    Fail(FailReason),
    /// The substrate is unsupported here; nothing ran.
    /// 此处基底不受支持，没有运行任何内容。
    Skipped,
}

impl Verdict {
    /// `Pass` or `Skipped`.
    /// `Pass` 或 `Skipped`。
    pub fn is_pass_or_skip(&self) -> bool {
        !matches!(self, Verdict::Fail(_))
    }
}

/// Outcome of [`RaceTest::teardown`].
/// [`RaceTest::teardown`] 的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Round trips per worker.
    /// 每个工作线程的往返次数。
    pub workers: WorkerReport,
    /// Entries left in both buffers after the workers were joined.
    /// 工作线程被 join 之后两个缓冲区中剩余的条目数。
    pub residual_entries: usize,
    /// Whether both buffers were unchanged across the settle delay.
    /// 两个缓冲区在稳定延迟前后是否保持不变。
    pub quiescent: bool,
}

struct Stack {
    maps: StatsMaps<u64, StatsValue>,
    coordinator: SwapCoordinator<u64, StatsValue>,
    pool: WorkerPool,
}

/// A fully assembled race test.
/// 完整组装的竞争测试。
pub struct RaceTest {
    config: RaceConfig,
    // `None` when the substrate is unsupported.
    stack: Option<Stack>,
}

impl RaceTest {
    /// Assemble the stack over the in-process loopback substrate.
    /// 在进程内回环基底上组装整个栈。
    pub fn loopback(config: RaceConfig) -> Result<Self> {
        let (barrier, domain) = QuiescenceDomain::builder()
            .max_wait(config.barrier_max_wait)
            .build();
        let substrate = LoopbackSubstrate::builder(domain)
            .dwell_spins(config.dwell_spins)
            .build();
        Self::setup(config, Arc::new(substrate), barrier)
    }

    /// Assemble the stack: capability check, buffers, selector, workers.
    ///
    /// `barrier` must belong to the domain the substrate registers its
    /// writers in. Any failure here is a setup error; nothing has run yet.
    ///
    /// 组装整个栈：能力检查、缓冲区、选择器、工作线程。
    pub fn setup<S>(config: RaceConfig, substrate: Arc<S>, barrier: QuiescenceBarrier) -> Result<Self>
    where
        S: WriterSubstrate + 'static,
    {
        if !substrate.is_supported() {
            tracing::info!("writer substrate unsupported, race test skipped");
            return Ok(Self {
                config,
                stack: None,
            });
        }

        let maps = StatsMaps::create(BufferSpec::hash(config.effective_capacity()))?;
        maps.selector().set(0).map_err(Error::SelectorSetup)?;

        let coordinator = SwapCoordinator::new(maps.clone(), Some(barrier))?;
        let pool = WorkerPool::spawn(
            config.workers,
            substrate,
            maps.clone(),
            CancellationToken::new(),
        )?;

        Ok(Self {
            config,
            stack: Some(Stack {
                maps,
                coordinator,
                pool,
            }),
        })
    }

    /// Whether the stack was built.
    /// 栈是否已构建。
    pub fn is_supported(&self) -> bool {
        self.stack.is_some()
    }

    /// The configuration.
    /// 配置。
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// The buffer set, if the stack was built.
    /// 缓冲区集合（如果栈已构建）。
    pub fn maps(&self) -> Option<&StatsMaps<u64, StatsValue>> {
        self.stack.as_ref().map(|stack| &stack.maps)
    }

    /// Run `scenario` with its configured budget.
    ///
    /// The vacant buffer is reclaimed first, so scenarios can run in any
    /// order on one stack.
    ///
    /// 以配置的预算运行 `scenario`。先回收空闲缓冲区，因此场景可以在同一个栈上以任意顺序运行。
    pub fn run(&mut self, scenario: Scenario) -> Result<Verdict> {
        let budget = match scenario {
            Scenario::WithBarrier => self.config.barrier_budget,
            Scenario::WithoutBarrier => self.config.no_barrier_budget,
        };
        let Some(stack) = self.stack.as_mut() else {
            return Ok(Verdict::Skipped);
        };

        // A previous racy run may have left stale entries behind.
        stack.coordinator.reclaim_vacant()?;
        let outcome = stack.coordinator.run(scenario.mode(), budget)?;
        let verdict = match (scenario, outcome) {
            (Scenario::WithBarrier, RunOutcome::Clean { .. }) => Verdict::Pass(outcome),
            (Scenario::WithBarrier, RunOutcome::Violated { .. }) => {
                Verdict::Fail(FailReason::RaceWithBarrier(outcome))
            }
            (Scenario::WithoutBarrier, RunOutcome::Violated { .. }) => Verdict::Pass(outcome),
            (Scenario::WithoutBarrier, RunOutcome::Clean { .. }) => {
                Verdict::Fail(FailReason::TimedOutWithoutRace(outcome))
            }
        };

        match verdict {
            Verdict::Pass(_) => tracing::info!(?scenario, ?outcome, "race scenario passed"),
            _ => tracing::warn!(?scenario, ?outcome, "race scenario failed"),
        }
        Ok(verdict)
    }

    /// Barrier-present scenario.
    /// 有屏障场景。
    pub fn run_with_barrier(&mut self) -> Result<Verdict> {
        self.run(Scenario::WithBarrier)
    }

    /// Barrier-absent scenario.
    /// 无屏障场景。
    pub fn run_without_barrier(&mut self) -> Result<Verdict> {
        self.run(Scenario::WithoutBarrier)
    }

    /// Stop and join the workers, verify nothing writes afterwards, then
    /// destroy the buffers and the selector.
    ///
    /// Returns `None` if the stack was never built.
    ///
    /// 停止并 join 工作线程，验证之后没有写入，然后销毁缓冲区和选择器。
    pub fn teardown(mut self) -> Result<Option<ShutdownReport>> {
        let Some(stack) = self.stack.take() else {
            return Ok(None);
        };
        let Stack { maps, pool, .. } = stack;

        let workers = match pool.shutdown() {
            Ok(workers) => workers,
            Err(e) => {
                maps.destroy();
                return Err(Error::from(e));
            }
        };

        let settled = settle(&maps, self.config.settle_delay);
        maps.destroy();
        let (before, after) = settled?;

        let quiescent = before == after;
        if !quiescent {
            tracing::warn!("buffers changed after all workers were joined");
        }

        Ok(Some(ShutdownReport {
            workers,
            residual_entries: before[0].len() + before[1].len(),
            quiescent,
        }))
    }
}

impl Drop for RaceTest {
    fn drop(&mut self) {
        if let Some(Stack { maps, pool, .. }) = self.stack.take() {
            // Join before destroying, or a worker could write into a dead buffer.
            drop(pool);
            maps.destroy();
        }
    }
}

impl std::fmt::Debug for RaceTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceTest")
            .field("config", &self.config)
            .field("supported", &self.is_supported())
            .finish()
    }
}

type Snapshot = [Vec<(u64, StatsValue)>; 2];

fn settle(maps: &StatsMaps<u64, StatsValue>, delay: Duration) -> Result<(Snapshot, Snapshot)> {
    let before = snapshot(maps)?;
    std::thread::sleep(delay);
    let after = snapshot(maps)?;
    Ok((before, after))
}

fn snapshot(maps: &StatsMaps<u64, StatsValue>) -> Result<Snapshot> {
    let mut out: Snapshot = [maps.buffer(0).snapshot()?, maps.buffer(1).snapshot()?];
    for entries in &mut out {
        entries.sort_unstable_by_key(|(cookie, _)| *cookie);
    }
    Ok(out)
}
