//! Worker pool that keeps the writer substrate busy.
//!
//! Every worker binds a loopback endpoint, attaches the stats program, then
//! sends to itself and receives in a loop until the pool's cancellation token
//! fires. Because each worker echoes to itself, a worker is never parked in
//! `recv` without a datagram on its way, so it always observes cancellation
//! within one send/receive round.
//!
//! 保持写入基底繁忙的工作线程池。每个工作线程向自己发送并接收，
//! 因此不会在没有数据报的情况下阻塞于 `recv`，总能在一轮内观察到取消。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};

use crate::coordinator::StatsMaps;
use crate::error::{HarnessError, SubstrateError};
use crate::substrate::{Endpoint, StatsValue, WriterSubstrate};

/// Cooperative cancellation shared by the pool and its workers.
/// 由线程池及其工作线程共享的协作式取消令牌。
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not fired.
    /// 尚未触发的令牌。
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token.
    /// 触发令牌。
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the token has fired.
    /// 令牌是否已触发。
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Per-worker message counts collected at shutdown.
/// 关闭时收集的每个工作线程的消息计数。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Round trips completed by each worker, by worker index.
    /// 每个工作线程完成的往返次数，按工作线程索引排列。
    pub messages: Vec<u64>,
}

impl WorkerReport {
    /// Round trips across all workers.
    /// 所有工作线程的往返总数。
    pub fn total(&self) -> u64 {
        self.messages.iter().sum()
    }
}

type WorkerResult = Result<u64, SubstrateError>;

struct Worker {
    index: usize,
    handle: Option<JoinHandle<WorkerResult>>,
}

/// A fixed-size pool of independent send/receive loops.
/// 由独立收发循环组成的固定大小线程池。
pub struct WorkerPool {
    token: CancellationToken,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawn `count` workers and wait until every one has attached.
    ///
    /// If any worker fails to attach, the workers already running are
    /// cancelled and joined and the first failure is returned.
    ///
    /// 启动 `count` 个工作线程并等待每一个都完成附加。
    pub fn spawn<S>(
        count: usize,
        substrate: Arc<S>,
        maps: StatsMaps<u64, StatsValue>,
        token: CancellationToken,
    ) -> Result<Self, HarnessError>
    where
        S: WriterSubstrate + 'static,
    {
        let (ready_tx, ready_rx) = unbounded();
        let mut pool = WorkerPool {
            token: token.clone(),
            workers: Vec::with_capacity(count),
        };

        for index in 0..count {
            let substrate = substrate.clone();
            let maps = maps.clone();
            let token = token.clone();
            let ready = ready_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("epoch-swap-worker-{index}"))
                .spawn(move || worker_loop(index, substrate.as_ref(), &maps, &token, ready))
                .map_err(|source| HarnessError::Spawn {
                    worker: index,
                    source,
                });

            match handle {
                Ok(handle) => pool.workers.push(Worker {
                    index,
                    handle: Some(handle),
                }),
                Err(e) => {
                    pool.stop();
                    return Err(e);
                }
            }
        }
        drop(ready_tx);

        let mut reported = vec![false; count];
        for _ in 0..count {
            match ready_rx.recv() {
                Ok((index, Ok(()))) => reported[index] = true,
                Ok((index, Err(source))) => {
                    tracing::warn!(worker = index, error = %source, "worker failed to attach");
                    pool.stop();
                    return Err(HarnessError::Attach {
                        worker: index,
                        source,
                    });
                }
                Err(_) => {
                    // Every sender is gone: some worker died before reporting.
                    let worker = reported.iter().position(|r| !r).unwrap_or(0);
                    pool.stop();
                    return Err(HarnessError::StartupAborted { worker });
                }
            }
        }

        tracing::info!(workers = count, "worker pool started");
        Ok(pool)
    }

    /// Number of workers.
    /// 工作线程数量。
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    /// 线程池是否没有工作线程。
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The pool's cancellation token.
    /// 线程池的取消令牌。
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every worker and join them all.
    ///
    /// All workers are joined even if one fails; the first failure is returned.
    ///
    /// 取消所有工作线程并全部 join。
    pub fn shutdown(mut self) -> Result<WorkerReport, HarnessError> {
        self.token.cancel();

        let mut report = WorkerReport::default();
        let mut first_error = None;

        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            match handle.join() {
                Ok(Ok(messages)) => report.messages.push(messages),
                Ok(Err(source)) => {
                    report.messages.push(0);
                    first_error.get_or_insert(HarnessError::Loop {
                        worker: worker.index,
                        source,
                    });
                }
                Err(_) => {
                    report.messages.push(0);
                    first_error.get_or_insert(HarnessError::WorkerPanicked {
                        worker: worker.index,
                    });
                }
            }
        }

        tracing::info!(
            workers = report.messages.len(),
            round_trips = report.total(),
            "worker pool stopped"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn stop(&mut self) {
        self.token.cancel();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

fn worker_loop<S: WriterSubstrate + ?Sized>(
    index: usize,
    substrate: &S,
    maps: &StatsMaps<u64, StatsValue>,
    token: &CancellationToken,
    ready: Sender<(usize, Result<(), SubstrateError>)>,
) -> WorkerResult {
    let endpoint = Endpoint::bind();

    if let Err(e) = substrate.attach(&endpoint, maps) {
        let _ = ready.send((index, Err(e.clone())));
        return Err(e);
    }
    let _ = ready.send((index, Ok(())));
    drop(ready);

    let mut round_trips = 0u64;
    while !token.is_cancelled() {
        let msg = format!("msg: {round_trips}\n");
        let sent = endpoint.send(msg.as_bytes())?;
        let received = endpoint.recv()?;
        debug_assert_eq!(sent, received.len());
        round_trips += 1;
    }

    substrate.detach(&endpoint)?;
    tracing::trace!(worker = index, cookie = endpoint.cookie(), round_trips, "worker exiting");
    Ok(round_trips)
}
