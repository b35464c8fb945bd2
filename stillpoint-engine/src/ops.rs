//! Serialized operation queue
//!
//! Single-consumer queue through which every user command reaches the
//! playback core and overlay. The worker picks the highest-priority
//! pending command, asks its gate (the lifecycle machine) whether it is
//! currently legal, and executes it to completion before touching the
//! next; no two commands ever run concurrently on the same core.
//!
//! A `Critical` arrival (stop, reset) preempts the running command: its
//! cooperative cancel flag is set and, after a short grace, the command's
//! future is dropped at its current await point. Consecutive skips inside
//! the rate window collapse (the earlier pending skip is cancelled and
//! the later wins) unless the caller asked for strict behavior, in which
//! case the later one fails with `RateLimited`.

use crate::error::{Error, Result};
use crate::fade::CancelFlag;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

/// Grace period a preempted command gets to observe its cancel flag
const PREEMPT_GRACE: Duration = Duration::from_millis(50);

/// Bound on retained latency samples
const SAMPLE_WINDOW: usize = 512;

/// Command priority; higher values run first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Descriptor for one queued command
#[derive(Debug, Clone)]
pub struct Command {
    pub name: &'static str,
    pub priority: Priority,
    /// Commands sharing a collapse key supersede pending ones
    pub collapse_key: Option<&'static str>,
    /// With a collapse key present: fail instead of collapsing
    pub strict: bool,
}

impl Command {
    pub fn new(name: &'static str, priority: Priority) -> Self {
        Self {
            name,
            priority,
            collapse_key: None,
            strict: false,
        }
    }

    pub fn collapsible(mut self, key: &'static str) -> Self {
        self.collapse_key = Some(key);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Dispatch-time permission check, evaluated just before execution
pub type Gate = Box<dyn Fn() -> Result<()> + Send + Sync>;
type Run = Box<dyn FnOnce(CancelFlag) -> BoxFuture<'static, Result<()>> + Send>;

struct Queued {
    command: Command,
    gate: Gate,
    run: Run,
    responder: oneshot::Sender<Result<()>>,
    enqueued_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct StatsInner {
    depth: usize,
    peak_depth: usize,
    executed: u64,
    cancelled: u64,
    rejected: u64,
    wait_ms: VecDeque<f64>,
    exec_ms: VecDeque<f64>,
    busy: Duration,
}

impl StatsInner {
    fn push_sample(samples: &mut VecDeque<f64>, value: f64) {
        if samples.len() == SAMPLE_WINDOW {
            samples.pop_front();
        }
        samples.push_back(value);
    }
}

/// Queue diagnostics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct OpQueueStats {
    pub depth: usize,
    pub peak_depth: usize,
    pub executed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub wait_p50_ms: f64,
    pub wait_p95_ms: f64,
    pub wait_p99_ms: f64,
    pub exec_p50_ms: f64,
    pub exec_p95_ms: f64,
    pub exec_p99_ms: f64,
    /// Fraction of wall time the worker spent executing commands
    pub utilization: f64,
}

struct QueueInner {
    pending: Mutex<Vec<Queued>>,
    notify: Notify,
    critical: Notify,
    stats: Mutex<StatsInner>,
    seq: AtomicU64,
    started: Instant,
}

impl QueueInner {
    fn pop_best(&self) -> Option<Queued> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return None;
        }
        // Highest priority first; FIFO within a priority level
        let best = pending
            .iter()
            .enumerate()
            .max_by_key(|(_, q)| (q.command.priority, std::cmp::Reverse(q.seq)))
            .map(|(i, _)| i)?;
        let op = pending.remove(best);
        self.stats.lock().unwrap().depth = pending.len();
        Some(op)
    }

    fn has_critical_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .any(|q| q.command.priority == Priority::Critical)
    }
}

/// The serialized command queue
pub struct OpQueue {
    inner: Arc<QueueInner>,
}

impl OpQueue {
    pub fn new() -> Self {
        let inner = Arc::new(QueueInner {
            pending: Mutex::new(Vec::new()),
            notify: Notify::new(),
            critical: Notify::new(),
            stats: Mutex::new(StatsInner::default()),
            seq: AtomicU64::new(0),
            started: Instant::now(),
        });
        spawn_worker(Arc::downgrade(&inner));
        Self { inner }
    }

    /// Enqueue a command and await its result
    ///
    /// `gate` is evaluated by the worker at dispatch time, not at submit
    /// time, so the answer reflects the lifecycle state the command will
    /// actually run against.
    pub async fn submit<F>(&self, command: Command, gate: Gate, run: F) -> Result<()>
    where
        F: FnOnce(CancelFlag) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let (responder, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().unwrap();

            if let Some(key) = command.collapse_key {
                if let Some(pos) = pending
                    .iter()
                    .position(|q| q.command.collapse_key == Some(key))
                {
                    if command.strict {
                        self.inner.stats.lock().unwrap().rejected += 1;
                        return Err(Error::RateLimited);
                    }
                    let superseded = pending.remove(pos);
                    debug!(name = superseded.command.name, "collapsed pending command");
                    let mut stats = self.inner.stats.lock().unwrap();
                    stats.cancelled += 1;
                    stats.depth = pending.len();
                    let _ = superseded.responder.send(Err(Error::Cancelled));
                }
            }

            let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
            pending.push(Queued {
                command: command.clone(),
                gate,
                run: Box::new(run),
                responder,
                enqueued_at: Instant::now(),
                seq,
            });
            let mut stats = self.inner.stats.lock().unwrap();
            stats.depth = pending.len();
            stats.peak_depth = stats.peak_depth.max(pending.len());
        }

        if command.priority == Priority::Critical {
            self.inner.critical.notify_waiters();
        }
        self.inner.notify.notify_one();
        trace!(name = command.name, ?command.priority, "command enqueued");

        rx.await.unwrap_or(Err(Error::Cancelled))
    }

    pub fn stats(&self) -> OpQueueStats {
        let stats = self.inner.stats.lock().unwrap();
        let elapsed = self.inner.started.elapsed();
        OpQueueStats {
            depth: stats.depth,
            peak_depth: stats.peak_depth,
            executed: stats.executed,
            cancelled: stats.cancelled,
            rejected: stats.rejected,
            wait_p50_ms: percentile(&stats.wait_ms, 0.50),
            wait_p95_ms: percentile(&stats.wait_ms, 0.95),
            wait_p99_ms: percentile(&stats.wait_ms, 0.99),
            exec_p50_ms: percentile(&stats.exec_ms, 0.50),
            exec_p95_ms: percentile(&stats.exec_ms, 0.95),
            exec_p99_ms: percentile(&stats.exec_ms, 0.99),
            utilization: if elapsed.is_zero() {
                0.0
            } else {
                stats.busy.as_secs_f64() / elapsed.as_secs_f64()
            },
        }
    }
}

impl Default for OpQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(samples: &VecDeque<f64>, p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((sorted.len() as f64 * p).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

fn spawn_worker(inner: Weak<QueueInner>) {
    tokio::spawn(async move {
        loop {
            let Some(queue) = inner.upgrade() else { break };

            let Some(op) = queue.pop_best() else {
                // Bounded wait so the worker notices the queue going away
                let _ = timeout(Duration::from_millis(250), queue.notify.notified()).await;
                continue;
            };

            let wait = op.enqueued_at.elapsed();
            {
                let mut stats = queue.stats.lock().unwrap();
                StatsInner::push_sample(&mut stats.wait_ms, wait.as_secs_f64() * 1000.0);
            }

            if let Err(err) = (op.gate)() {
                debug!(name = op.command.name, %err, "command rejected by gate");
                queue.stats.lock().unwrap().rejected += 1;
                let _ = op.responder.send(Err(err));
                continue;
            }

            let cancel = CancelFlag::new();
            let exec_start = Instant::now();
            let fut = (op.run)(cancel.clone());
            tokio::pin!(fut);

            let result = if op.command.priority == Priority::Critical {
                fut.await
            } else if queue.has_critical_pending() {
                // A critical command is already waiting; do not start work
                // that it would immediately preempt
                cancel.cancel();
                match timeout(PREEMPT_GRACE, &mut fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Cancelled),
                }
            } else {
                tokio::select! {
                    result = &mut fut => result,
                    _ = queue.critical.notified() => {
                        warn!(name = op.command.name, "preempted by critical command");
                        cancel.cancel();
                        match timeout(PREEMPT_GRACE, &mut fut).await {
                            Ok(result) => result,
                            Err(_) => Err(Error::Cancelled),
                        }
                    }
                }
            };

            {
                let mut stats = queue.stats.lock().unwrap();
                stats.executed += 1;
                if matches!(result, Err(Error::Cancelled)) {
                    stats.cancelled += 1;
                }
                let exec = exec_start.elapsed();
                stats.busy += exec;
                StatsInner::push_sample(&mut stats.exec_ms, exec.as_secs_f64() * 1000.0);
            }
            let _ = op.responder.send(result);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn ok_gate() -> Gate {
        Box::new(|| Ok(()))
    }

    #[tokio::test]
    async fn test_commands_run_serially() {
        let queue = OpQueue::new();
        let running = Arc::new(AtomicBool::new(false));
        let overlap = Arc::new(AtomicBool::new(false));

        let mut submissions = Vec::new();
        for _ in 0..8 {
            let running = running.clone();
            let overlap = overlap.clone();
            submissions.push(queue.submit(
                Command::new("probe", Priority::Normal),
                ok_gate(),
                move |_cancel| {
                    Box::pin(async move {
                        if running.swap(true, Ordering::SeqCst) {
                            overlap.store(true, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.store(false, Ordering::SeqCst);
                        Ok(())
                    })
                },
            ));
        }
        // Drive all submissions concurrently; execution must still be serial
        for result in futures::future::join_all(submissions).await {
            result.unwrap();
        }
        assert!(!overlap.load(Ordering::SeqCst), "commands overlapped");
    }

    #[tokio::test]
    async fn test_gate_rejection_leaves_queue_running() {
        let queue = OpQueue::new();
        let err = queue
            .submit(
                Command::new("illegal", Priority::Normal),
                Box::new(|| Err(Error::invalid_state("illegal", "idle"))),
                |_| Box::pin(async { Ok(()) }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        // Queue still processes later commands
        queue
            .submit(Command::new("ok", Priority::Normal), ok_gate(), |_| {
                Box::pin(async { Ok(()) })
            })
            .await
            .unwrap();
        assert_eq!(queue.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let queue = Arc::new(OpQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the worker first so the rest queue up behind it
        let blocker = {
            let queue = queue.clone();
            let order = order.clone();
            tokio::spawn(async move {
                queue
                    .submit(
                        Command::new("blocker", Priority::Normal),
                        ok_gate(),
                        move |_| {
                            Box::pin(async move {
                                tokio::time::sleep(Duration::from_millis(30)).await;
                                order.lock().unwrap().push("blocker");
                                Ok(())
                            })
                        },
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let low = {
            let order = order.clone();
            queue.submit(Command::new("low", Priority::Low), ok_gate(), move |_| {
                Box::pin(async move {
                    order.lock().unwrap().push("low");
                    Ok(())
                })
            })
        };
        let high = {
            let order = order.clone();
            queue.submit(Command::new("high", Priority::High), ok_gate(), move |_| {
                Box::pin(async move {
                    order.lock().unwrap().push("high");
                    Ok(())
                })
            })
        };

        let (b, c) = tokio::join!(low, high);
        blocker.await.unwrap().unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["blocker", "high", "low"]);
    }

    #[tokio::test]
    async fn test_critical_preempts_running_command() {
        let queue = OpQueue::new();
        let saw_cancel = Arc::new(AtomicBool::new(false));

        let long = {
            let saw_cancel = saw_cancel.clone();
            queue.submit(
                Command::new("long", Priority::Normal),
                ok_gate(),
                move |cancel| {
                    Box::pin(async move {
                        for _ in 0..100 {
                            if cancel.is_cancelled() {
                                saw_cancel.store(true, Ordering::SeqCst);
                                return Err(Error::Cancelled);
                            }
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Ok(())
                    })
                },
            )
        };
        let stop = async {
            // Let the long command get going first
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue
                .submit(Command::new("stop", Priority::Critical), ok_gate(), |_| {
                    Box::pin(async { Ok(()) })
                })
                .await
        };

        let (long_result, stop_result) = tokio::join!(long, stop);
        assert_eq!(long_result.unwrap_err(), Error::Cancelled);
        stop_result.unwrap();
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_skip_collapsing() {
        let queue = OpQueue::new();

        let blocker = queue.submit(Command::new("blocker", Priority::Normal), ok_gate(), |_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(())
            })
        });
        let first_skip = queue.submit(
            Command::new("skip", Priority::Normal).collapsible("skip"),
            ok_gate(),
            |_| Box::pin(async { Ok(()) }),
        );
        let second_skip = queue.submit(
            Command::new("skip", Priority::Normal).collapsible("skip"),
            ok_gate(),
            |_| Box::pin(async { Ok(()) }),
        );

        let (blocked, first, second) = tokio::join!(blocker, first_skip, second_skip);
        blocked.unwrap();
        // The earlier pending skip was collapsed; the later one won
        assert_eq!(first.unwrap_err(), Error::Cancelled);
        second.unwrap();
    }

    #[tokio::test]
    async fn test_strict_skip_rate_limited() {
        let queue = OpQueue::new();

        let blocker = queue.submit(Command::new("blocker", Priority::Normal), ok_gate(), |_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(())
            })
        });
        let first_skip = queue.submit(
            Command::new("skip", Priority::Normal).collapsible("skip"),
            ok_gate(),
            |_| Box::pin(async { Ok(()) }),
        );
        let strict_skip = queue.submit(
            Command::new("skip", Priority::Normal).collapsible("skip").strict(),
            ok_gate(),
            |_| Box::pin(async { Ok(()) }),
        );

        let (blocked, first, strict) = tokio::join!(blocker, first_skip, strict_skip);
        blocked.unwrap();
        first.unwrap();
        assert_eq!(strict.unwrap_err(), Error::RateLimited);
    }

    #[tokio::test]
    async fn test_stats_percentiles() {
        let queue = OpQueue::new();
        for _ in 0..10 {
            queue
                .submit(Command::new("op", Priority::Normal), ok_gate(), |_| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        Ok(())
                    })
                })
                .await
                .unwrap();
        }
        let stats = queue.stats();
        assert_eq!(stats.executed, 10);
        assert!(stats.exec_p50_ms >= 1.0);
        assert!(stats.exec_p99_ms >= stats.exec_p50_ms);
        assert!(stats.utilization > 0.0);
    }
}
