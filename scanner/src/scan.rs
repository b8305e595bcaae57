//! Top-level scanning loop over a bounded range or the live chain.
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::block_interval::BlockInterval;
use crate::error::RpcError;
use crate::metrics::{ScanReport, Termination};
use crate::orchestrator::BatchOrchestrator;
use crate::provider::ChainClient;
use crate::session::{ScanSession, Shutdown};
use crate::storage::StorageSink;

/// Lifecycle of a [`ScanLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    ShuttingDown,
    Terminated,
}

enum Event {
    Height(Option<Result<(u64, u64), RpcError>>),
    Report,
    Stop(Termination),
}

pub struct ScanLoop<C, S> {
    orchestrator: BatchOrchestrator<C, S>,
    shutdown: Shutdown,
    state: SessionState,
    started: Instant,
    last_block: Option<u64>,
    chain_head: Option<u64>,
}

impl<C, S> ScanLoop<C, S>
where
    C: ChainClient + 'static,
    S: StorageSink,
{
    pub fn new(session: Arc<ScanSession<C>>, sink: Arc<S>, shutdown: Shutdown) -> Self {
        Self {
            orchestrator: BatchOrchestrator::new(session, sink),
            shutdown,
            state: SessionState::Idle,
            started: Instant::now(),
            last_block: None,
            chain_head: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn session(&self) -> &Arc<ScanSession<C>> {
        self.orchestrator.session()
    }

    fn transition(&mut self, to: SessionState) {
        info!(from = ?self.state, to = ?to, "scan session state change");
        self.state = to;
    }

    fn start(&mut self) {
        self.session().metrics.reset();
        self.started = Instant::now();
        self.last_block = None;
        self.chain_head = None;
        self.transition(SessionState::Running);
    }

    /// Scans a bounded interval, `block_concurrency` heights at a time.
    /// Stops taking new heights once shutdown fires; heights already started
    /// are finished.
    pub async fn run_range(&mut self, interval: BlockInterval) -> ScanReport {
        self.start();
        let resolved = interval.resolve(self.session().client.as_ref()).await;
        let range = match resolved {
            Ok(range) => range,
            Err(e) => {
                error!("could not resolve {interval}: {e}");
                return self.finish(Termination::Failed(e.to_string())).await;
            }
        };
        info!(
            "scanning blocks {}..{} ({} blocks)",
            range.start,
            range.end,
            range.end - range.start
        );

        let session = self.session().clone();
        let warm = range
            .clone()
            .take(session.config.prefetch_depth as usize)
            .map(|n| session.cache.prefetch(n));
        futures::future::join_all(warm).await;

        let (stored, highest) = {
            let orchestrator = &self.orchestrator;
            let shutdown = &self.shutdown;
            let mut results = futures::stream::iter(range)
                .take_while(|_| futures::future::ready(!shutdown.is_triggered()))
                .map(|n| async move { (n, orchestrator.process_block(n).await) })
                .buffer_unordered(session.config.block_concurrency);

            let mut stored = 0;
            let mut highest = None;
            while let Some((n, res)) = results.next().await {
                match res {
                    Ok(count) => {
                        stored += count;
                        highest = highest.max(Some(n));
                    }
                    Err(e) => error!(block = n, "skipping block: {e}"),
                }
            }
            (stored, highest)
        };
        self.last_block = highest;
        info!(stored, "range scan finished");

        let termination = if self.shutdown.is_triggered() {
            Termination::Signal
        } else {
            Termination::Completed
        };
        self.finish(termination).await
    }

    /// Follows the chain from `start_block` (or the next block mined) until
    /// shutdown fires, the session time budget runs out, or the head can no
    /// longer be read. Heights are processed in order, one at a time.
    pub async fn run_follow(&mut self, start_block: Option<u64>) -> ScanReport {
        self.start();
        let session = self.session().clone();
        let config = &session.config;
        let deadline = config.session_timeout.map(|budget| self.started + budget);

        let heights = BlockInterval::FollowFrom { start_block }
            .into_unbounded_stream(session.client.clone(), config.poll_interval)
            .await;
        let mut heights = match heights {
            Ok(heights) => heights,
            Err(e) => {
                error!("could not start following the chain: {e}");
                return self.finish(Termination::Failed(e.to_string())).await;
            }
        };
        info!(?start_block, "following the chain head");

        let mut report_tick =
            tokio::time::interval_at(self.started + config.report_interval, config.report_interval);
        report_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let termination = loop {
            if self.shutdown.is_triggered() {
                break Termination::Signal;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break Termination::TimeBudget;
            }

            let event = tokio::select! {
                biased;
                _ = self.shutdown.wait() => Event::Stop(Termination::Signal),
                _ = until(deadline) => Event::Stop(Termination::TimeBudget),
                _ = report_tick.tick() => Event::Report,
                next = heights.next() => Event::Height(next),
            };

            match event {
                Event::Stop(termination) => break termination,
                Event::Report => {
                    session.metrics.record_progress_report();
                    info!("progress: {}", self.report());
                }
                Event::Height(Some(Ok((height, head)))) => {
                    self.chain_head = Some(head);
                    let ahead_end = head.min(height.saturating_add(config.prefetch_depth));
                    let ahead = height + 1..=ahead_end;
                    match self
                        .orchestrator
                        .process_block_with_prefetch(height, ahead)
                        .await
                    {
                        Ok(_) => self.last_block = Some(height),
                        Err(e) => error!(block = height, "skipping block: {e}"),
                    }
                }
                Event::Height(Some(Err(e))) => {
                    error!("lost track of the chain head: {e}");
                    break Termination::Failed(e.to_string());
                }
                Event::Height(None) => break Termination::Completed,
            }
        };
        self.finish(termination).await
    }

    /// Report from the counters as they stand.
    pub fn report(&self) -> ScanReport {
        ScanReport::new(
            self.session().metrics.snapshot(),
            self.started.elapsed(),
            self.last_block,
            self.chain_head,
        )
    }

    /// All work is drained by the time this runs.
    async fn finish(&mut self, termination: Termination) -> ScanReport {
        self.transition(SessionState::ShuttingDown);
        if !matches!(termination, Termination::Failed(_)) {
            let head = self
                .session()
                .client
                .call_once(|client| async move { client.get_chain_head().await })
                .await;
            if let Ok(head) = head {
                self.chain_head = Some(head);
            }
        }

        let report = self.report().with_termination(termination.clone());
        info!(%termination, "scan finished: {report}");
        self.transition(SessionState::Terminated);
        report
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
