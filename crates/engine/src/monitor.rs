use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use alerts::{evaluate, message, Alert, AlertScheduler, EvaluationPolicy};
use common::{
    MarketData, MonitorCommand, MonitorState, MonitorStatus, Notifier, ProviderError,
    RawCandle, TimeSource, Timeframe, WatchConfig,
};
use detector::{clock, CandleSeries};

use crate::Backoff;

/// Cloneable handle passed to other crates (Telegram, main).
#[derive(Clone)]
pub struct MonitorHandle {
    command_tx: mpsc::Sender<MonitorCommand>,
    status: Arc<RwLock<MonitorStatus>>,
}

impl MonitorHandle {
    pub async fn send(&self, cmd: MonitorCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn status(&self) -> MonitorStatus {
        self.status.read().await.clone()
    }

    pub fn command_sender(&self) -> mpsc::Sender<MonitorCommand> {
        self.command_tx.clone()
    }

    pub fn status_handle(&self) -> Arc<RwLock<MonitorStatus>> {
        self.status.clone()
    }
}

/// What one pass over the instrument × timeframe grid did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pairs_evaluated: usize,
    pub alerts_sent: usize,
    pub provider_errors: usize,
    pub data_errors: usize,
    pub delivery_errors: usize,
    pub rate_limited: bool,
    /// The cycle stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl CycleReport {
    /// Every provider call in the cycle succeeded.
    pub fn fully_successful(&self) -> bool {
        self.provider_errors == 0 && !self.rate_limited && !self.interrupted
    }
}

/// The poll loop: fetch, normalize, evaluate, notify, sleep.
///
/// Pairs are evaluated strictly one after another, so the scheduler state is
/// owned here without locking. Commands are observed between pairs and while
/// idle; an in-flight pair always runs to completion.
pub struct Monitor {
    watch: WatchConfig,
    policy: EvaluationPolicy,
    market: Arc<dyn MarketData>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn TimeSource>,
    scheduler: AlertScheduler,
    backoff: Backoff,
    status: Arc<RwLock<MonitorStatus>>,
    command_rx: mpsc::Receiver<MonitorCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<MonitorCommand>,
    paused: bool,
    shutdown: bool,
    last_gc_hour: Option<DateTime<Utc>>,
    alerts_sent: u64,
}

impl Monitor {
    pub fn new(
        watch: WatchConfig,
        market: Arc<dyn MarketData>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn TimeSource>,
    ) -> (Self, MonitorHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let status = Arc::new(RwLock::new(MonitorStatus::default()));

        let handle = MonitorHandle {
            command_tx: command_tx.clone(),
            status: status.clone(),
        };

        let monitor = Monitor {
            policy: EvaluationPolicy::from(&watch),
            scheduler: AlertScheduler::new(watch.cooldown()),
            backoff: Backoff::new(watch.backoff_floor()),
            watch,
            market,
            notifier,
            clock,
            status,
            command_rx,
            command_tx,
            paused: false,
            shutdown: false,
            last_gc_hour: None,
            alerts_sent: 0,
        };

        (monitor, handle)
    }

    pub fn scheduler(&self) -> &AlertScheduler {
        &self.scheduler
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run until a `Shutdown` command arrives. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            instruments = ?self.watch.instruments,
            timeframes = ?self.watch.timeframes,
            run_lengths = ?self.watch.run_lengths,
            "Monitor started"
        );

        loop {
            self.drain_commands().await;
            if self.shutdown {
                break;
            }

            if self.paused {
                debug!("Monitor paused, skipping cycle");
            } else {
                let outcome = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
                match outcome {
                    Ok(report) => {
                        info!(
                            pairs = report.pairs_evaluated,
                            alerts = report.alerts_sent,
                            provider_errors = report.provider_errors,
                            data_errors = report.data_errors,
                            backoff_min = self.backoff.wait_minutes(),
                            "Cycle complete"
                        );
                    }
                    Err(_) => {
                        error!("Monitor cycle panicked; retrying after the poll interval");
                        self.publish_status().await;
                        self.idle(self.watch.poll_interval()).await;
                        continue;
                    }
                }
            }

            self.publish_status().await;
            if self.shutdown {
                break;
            }
            let wait = self.next_wait();
            debug!(wait_secs = wait.as_secs(), "Sleeping until next check");
            self.idle(wait).await;
        }

        self.status.write().await.state = MonitorState::Stopped;
        info!("Monitor stopped");
    }

    /// Evaluate every instrument × timeframe pair once.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let pairs: Vec<(String, Timeframe)> = self
            .watch
            .instruments
            .iter()
            .flat_map(|i| self.watch.timeframes.iter().map(move |tf| (i.clone(), *tf)))
            .collect();

        for (idx, (instrument, timeframe)) in pairs.iter().enumerate() {
            if idx > 0 {
                self.clock.sleep(self.watch.request_delay()).await;
            }

            self.evaluate_pair(instrument, *timeframe, &mut report).await;

            self.drain_commands().await;
            if self.shutdown {
                info!("Shutdown requested, stopping after current pair");
                report.interrupted = true;
                break;
            }
        }

        if report.fully_successful() {
            self.backoff.reset();
        }
        self.collect_garbage_hourly();
        report
    }

    async fn evaluate_pair(&mut self, instrument: &str, timeframe: Timeframe, report: &mut CycleReport) {
        let raw = match self.fetch(instrument, timeframe).await {
            Ok(raw) => raw,
            Err(e) => {
                report.provider_errors += 1;
                warn!(instrument, timeframe = %timeframe, error = %e, "Candle fetch failed");
                if e.is_rate_limited() {
                    self.on_rate_limited(report).await;
                }
                return;
            }
        };

        let series = match CandleSeries::build(&raw, timeframe) {
            Ok(series) => series,
            Err(e) => {
                report.data_errors += 1;
                warn!(instrument, timeframe = %timeframe, error = %e, "Discarding candle batch");
                return;
            }
        };

        let now = self.clock.now();
        report.pairs_evaluated += 1;
        let mut fired = evaluate(&mut self.scheduler, &self.policy, instrument, &series, now);
        if fired.is_empty() {
            return;
        }

        if self.watch.live_price {
            self.quote_live_price(instrument, &mut fired).await;
        }
        for alert in &fired {
            self.deliver(alert, report).await;
        }
    }

    async fn fetch(&self, instrument: &str, timeframe: Timeframe) -> Result<Vec<RawCandle>, ProviderError> {
        let timeout = self.watch.fetch_timeout();
        let fetch = self
            .market
            .fetch_candles(instrument, timeframe, self.watch.min_candles());
        tokio::time::timeout(timeout, fetch)
            .await
            .unwrap_or(Err(ProviderError::Timeout(timeout)))
    }

    /// Every rate-limit signal grows the wait and pages the operator.
    async fn on_rate_limited(&mut self, report: &mut CycleReport) {
        report.rate_limited = true;
        let wait = self.backoff.on_rate_limit();
        warn!(wait_min = wait.as_secs() / 60, "Provider rate limit hit, backing off");

        let notice = message::rate_limit_notice(self.backoff.wait_minutes());
        if let Err(e) = self.notifier.send(&notice).await {
            warn!(error = %e, "Failed to send rate-limit notice");
        }
    }

    async fn quote_live_price(&self, instrument: &str, alerts: &mut [Alert]) {
        let timeout = self.watch.fetch_timeout();
        let quote = tokio::time::timeout(timeout, self.market.current_price(instrument))
            .await
            .unwrap_or(Err(ProviderError::Timeout(timeout)));
        match quote {
            Ok(price) => alerts.iter_mut().for_each(|a| a.price = price),
            Err(e) => warn!(instrument, error = %e, "Live price unavailable, quoting last close"),
        }
    }

    async fn deliver(&mut self, alert: &Alert, report: &mut CycleReport) {
        match self.notifier.send(&alert.render()).await {
            Ok(()) => {
                info!(key = %alert.key, price = alert.price, "Alert sent");
                report.alerts_sent += 1;
                self.alerts_sent += 1;
            }
            Err(e) => {
                report.delivery_errors += 1;
                warn!(key = %alert.key, error = %e, "Alert delivery failed");
            }
        }
    }

    fn collect_garbage_hourly(&mut self) {
        let now = self.clock.now();
        let hour = clock::hour_floor(now);
        if self.last_gc_hour == Some(hour) {
            return;
        }
        self.last_gc_hour = Some(hour);
        let removed = self.scheduler.collect_garbage(now);
        if removed > 0 {
            info!(removed, remaining = self.scheduler.len(), "Expired alert state dropped");
        }
    }

    /// Time until the next epoch-aligned check, pushed out by any backoff.
    fn next_wait(&self) -> Duration {
        let now = self.clock.now();
        let next = clock::next_aligned(now, self.watch.poll_interval());
        (next - now).to_std().unwrap_or(Duration::ZERO) + self.backoff.wait()
    }

    /// Sleep for `duration`, handling commands as they arrive.
    async fn idle(&mut self, duration: Duration) {
        let deadline = self.clock.now() + TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
        while !self.shutdown {
            let remaining = (deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return;
            }
            tokio::select! {
                _ = self.clock.sleep(remaining) => return,
                cmd = self.command_rx.recv() => {
                    if let Some(cmd) = cmd {
                        self.apply(cmd).await;
                    }
                }
            }
        }
    }

    async fn drain_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            self.apply(cmd).await;
        }
    }

    /// Apply a command and publish the resulting run state right away, so
    /// `/status` and the bot handlers see it even mid-sleep.
    async fn apply(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::Pause => {
                if !self.paused {
                    info!("Monitor paused");
                }
                self.paused = true;
            }
            MonitorCommand::Resume => {
                if self.paused {
                    info!("Monitor resumed");
                }
                self.paused = false;
            }
            MonitorCommand::Shutdown => {
                info!("Monitor shutting down");
                self.shutdown = true;
            }
        }
        self.status.write().await.state = self.run_state();
    }

    fn run_state(&self) -> MonitorState {
        if self.paused {
            MonitorState::Paused
        } else {
            MonitorState::Running
        }
    }

    async fn publish_status(&self) {
        let mut status = self.status.write().await;
        status.state = self.run_state();
        status.last_cycle_at = Some(self.clock.now());
        status.backoff_minutes = self.backoff.wait_minutes();
        status.tracked_alerts = self.scheduler.len();
        status.alerts_sent = self.alerts_sent;
    }
}
