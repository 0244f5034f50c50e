use crate::aggregator::{AggregationError, SensorAggregator};
use crate::channel::{FatalNotice, Publisher};
use crate::sensors::SensorProvider;
use crate::snapshot::Snapshot;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

/// Why a poll loop reached its terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Cancelled,
    Fatal(AggregationError),
    SamplerPanicked,
}

/// Drives the aggregator on a fixed cadence and publishes every snapshot.
///
/// [`PollLoop::run`] consumes the loop; once it returns the loop is stopped
/// for good and a new one has to be built to resume monitoring.
pub struct PollLoop<P> {
    aggregator: SensorAggregator<P>,
    interval: Duration,
}

impl<P: SensorProvider + 'static> PollLoop<P> {
    pub fn new(aggregator: SensorAggregator<P>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
        }
    }

    /// Runs until cancelled or until a fatal error, which is published to
    /// `sink` exactly once. Cancellation is observed between cycles only; an
    /// in-flight sensor read always completes.
    pub async fn run(self, sink: Publisher, mut cancel: watch::Receiver<bool>) -> StopReason {
        let PollLoop {
            mut aggregator,
            interval,
        } = self;
        let mut ticker = tokio::time::interval(interval);
        // An overrunning sample delays the schedule instead of queueing ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: u64 = 0;

        info!(interval_ms = interval.as_millis() as u64, "poll loop started");

        loop {
            if *cancel.borrow_and_update() {
                info!(cycles, "poll loop cancelled");
                return StopReason::Cancelled;
            }

            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!(cycles, "poll loop cancelled");
                        return StopReason::Cancelled;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let (returned, result) = match sample_blocking(aggregator).await {
                Ok(pair) => pair,
                Err(err) => {
                    error!(error = %err, cycles, "sampling task panicked");
                    sink.terminate(FatalNotice::other(
                        "Error: the sensor sampler crashed; monitoring stopped.",
                    ));
                    return StopReason::SamplerPanicked;
                }
            };
            aggregator = returned;
            cycles += 1;

            let elapsed = started.elapsed();
            if elapsed > interval {
                debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "sample overran the interval"
                );
            }

            match result {
                Ok(snapshot) => {
                    if snapshot.is_degraded() {
                        debug!(cycle = cycles, fields = ?snapshot.degraded, "degraded cycle");
                    }
                    trace!(
                        cycle = cycles,
                        cpu = snapshot.cpu_load_percent,
                        ram = snapshot.ram_used_percent,
                        degraded = snapshot.degraded.len(),
                        "snapshot published"
                    );
                    sink.publish(snapshot);
                }
                Err(err) => {
                    debug!(error = %err, cycle = cycles, "fatal sensor error, stopping poll loop");
                    sink.terminate(FatalNotice::from_error(err.clone()));
                    return StopReason::Fatal(err);
                }
            }
        }
    }
}

/// Sensor reads block on I/O, so they run off the async workers. The
/// aggregator travels into the blocking task and back.
async fn sample_blocking<P: SensorProvider + 'static>(
    mut aggregator: SensorAggregator<P>,
) -> Result<(SensorAggregator<P>, Result<Snapshot, AggregationError>), tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let result = aggregator.sample();
        (aggregator, result)
    })
    .await
}
