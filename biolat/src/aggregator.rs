//! Periodic drain, render and reset of the latency histogram.

use std::{
    convert::Infallible,
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use biolat_common::LATENCY_SLOTS;
use log::{debug, info, warn};
use tokio::{
    sync::Notify,
    time::{self, MissedTickBehavior},
};

use crate::{
    config::OutputFormat,
    histogram::Histogram,
    metrics::MetricsState,
    report::{BucketRow, Report},
};

/// Something holding the per-slot counters the handlers increment.
pub trait HistogramSource {
    type Error: std::error::Error;

    /// Called once per cycle before any slot is drained.
    fn begin_interval(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Returns what `slot` counted since it was last drained.
    fn drain_bucket(&mut self, slot: u32) -> Result<u64, Self::Error>;

    /// Submissions left unmeasured since the last call.
    fn take_dropped(&mut self) -> u64 {
        0
    }
}

impl HistogramSource for &Histogram {
    type Error = Infallible;

    fn drain_bucket(&mut self, slot: u32) -> Result<u64, Self::Error> {
        Ok(self.drain(slot).unwrap_or(0))
    }
}

/// Cooperative stop flag shared between the signal listener and the
/// reporting loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    wake: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is not sleeping yet.
        self.inner.wake.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown is requested.
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.inner.wake.notified().await;
    }
}

pub struct Aggregator {
    interval: Duration,
    display_buckets: u32,
    format: OutputFormat,
    metrics: Option<MetricsState>,
}

impl Aggregator {
    pub fn new(interval: Duration, display_buckets: u32, format: OutputFormat) -> Self {
        Self {
            interval,
            display_buckets: display_buckets.clamp(1, LATENCY_SLOTS),
            format,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsState) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Drains every slot (displayed or not) into a report. A slot that
    /// cannot be read counts as zero for this interval.
    pub fn collect<S: HistogramSource>(&self, source: &mut S) -> Report {
        if let Err(e) = source.begin_interval() {
            warn!("failed to start a new interval, draining the current one: {e}");
        }

        let mut report = Report {
            rows: Vec::with_capacity(self.display_buckets as usize),
            undisplayed: 0,
            dropped: source.take_dropped(),
        };

        for slot in 0..LATENCY_SLOTS {
            let count = match source.drain_bucket(slot) {
                Ok(count) => count,
                Err(e) => {
                    debug!("latency slot {slot} unreadable, reporting 0: {e}");
                    0
                }
            };
            if slot < self.display_buckets {
                report.rows.push(BucketRow::new(slot, count));
            } else {
                report.undisplayed += count;
            }
        }

        if report.dropped > 0 {
            info!("{} requests not measured: in-flight table full", report.dropped);
        }
        if report.undisplayed > 0 {
            debug!(
                "{} completions above the displayed {} slots",
                report.undisplayed, self.display_buckets
            );
        }
        report
    }

    /// One reporting cycle: collect, render, publish.
    pub fn report_once<S, W>(&self, source: &mut S, out: &mut W) -> io::Result<Report>
    where
        S: HistogramSource,
        W: Write,
    {
        let report = self.collect(source);
        match self.format {
            OutputFormat::Text => report.write_text(out)?,
            OutputFormat::Json => report.write_json(out)?,
        }
        out.flush()?;

        if let Some(metrics) = &self.metrics {
            metrics.observe(&report);
        }
        Ok(report)
    }

    /// Reports on every period boundary, starting immediately, until
    /// `shutdown` is triggered. A report that has started always completes.
    pub async fn run<S, W>(&self, source: &mut S, out: &mut W, shutdown: &Shutdown) -> io::Result<u64>
    where
        S: HistogramSource,
        W: Write,
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reports = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            if shutdown.is_triggered() {
                break;
            }
            if let Err(e) = self.report_once(source, out) {
                warn!("failed to write report: {e}");
                return Err(e);
            }
            reports += 1;
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("lookup miss")]
    struct Miss;

    /// Fails every read of `bad_slot`, zeroes everything it hands out.
    struct Flaky {
        counts: [u64; LATENCY_SLOTS as usize],
        bad_slot: u32,
    }

    impl HistogramSource for Flaky {
        type Error = Miss;

        fn drain_bucket(&mut self, slot: u32) -> Result<u64, Miss> {
            let count = std::mem::take(&mut self.counts[slot as usize]);
            if slot == self.bad_slot {
                return Err(Miss);
            }
            Ok(count)
        }
    }

    #[test]
    fn unreadable_slot_reports_zero() {
        let mut counts = [0u64; LATENCY_SLOTS as usize];
        counts[1] = 4;
        counts[2] = 9;
        let mut source = Flaky { counts, bad_slot: 2 };

        let aggregator = Aggregator::new(Duration::from_secs(1), 18, OutputFormat::Text);
        let report = aggregator.collect(&mut source);

        assert_eq!(report.rows.len(), 18);
        assert_eq!(report.count(1), Some(4));
        assert_eq!(report.count(2), Some(0));
    }

    /// Histogram plus a running count of submissions the table refused.
    struct Crowded {
        histogram: Histogram,
        refused: u64,
    }

    impl HistogramSource for Crowded {
        type Error = Infallible;

        fn drain_bucket(&mut self, slot: u32) -> Result<u64, Infallible> {
            Ok(self.histogram.drain(slot).unwrap_or(0))
        }

        fn take_dropped(&mut self) -> u64 {
            std::mem::take(&mut self.refused)
        }
    }

    #[test]
    fn refused_submissions_are_reported_once() {
        let mut source = Crowded {
            histogram: Histogram::new(),
            refused: 7,
        };
        source.histogram.record(3);

        let aggregator = Aggregator::new(Duration::from_secs(1), 18, OutputFormat::Json);
        let first = aggregator.collect(&mut source);
        assert_eq!(first.dropped, 7);
        assert_eq!(first.count(3), Some(1));

        let second = aggregator.collect(&mut source);
        assert_eq!(second.dropped, 0);
    }

    #[test]
    fn reset_covers_undisplayed_slots() {
        let histogram = Histogram::new();
        histogram.record(2);
        histogram.record(40);
        histogram.record(63);

        let aggregator = Aggregator::new(Duration::from_secs(1), 18, OutputFormat::Text);
        let report = aggregator.collect(&mut &histogram);

        assert_eq!(report.count(2), Some(1));
        assert_eq!(report.undisplayed, 2);
        assert_eq!(histogram.total(), 0);
    }

    #[test]
    fn empty_interval_reports_zeros() {
        let histogram = Histogram::new();
        let aggregator = Aggregator::new(Duration::from_secs(1), 64, OutputFormat::Text);

        let mut out = Vec::new();
        let report = aggregator.report_once(&mut &histogram, &mut out).unwrap();

        assert_eq!(report.rows.len(), 64);
        assert!(report.rows.iter().all(|r| r.count == 0));
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 65);
    }

    #[test]
    fn display_buckets_are_clamped() {
        let aggregator = Aggregator::new(Duration::from_secs(1), 500, OutputFormat::Json);
        let report = aggregator.collect(&mut &Histogram::new());
        assert_eq!(report.rows.len(), LATENCY_SLOTS as usize);
    }

    #[tokio::test]
    async fn run_stops_after_shutdown() {
        let histogram = Histogram::new();
        histogram.record(0);

        let shutdown = Shutdown::new();
        let aggregator = Aggregator::new(Duration::from_secs(60), 4, OutputFormat::Text);

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.trigger();
        });

        let mut out = Vec::new();
        let reports = aggregator
            .run(&mut &histogram, &mut out, &shutdown)
            .await
            .unwrap();

        assert_eq!(reports, 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("0          -> 1          : 1                | *"));
    }

    /// Output sink whose flush takes `render` of wall time and stops the loop
    /// after `stop_after` reports.
    struct SlowSink {
        flushed_at: Vec<std::time::Instant>,
        render: Duration,
        stop_after: usize,
        shutdown: Shutdown,
    }

    impl Write for SlowSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed_at.push(std::time::Instant::now());
            std::thread::sleep(self.render);
            if self.flushed_at.len() == self.stop_after {
                self.shutdown.trigger();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn reports_stay_on_period_boundaries() {
        let shutdown = Shutdown::new();
        let period = Duration::from_millis(200);
        let aggregator = Aggregator::new(period, 4, OutputFormat::Text);
        let mut sink = SlowSink {
            flushed_at: Vec::new(),
            render: Duration::from_millis(120),
            stop_after: 5,
            shutdown: shutdown.clone(),
        };

        let reports = aggregator
            .run(&mut &Histogram::new(), &mut sink, &shutdown)
            .await
            .unwrap();
        assert_eq!(reports, 5);

        // Four periods between the first and fifth report. Sleeping a full
        // period after each render would take 4 * (200 + 120) ms instead.
        let span = sink.flushed_at[4] - sink.flushed_at[0];
        assert!(span >= Duration::from_millis(750), "{span:?}");
        assert!(span < Duration::from_millis(1040), "{span:?}");
    }

    #[tokio::test]
    async fn run_does_nothing_when_already_stopped() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let aggregator = Aggregator::new(Duration::from_secs(1), 4, OutputFormat::Text);

        let mut out = Vec::new();
        let reports = aggregator
            .run(&mut &Histogram::new(), &mut out, &shutdown)
            .await
            .unwrap();
        assert_eq!(reports, 0);
        assert!(out.is_empty());
    }
}
