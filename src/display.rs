//! Terminal presentation of published snapshots.
//!
//! Reads the publish slot at its own cadence and never writes back to it.

use crate::channel::{FatalNotice, Publication, Subscriber};
use crate::config::{DisplayConfig, DisplayMode};
use crate::snapshot::Snapshot;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

const LINES: usize = 3;

#[derive(Debug, Clone)]
pub enum DisplayOutcome {
    Cancelled,
    Terminated(Arc<FatalNotice>),
}

pub struct Display<W> {
    out: W,
    mode: DisplayMode,
    refresh: Duration,
    bar_width: usize,
    placeholder: String,
    redraw_in_place: bool,
    drawn: bool,
    last: Option<Arc<Snapshot>>,
}

impl<W: Write> Display<W> {
    pub fn new(out: W, cfg: &DisplayConfig, refresh: Duration, redraw_in_place: bool) -> Self {
        Self {
            out,
            mode: cfg.mode,
            refresh,
            bar_width: cfg.bar_width,
            placeholder: cfg.placeholder.clone(),
            redraw_in_place,
            drawn: false,
            last: None,
        }
    }

    pub async fn run(
        &mut self,
        mut subscriber: Subscriber,
        mut cancel: watch::Receiver<bool>,
    ) -> io::Result<DisplayOutcome> {
        let mut ticker = tokio::time::interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *cancel.borrow_and_update() {
                return Ok(DisplayOutcome::Cancelled);
            }
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Ok(DisplayOutcome::Cancelled);
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match subscriber.latest() {
                Publication::Pending => {}
                Publication::Sample(snapshot) => self.show(snapshot)?,
                Publication::Terminated(notice) => {
                    debug!("display saw terminal publication");
                    return Ok(DisplayOutcome::Terminated(notice));
                }
            }
        }
    }

    fn show(&mut self, snapshot: Arc<Snapshot>) -> io::Result<()> {
        let fresh = !matches!(&self.last, Some(prev) if Arc::ptr_eq(prev, &snapshot));
        match self.mode {
            DisplayMode::Json => {
                if fresh {
                    let line = serde_json::to_string(snapshot.as_ref()).map_err(io::Error::from)?;
                    writeln!(self.out, "{line}")?;
                }
            }
            DisplayMode::Bars => {
                if self.drawn && self.redraw_in_place {
                    // Cursor to the start of the first line drawn last time.
                    write!(self.out, "\x1b[{LINES}F")?;
                }
                for line in render_lines(&snapshot, self.bar_width, &self.placeholder) {
                    if self.redraw_in_place {
                        write!(self.out, "\x1b[2K")?;
                    }
                    writeln!(self.out, "{line}")?;
                }
                self.drawn = true;
            }
        }
        self.out.flush()?;
        self.last = Some(snapshot);
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// The GPU row ends with the device name when one was enumerated.
pub fn render_lines(snapshot: &Snapshot, bar_width: usize, placeholder: &str) -> [String; LINES] {
    let mut gpu = render_line(
        "GPU",
        snapshot.gpu_load_percent,
        Some(snapshot.gpu_temperature_celsius),
        bar_width,
        placeholder,
    );
    if let Some(name) = &snapshot.gpu_name {
        gpu.push_str(&format!(" ({name})"));
    }
    [
        render_line(
            "CPU",
            Some(snapshot.cpu_load_percent),
            Some(snapshot.cpu_temperature_celsius),
            bar_width,
            placeholder,
        ),
        gpu,
        render_line(
            "RAM",
            Some(snapshot.ram_used_percent),
            None,
            bar_width,
            placeholder,
        ),
    ]
}

/// `CPU  42%|████████            |, 55°C`. `temperature` is `None` for rows
/// that have no temperature column and `Some(None)` when it is missing.
fn render_line(
    label: &str,
    percent: Option<f64>,
    temperature: Option<Option<f64>>,
    bar_width: usize,
    placeholder: &str,
) -> String {
    let pct = match percent {
        Some(p) => format!("{:>3.0}%", p),
        None => format!("{placeholder:>4}"),
    };
    let mut line = format!("{label} {pct}|{}|", bar(percent, bar_width));
    match temperature {
        Some(Some(t)) => line.push_str(&format!(", {t:.0}°C")),
        Some(None) => line.push_str(&format!(", {placeholder}")),
        None => {}
    }
    line
}

fn bar(percent: Option<f64>, width: usize) -> String {
    let filled = percent
        .map(|p| ((p.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize)
        .unwrap_or(0)
        .min(width);
    let mut s = "█".repeat(filled);
    s.push_str(&" ".repeat(width - filled));
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregationError;
    use crate::channel::publish_channel;
    use crate::snapshot::SensorField;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn snapshot() -> Snapshot {
        Snapshot {
            cpu_load_percent: 42.0,
            cpu_temperature_celsius: Some(55.2),
            gpu_name: None,
            gpu_load_percent: None,
            gpu_temperature_celsius: None,
            ram_used_percent: 77.0,
            sampled_at: UNIX_EPOCH,
            degraded: Vec::new(),
        }
    }

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(bar(Some(50.0), 10), "█████     ");
        assert_eq!(bar(Some(0.0), 4), "    ");
        assert_eq!(bar(Some(100.0), 4), "████");
        assert_eq!(bar(None, 3), "   ");
    }

    #[test]
    fn renders_placeholders_for_absent_gpu() {
        let lines = render_lines(&snapshot(), 10, "N/A");
        assert_eq!(lines[0], "CPU  42%|████      |, 55°C");
        assert_eq!(lines[1], "GPU  N/A|          |, N/A");
        assert_eq!(lines[2], "RAM  77%|████████  |");
    }

    #[test]
    fn renders_gpu_when_present() {
        let mut snap = snapshot();
        snap.gpu_load_percent = Some(100.0);
        snap.gpu_temperature_celsius = Some(64.6);
        let lines = render_lines(&snap, 4, "-");
        assert_eq!(lines[1], "GPU 100%|████|, 65°C");

        snap.gpu_name = Some("NVIDIA GeForce RTX 3080 #0".to_string());
        let lines = render_lines(&snap, 4, "-");
        assert_eq!(lines[1], "GPU 100%|████|, 65°C (NVIDIA GeForce RTX 3080 #0)");
    }

    #[tokio::test(start_paused = true)]
    async fn json_mode_writes_each_snapshot_once_and_stops_on_terminal_state() {
        let cfg = DisplayConfig {
            mode: DisplayMode::Json,
            ..DisplayConfig::default()
        };
        let (tx, rx) = publish_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        tx.publish(snapshot());

        let mut display = Display::new(Vec::new(), &cfg, Duration::from_millis(100), false);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            tx.terminate(FatalNotice::from_error(AggregationError::PrivilegeRequired {
                field: SensorField::CpuTemperature,
                detail: "denied".to_string(),
            }));
        });

        let outcome = display.run(rx, cancel_rx).await.expect("display io");
        producer.await.expect("producer");
        assert!(matches!(outcome, DisplayOutcome::Terminated(_)));

        let text = String::from_utf8(display.into_inner()).expect("utf8");
        assert_eq!(text.lines().count(), 1, "output: {text}");
        let json: serde_json::Value = serde_json::from_str(text.trim()).expect("json line");
        assert_eq!(json["cpu_load_percent"], 42.0);
        assert!(json["gpu_load_percent"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn bars_mode_redraws_until_cancelled() {
        let (tx, rx) = publish_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut snap = snapshot();
        snap.sampled_at = SystemTime::now();
        tx.publish(snap);

        let mut display = Display::new(
            Vec::new(),
            &DisplayConfig::default(),
            Duration::from_millis(100),
            false,
        );
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            cancel_tx.send(true).expect("display listening");
        });

        let outcome = display.run(rx, cancel_rx).await.expect("display io");
        canceller.await.expect("canceller");
        assert!(matches!(outcome, DisplayOutcome::Cancelled));
        drop(tx);

        let text = String::from_utf8(display.into_inner()).expect("utf8");
        // Ticks at 0, 100 and 200 ms each draw the three lines.
        assert_eq!(text.lines().count(), 9, "output: {text}");
        assert!(text.lines().all(|l| !l.contains('\x1b')));
    }
}
