use crate::sensors::{GpuDevice, SensorKind, SensorProvider, SourceError};
use crate::snapshot::{SensorField, Snapshot};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

/// A failure that ends monitoring. Optional fields never produce one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("reading {field} requires elevated privileges ({detail})")]
    PrivilegeRequired { field: SensorField, detail: String },
    #[error("mandatory source {field} is unavailable ({detail})")]
    SourceUnavailable { field: SensorField, detail: String },
}

impl AggregationError {
    /// One line for the user, shown once when monitoring stops.
    pub fn user_message(&self) -> String {
        match self {
            AggregationError::PrivilegeRequired { field, .. } => format!(
                "Error: unable to read {}. Please run the program with elevated privileges.",
                describe(*field)
            ),
            AggregationError::SourceUnavailable { field, detail } => format!(
                "Error: unable to read {} ({detail}). The host does not expose this counter.",
                describe(*field)
            ),
        }
    }
}

fn describe(field: SensorField) -> &'static str {
    match field {
        SensorField::CpuLoad => "CPU utilization",
        SensorField::CpuTemperature => "CPU temperature",
        SensorField::GpuLoad => "GPU utilization",
        SensorField::GpuTemperature => "GPU temperature",
        SensorField::RamUsed => "memory utilization",
    }
}

/// Optional sources whose availability changes are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watched {
    CpuTemperature = 0,
    Gpu = 1,
}

impl Watched {
    fn field(self) -> SensorField {
        match self {
            Watched::CpuTemperature => SensorField::CpuTemperature,
            Watched::Gpu => SensorField::GpuLoad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Present,
    Absent,
    Failed,
}

/// Combines independently failing sources into one [`Snapshot`] per call.
///
/// Queries run in a fixed order: CPU load, CPU temperature, GPU, RAM. CPU
/// temperature is read before any GPU work so a privilege failure is fatal no
/// matter what hardware is enumerated.
pub struct SensorAggregator<P> {
    provider: P,
    last_seen: [Option<Availability>; 2],
}

impl<P: SensorProvider> SensorAggregator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            last_seen: [None; 2],
        }
    }

    pub fn sample(&mut self) -> Result<Snapshot, AggregationError> {
        let sampled_at = SystemTime::now();
        let mut degraded = Vec::new();

        let cpu_load_percent = mandatory_percent(
            SensorField::CpuLoad,
            self.provider.cpu_load_percent(),
        )?;

        let cpu_temperature_celsius = match self.provider.cpu_temperature_celsius() {
            Ok(t) if t.is_finite() => Some(t),
            Ok(t) => {
                degraded.push(SensorField::CpuTemperature);
                self.observe(
                    Watched::CpuTemperature,
                    Availability::Failed,
                    &format!("non-finite value {t}"),
                );
                None
            }
            Err(SourceError::PermissionDenied(detail)) => {
                return Err(AggregationError::PrivilegeRequired {
                    field: SensorField::CpuTemperature,
                    detail,
                });
            }
            Err(SourceError::Unavailable(detail)) => {
                degraded.push(SensorField::CpuTemperature);
                self.observe(Watched::CpuTemperature, Availability::Failed, &detail);
                None
            }
        };
        if cpu_temperature_celsius.is_some() {
            self.observe(Watched::CpuTemperature, Availability::Present, "");
        }

        let (gpu_name, gpu_load_percent, gpu_temperature_celsius) =
            match self.provider.gpu_devices() {
                Ok(devices) => match devices.into_iter().next() {
                    Some(first) => {
                        self.observe(Watched::Gpu, Availability::Present, &first.name);
                        let (load, temp) = read_first_gpu(&first, &mut degraded);
                        (Some(first.name), load, temp)
                    }
                    None => {
                        self.observe(
                            Watched::Gpu,
                            Availability::Absent,
                            "no GPU enumerated",
                        );
                        (None, None, None)
                    }
                },
                Err(err) => {
                    degraded.push(SensorField::GpuLoad);
                    degraded.push(SensorField::GpuTemperature);
                    self.observe(Watched::Gpu, Availability::Failed, &err.to_string());
                    (None, None, None)
                }
            };

        let ram_used_percent = mandatory_percent(
            SensorField::RamUsed,
            self.provider.ram_used_percent(),
        )?;

        Ok(Snapshot {
            cpu_load_percent,
            cpu_temperature_celsius,
            gpu_name,
            gpu_load_percent,
            gpu_temperature_celsius,
            ram_used_percent,
            sampled_at,
            degraded,
        })
    }

    /// Logs availability changes once instead of on every cycle.
    fn observe(&mut self, source: Watched, now: Availability, detail: &str) {
        let field = source.field();
        let before = self.last_seen[source as usize].replace(now);
        if before == Some(now) {
            return;
        }
        match (before, now) {
            (_, Availability::Failed) => {
                warn!(field = %field, detail, "sensor read failed, field left empty");
            }
            (None, Availability::Absent) => {
                info!(field = %field, detail, "sensor not present");
            }
            (Some(_), Availability::Absent) => {
                info!(field = %field, detail, "sensor no longer present");
            }
            (Some(Availability::Failed), Availability::Present) => {
                info!(field = %field, detail, "sensor recovered");
            }
            (_, Availability::Present) => {
                info!(field = %field, detail, "sensor available");
            }
        }
    }
}

/// Load comes from the device itself; temperature from the last sensor of
/// temperature type the device enumerates. A non-finite reading leaves its
/// field empty and marks it degraded.
fn read_first_gpu(
    device: &GpuDevice,
    degraded: &mut Vec<SensorField>,
) -> (Option<f64>, Option<f64>) {
    let load = device
        .load_percent
        .and_then(|v| finite_or_degraded(v, SensorField::GpuLoad, degraded))
        .map(clamp_percent);
    let temp = device
        .sensors
        .iter()
        .rev()
        .find(|s| s.kind == SensorKind::Temperature)
        .and_then(|s| finite_or_degraded(s.value, SensorField::GpuTemperature, degraded));
    (load, temp)
}

fn finite_or_degraded(
    value: f64,
    field: SensorField,
    degraded: &mut Vec<SensorField>,
) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        degraded.push(field);
        None
    }
}

fn mandatory_percent(
    field: SensorField,
    reading: Result<f64, SourceError>,
) -> Result<f64, AggregationError> {
    match reading {
        Ok(v) if v.is_finite() => Ok(clamp_percent(v)),
        Ok(v) => Err(AggregationError::SourceUnavailable {
            field,
            detail: format!("non-finite reading {v}"),
        }),
        Err(SourceError::Unavailable(detail)) => {
            Err(AggregationError::SourceUnavailable { field, detail })
        }
        Err(SourceError::PermissionDenied(detail)) => {
            Err(AggregationError::PrivilegeRequired { field, detail })
        }
    }
}

fn clamp_percent(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}
