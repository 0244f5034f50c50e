use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

/// One sampling cycle worth of readings.
///
/// Every field comes from the same call to
/// [`SensorAggregator::sample`](crate::aggregator::SensorAggregator::sample).
/// A reading that could not be taken this cycle is `None`; nothing is carried
/// over from a previous cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub cpu_load_percent: f64,
    pub cpu_temperature_celsius: Option<f64>,
    pub gpu_name: Option<String>,
    pub gpu_load_percent: Option<f64>,
    pub gpu_temperature_celsius: Option<f64>,
    pub ram_used_percent: f64,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub sampled_at: SystemTime,
    /// Optional fields whose source failed this cycle. Fields that are absent
    /// in steady state (no GPU installed) are not listed.
    pub degraded: Vec<SensorField>,
}

impl Snapshot {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorField {
    CpuLoad,
    CpuTemperature,
    GpuLoad,
    GpuTemperature,
    RamUsed,
}

impl SensorField {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorField::CpuLoad => "cpu_load",
            SensorField::CpuTemperature => "cpu_temperature",
            SensorField::GpuLoad => "gpu_load",
            SensorField::GpuTemperature => "gpu_temperature",
            SensorField::RamUsed => "ram_used",
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_rfc3339<S>(value: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&humantime::format_rfc3339_millis(*value))
}
