pub mod gpu;
pub mod lhm;
pub mod system;

use serde::Serialize;
use thiserror::Error;

pub use system::SystemSensors;

/// Why a single source could not produce a reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Load,
    Clock,
    Fan,
    Other,
}

impl SensorKind {
    /// Maps the sensor type names used by LibreHardwareMonitor and nvidia-smi.
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "temperature" => SensorKind::Temperature,
            "load" => SensorKind::Load,
            "clock" => SensorKind::Clock,
            "fan" => SensorKind::Fan,
            _ => SensorKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuSensor {
    pub name: String,
    pub kind: SensorKind,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuDevice {
    pub name: String,
    pub load_percent: Option<f64>,
    /// In enumeration order.
    pub sensors: Vec<GpuSensor>,
}

/// Hardware readings the aggregator depends on.
///
/// Each call may block on sensor I/O. Implementations report what they saw and
/// leave policy (fatal vs. absent) to the caller.
pub trait SensorProvider: Send {
    fn cpu_load_percent(&mut self) -> Result<f64, SourceError>;

    fn cpu_temperature_celsius(&mut self) -> Result<f64, SourceError>;

    /// An empty list means the machine has no GPU, which is not an error.
    fn gpu_devices(&mut self) -> Result<Vec<GpuDevice>, SourceError>;

    fn ram_used_percent(&mut self) -> Result<f64, SourceError>;
}

/// Lower-cased label markers shared by the CPU and GPU temperature filters.
pub(crate) const GPU_LABEL_MARKERS: [&str; 4] = ["gpu", "nvidia", "amdgpu", "radeon"];

pub(crate) fn has_gpu_marker(label_lower: &str) -> bool {
    GPU_LABEL_MARKERS.iter().any(|m| label_lower.contains(m))
}

/// Reads the first number in a tool's output field, accepting a decimal comma
/// and trailing units (`"61 C"`, `"42,5 %"`).
pub(crate) fn parse_f64_loose(input: &str) -> Option<f64> {
    let normalized = input.trim().replace(',', ".");
    if let Ok(v) = normalized.parse::<f64>() {
        return Some(v);
    }

    let start = normalized.find(|c: char| c.is_ascii_digit() || c == '-' || c == '.')?;
    let rest = &normalized[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .unwrap_or(rest.len());
    rest[..end].parse::<f64>().ok()
}

/// Console tools on Windows may answer in UTF-16LE.
pub(crate) fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_loose_accepts_locale_and_units() {
        assert_eq!(parse_f64_loose(" 42.5 "), Some(42.5));
        assert_eq!(parse_f64_loose("42,5"), Some(42.5));
        assert_eq!(parse_f64_loose("61 C"), Some(61.0));
        assert_eq!(parse_f64_loose("61 Celsius"), Some(61.0));
        assert_eq!(parse_f64_loose("42,5 %"), Some(42.5));
        assert_eq!(parse_f64_loose("[N/A]"), None);
    }

    #[test]
    fn scripted_reads_fall_back_once_the_queue_is_drained() {
        let mut script = fake::Script::always(Err(SourceError::Unavailable("gone".to_string())))
            .then(Ok(50.0))
            .then(Ok(51.0));
        assert_eq!(script.next(), Ok(50.0));
        assert_eq!(script.next(), Ok(51.0));
        assert!(script.next().is_err());
        assert!(script.next().is_err());
    }

    #[test]
    fn decode_cmd_stdout_handles_utf16le() {
        let utf16: Vec<u8> = "ok|1"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        // Plain ASCII in UTF-16LE contains NULs but is still valid UTF-8,
        // so only non-UTF-8 input takes the UTF-16 path.
        assert_eq!(decode_cmd_stdout(b"plain"), "plain");
        let mut invalid = vec![0xff, 0xfe];
        invalid.extend(utf16);
        assert_eq!(decode_cmd_stdout(&invalid), "\u{feff}ok|1");
    }

    #[test]
    fn sensor_kind_from_lhm_type_names() {
        assert_eq!(SensorKind::from_type_name("Temperature"), SensorKind::Temperature);
        assert_eq!(SensorKind::from_type_name("load"), SensorKind::Load);
        assert_eq!(SensorKind::from_type_name("SmallData"), SensorKind::Other);
    }
}
