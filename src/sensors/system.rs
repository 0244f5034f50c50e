use super::lhm::{self, LhmReport};
use super::{gpu, has_gpu_marker, GpuDevice, SensorProvider, SourceError};
#[cfg(target_os = "linux")]
use std::fs;
use sysinfo::{ComponentExt, CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};
use tracing::debug;

const CPU_TEMP_RANGE: std::ops::RangeInclusive<f64> = 0.0..=130.0;

#[derive(Debug, Clone)]
pub struct SystemSensorsOptions {
    pub nvidia_smi: bool,
}

impl Default for SystemSensorsOptions {
    fn default() -> Self {
        Self { nvidia_smi: true }
    }
}

/// Host sensors via `sysinfo`, `nvidia-smi`, `/sys/class/thermal` and the
/// hardware monitor WMI namespace on Windows.
pub struct SystemSensors {
    system: System,
    options: SystemSensorsOptions,
    /// Filled by the CPU temperature read and consumed by the GPU read of the
    /// same cycle.
    lhm: Option<LhmReport>,
}

impl SystemSensors {
    pub fn new(options: SystemSensorsOptions) -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory()
                .with_components_list(),
        );
        // CPU usage is a delta between two refreshes; this one is the baseline.
        system.refresh_cpu();
        Self {
            system,
            options,
            lhm: None,
        }
    }

    fn component_temperatures(&mut self) -> Vec<(String, f64)> {
        self.system.refresh_components();
        self.system
            .components()
            .iter()
            .map(|c| (c.label().to_string(), c.temperature() as f64))
            .filter(|(_, t)| t.is_finite() && *t > 0.0)
            .collect()
    }
}

impl SensorProvider for SystemSensors {
    fn cpu_load_percent(&mut self) -> Result<f64, SourceError> {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(SourceError::Unavailable(
                "no CPUs reported by the OS".to_string(),
            ));
        }
        let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        Ok((sum / cpus.len() as f32) as f64)
    }

    fn cpu_temperature_celsius(&mut self) -> Result<f64, SourceError> {
        let mut readings: Vec<(String, f64)> = Vec::new();
        let mut denied: Option<String> = None;

        self.lhm = None;
        match lhm::query() {
            Ok(Some(report)) => {
                readings.extend(report.cpu_temperatures.iter().cloned());
                self.lhm = Some(report);
            }
            Ok(None) => {}
            Err(SourceError::PermissionDenied(detail)) => denied = Some(detail),
            Err(err) => debug!(error = %err, "hardware monitor query failed"),
        }

        let components = self.component_temperatures();
        let component_count = components.len();
        readings.extend(components);

        match thermal_zone_temperatures() {
            Ok(zones) => readings.extend(zones),
            Err(SourceError::PermissionDenied(detail)) => {
                denied.get_or_insert(detail);
            }
            Err(err) => debug!(error = %err, "thermal zones unreadable"),
        }

        debug!(
            readings = readings.len(),
            sysinfo_components = component_count,
            "cpu temperature candidates"
        );

        if let Some(celsius) = select_cpu_temperature(&readings) {
            return Ok(celsius);
        }
        match denied {
            Some(detail) => Err(SourceError::PermissionDenied(detail)),
            None => Err(SourceError::Unavailable(
                "no CPU temperature sensor reported a value".to_string(),
            )),
        }
    }

    fn gpu_devices(&mut self) -> Result<Vec<GpuDevice>, SourceError> {
        let mut failure: Option<SourceError> = None;

        if self.options.nvidia_smi {
            match gpu::enumerate_nvidia() {
                Ok(devices) if !devices.is_empty() => return Ok(devices),
                Ok(_) => {}
                Err(err) => failure = Some(err),
            }
        }

        if let Some(report) = self.lhm.take() {
            if !report.gpus.is_empty() {
                return Ok(report.gpus);
            }
        }

        let from_components = gpu::devices_from_components(&self.component_temperatures());
        if !from_components.is_empty() {
            return Ok(from_components);
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(Vec::new()),
        }
    }

    fn ram_used_percent(&mut self) -> Result<f64, SourceError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(SourceError::Unavailable(
                "OS reported zero total memory".to_string(),
            ));
        }
        Ok(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}

/// Picks the CPU temperature out of labelled readings.
///
/// CPU-looking labels win, then anything that is neither a GPU nor an ACPI
/// zone, then ACPI zones. Within a tier the hottest reading is used.
pub(crate) fn select_cpu_temperature(readings: &[(String, f64)]) -> Option<f64> {
    const PRIMARY: [&str; 7] = [
        "cpu", "package", "x86_pkg", "tctl", "tdie", "coretemp", "k10temp",
    ];

    let in_range: Vec<(String, f64)> = readings
        .iter()
        .filter(|(_, t)| CPU_TEMP_RANGE.contains(t) && *t > 0.0)
        .map(|(label, t)| (label.to_lowercase(), *t))
        .filter(|(label, _)| !has_gpu_marker(label) && !label.contains("nouveau"))
        .collect();

    hottest(&in_range, |l| PRIMARY.iter().any(|m| l.contains(m)) && !is_acpi_label(l))
        .or_else(|| hottest(&in_range, |l| !is_acpi_label(l)))
        .or_else(|| hottest(&in_range, is_acpi_label))
}

fn hottest(readings: &[(String, f64)], pred: impl Fn(&str) -> bool) -> Option<f64> {
    readings
        .iter()
        .filter(|(label, _)| pred(label))
        .map(|(_, t)| *t)
        .max_by(|a, b| a.total_cmp(b))
}

fn is_acpi_label(label: &str) -> bool {
    label.contains("acpi") || label.contains("thermal zone") || label.contains("_tz")
}

#[cfg(target_os = "linux")]
fn thermal_zone_temperatures() -> Result<Vec<(String, f64)>, SourceError> {
    let entries = fs::read_dir("/sys/class/thermal")
        .map_err(|err| SourceError::Unavailable(format!("/sys/class/thermal: {err}")))?;

    let mut out = Vec::new();
    let mut denied: Option<String> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }

        let temp_path = path.join("temp");
        let raw = match fs::read_to_string(&temp_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                denied.get_or_insert(format!("{}: {err}", temp_path.display()));
                continue;
            }
            Err(_) => continue,
        };
        let typ = fs::read_to_string(path.join("type"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| name.to_string());
        if let Some(celsius) = parse_millidegrees(&raw) {
            out.push((typ, celsius));
        }
    }

    match (out.is_empty(), denied) {
        (true, Some(detail)) => Err(SourceError::PermissionDenied(detail)),
        _ => Ok(out),
    }
}

#[cfg(not(target_os = "linux"))]
fn thermal_zone_temperatures() -> Result<Vec<(String, f64)>, SourceError> {
    Ok(Vec::new())
}

/// Thermal zones report millidegrees; a few drivers report whole degrees.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_millidegrees(raw: &str) -> Option<f64> {
    let v = raw.trim().parse::<f64>().ok()?;
    let celsius = if v > 1000.0 { v / 1000.0 } else { v };
    (celsius > 0.0).then_some(celsius)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(l, t)| (l.to_string(), *t)).collect()
    }

    #[test]
    fn prefers_cpu_labels_over_other_sensors() {
        let r = readings(&[
            ("nvme Composite", 70.0),
            ("coretemp Package id 0", 52.0),
            ("coretemp Core 1", 54.0),
            ("amdgpu edge", 80.0),
        ]);
        assert_eq!(select_cpu_temperature(&r), Some(54.0));
    }

    #[test]
    fn falls_back_to_non_gpu_then_acpi() {
        let r = readings(&[("nvme Composite", 41.0), ("acpitz", 45.0), ("amdgpu edge", 60.0)]);
        assert_eq!(select_cpu_temperature(&r), Some(41.0));

        let r = readings(&[("acpitz", 45.0), ("nvidia gpu", 60.0)]);
        assert_eq!(select_cpu_temperature(&r), Some(45.0));
    }

    #[test]
    fn ignores_out_of_range_and_gpu_only_readings() {
        let r = readings(&[("cpu", 180.0), ("cpu", -5.0), ("amdgpu edge", 50.0)]);
        assert_eq!(select_cpu_temperature(&r), None);
        assert_eq!(select_cpu_temperature(&[]), None);
    }

    #[test]
    fn parses_thermal_zone_values() {
        assert_eq!(parse_millidegrees("45000\n"), Some(45.0));
        assert_eq!(parse_millidegrees("47"), Some(47.0));
        assert_eq!(parse_millidegrees("0"), None);
        assert_eq!(parse_millidegrees("n/a"), None);
    }

    #[test]
    fn host_reads_stay_within_percent_range() {
        let mut sensors = SystemSensors::new(SystemSensorsOptions { nvidia_smi: false });
        let cpu = sensors.cpu_load_percent().expect("cpu counter");
        let ram = sensors.ram_used_percent().expect("memory counter");
        assert!((0.0..=100.0).contains(&cpu), "cpu {cpu}");
        assert!((0.0..=100.0).contains(&ram), "ram {ram}");
    }
}
