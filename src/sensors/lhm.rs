//! LibreHardwareMonitor / OpenHardwareMonitor WMI bridge.
//!
//! Both tools publish their sensor tree under a WMI namespace while running.
//! Reading it is the only way to get CPU package temperatures on most Windows
//! machines, and it needs the monitor to run elevated.

#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use super::{has_gpu_marker, parse_f64_loose, GpuDevice, GpuSensor, SensorKind, SourceError};

/// Sensor tree flattened from one WMI query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LhmReport {
    /// `(label, celsius)` in enumeration order.
    pub cpu_temperatures: Vec<(String, f64)>,
    pub gpus: Vec<GpuDevice>,
    pub errors: Vec<String>,
}

impl LhmReport {
    pub fn is_empty(&self) -> bool {
        self.cpu_temperatures.is_empty() && self.gpus.is_empty()
    }

    pub fn access_denied(&self) -> bool {
        self.errors.iter().any(|e| is_access_denied(e))
    }
}

pub(crate) fn is_access_denied(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("access denied") || m.contains("access is denied") || m.contains("0x80041003")
}

/// Parses `Type|Name|Value|Min|Max|Identifier|Parent` lines. Lines starting
/// with `ERR|` carry a failed namespace query.
pub fn parse_report(text: &str) -> LhmReport {
    #[derive(Default)]
    struct GpuAcc {
        key: String,
        core_load: Option<f64>,
        any_load: Option<f64>,
        sensors: Vec<GpuSensor>,
    }

    let mut report = LhmReport::default();
    let mut gpus: Vec<GpuAcc> = Vec::new();

    for line in text.lines() {
        if let Some(err) = line.strip_prefix("ERR|") {
            report.errors.push(err.trim().to_string());
            continue;
        }
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 7 {
            continue;
        }
        let kind = SensorKind::from_type_name(parts[0]);
        let name = parts[1];
        let Some(value) = parse_f64_loose(parts[2]).filter(|v| v.is_finite()) else {
            continue;
        };
        let ident = parts[5].to_ascii_lowercase();
        let parent = parts[6];

        if is_gpu_identifier(&ident) {
            let key = if parent.is_empty() {
                ident.clone()
            } else {
                parent.to_string()
            };
            let idx = match gpus.iter().position(|g| g.key == key) {
                Some(idx) => idx,
                None => {
                    gpus.push(GpuAcc {
                        key,
                        ..GpuAcc::default()
                    });
                    gpus.len() - 1
                }
            };
            let acc = &mut gpus[idx];
            if kind == SensorKind::Load {
                let n = name.to_ascii_lowercase();
                if n.contains("core") && acc.core_load.is_none() {
                    acc.core_load = Some(value);
                } else if (n.contains("d3d") || n.contains("gpu")) && acc.any_load.is_none() {
                    acc.any_load = Some(value);
                }
            }
            acc.sensors.push(GpuSensor {
                name: name.to_string(),
                kind,
                value,
            });
            continue;
        }

        if kind == SensorKind::Temperature
            && value > 0.0
            && is_cpu_temp_sensor(&ident, &parent.to_ascii_lowercase(), &name.to_ascii_lowercase())
        {
            report
                .cpu_temperatures
                .push((format!("CPU {name}"), value));
        }
    }

    report.gpus = gpus
        .into_iter()
        .map(|g| GpuDevice {
            name: g.key,
            load_percent: g.core_load.or(g.any_load),
            sensors: g.sensors,
        })
        .collect();
    report
}

fn is_gpu_identifier(ident: &str) -> bool {
    ident.contains("/gpu-") || ident.contains("/nvidiagpu/") || ident.contains("/atigpu/")
}

const CPU_SOURCE_MARKERS: [&str; 8] = [
    "/intelcpu/",
    "/amdcpu/",
    "/cpu/",
    "package",
    "core",
    "ccd",
    "tctl",
    "tdie",
];
const TEMPERATURE_MARKERS: [&str; 4] = ["temp", "tctl", "tdie", "package"];

/// Lower-cased identifier, parent and name of a non-GPU sensor.
fn is_cpu_temp_sensor(identifier: &str, parent: &str, name: &str) -> bool {
    let parts = [identifier, parent, name];
    !parts.iter().any(|p| has_gpu_marker(p))
        && mentions(&parts, &CPU_SOURCE_MARKERS)
        && mentions(&parts, &TEMPERATURE_MARKERS)
}

fn mentions(parts: &[&str], markers: &[&str]) -> bool {
    parts
        .iter()
        .any(|part| markers.iter().any(|m| part.contains(m)))
}

#[cfg(target_os = "windows")]
pub fn query() -> Result<Option<LhmReport>, SourceError> {
    use super::decode_cmd_stdout;
    use std::process::Command;

    let script = "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); $n=@('root/LibreHardwareMonitor','root/OpenHardwareMonitor'); foreach($ns in $n){ try { $s=Get-CimInstance -Namespace $ns -ClassName Sensor -ErrorAction Stop } catch { \"ERR|$($_.Exception.Message)\"; continue }; if($s){ $s | ForEach-Object { \"$($_.SensorType)|$($_.Name)|$($_.Value)|$($_.Min)|$($_.Max)|$($_.Identifier)|$($_.Parent)\" }; break } }";
    let output = Command::new("powershell")
        .args(["-NoProfile", "-Command", script])
        .output()
        .map_err(|err| SourceError::Unavailable(format!("powershell: {err}")))?;

    let stderr = decode_cmd_stdout(&output.stderr);
    if is_access_denied(&stderr) {
        return Err(SourceError::PermissionDenied(stderr.trim().to_string()));
    }

    let report = parse_report(&decode_cmd_stdout(&output.stdout));
    if report.is_empty() {
        if report.access_denied() {
            return Err(SourceError::PermissionDenied(report.errors.join("; ")));
        }
        tracing::debug!(errors = ?report.errors, "hardware monitor WMI namespace not available");
        return Ok(None);
    }
    Ok(Some(report))
}

#[cfg(not(target_os = "windows"))]
pub fn query() -> Result<Option<LhmReport>, SourceError> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Temperature|CPU Package|55.5|30|90|/intelcpu/0/temperature/6|/intelcpu/0
Temperature|CPU Core #1|53|30|88|/intelcpu/0/temperature/0|/intelcpu/0
Load|CPU Total|12.3|0|100|/intelcpu/0/load/0|/intelcpu/0
Load|GPU Core|37|0|100|/gpu-nvidia/0/load/0|/gpu-nvidia/0
Temperature|GPU Core|60|30|80|/gpu-nvidia/0/temperature/0|/gpu-nvidia/0
Temperature|GPU Hot Spot|65|30|90|/gpu-nvidia/0/temperature/2|/gpu-nvidia/0
Load|D3D 3D|5|0|100|/gpu-intel-integrated/0/load/0|/gpu-intel-integrated/0
Temperature|Temperature|41|20|60|/hdd/0/temperature/0|/hdd/0
";

    #[test]
    fn groups_gpu_sensors_in_enumeration_order() {
        let report = parse_report(SAMPLE);
        assert_eq!(report.gpus.len(), 2);

        let first = &report.gpus[0];
        assert_eq!(first.name, "/gpu-nvidia/0");
        assert_eq!(first.load_percent, Some(37.0));
        let temps: Vec<f64> = first
            .sensors
            .iter()
            .filter(|s| s.kind == SensorKind::Temperature)
            .map(|s| s.value)
            .collect();
        assert_eq!(temps, vec![60.0, 65.0]);

        assert_eq!(report.gpus[1].load_percent, Some(5.0));
    }

    #[test]
    fn keeps_cpu_temperatures_and_skips_disks() {
        let report = parse_report(SAMPLE);
        assert_eq!(
            report.cpu_temperatures,
            vec![
                ("CPU CPU Package".to_string(), 55.5),
                ("CPU CPU Core #1".to_string(), 53.0),
            ]
        );
    }

    #[test]
    fn error_lines_flag_access_denied() {
        let report = parse_report("ERR|Access denied \nERR|Invalid namespace\n");
        assert!(report.is_empty());
        assert!(report.access_denied());

        let report = parse_report("ERR|Invalid namespace\n");
        assert!(!report.access_denied());
    }

    #[test]
    fn ignores_short_and_unparsable_lines() {
        let report = parse_report("garbage\nTemperature|CPU Package||0|0|/cpu/0/t|/cpu/0\n");
        assert!(report.is_empty());
        assert!(report.errors.is_empty());
    }
}
