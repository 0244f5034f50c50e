use super::{has_gpu_marker, parse_f64_loose, GpuDevice, GpuSensor, SensorKind, SourceError};
use std::io::ErrorKind;
use std::process::Command;
use tracing::debug;

const NVIDIA_QUERY: [&str; 2] = [
    "--query-gpu=index,name,utilization.gpu,temperature.gpu",
    "--format=csv,noheader,nounits",
];

/// Enumerates NVIDIA GPUs through `nvidia-smi`.
///
/// A missing binary, a driver that is not loaded or an empty device list all
/// mean "no NVIDIA GPU" and yield an empty list. Any other failure is reported
/// as unavailable.
pub fn enumerate_nvidia() -> Result<Vec<GpuDevice>, SourceError> {
    let output = match run_nvidia_smi(&NVIDIA_QUERY) {
        Ok(output) => output,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(Vec::new());
        }
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            return Err(SourceError::PermissionDenied(format!("nvidia-smi: {err}")));
        }
        Err(err) => return Err(SourceError::Unavailable(format!("nvidia-smi: {err}"))),
    };

    let status = if output.status.success() {
        Ok(())
    } else {
        Err(output.status.to_string())
    };
    interpret_nvidia_output(
        status,
        &String::from_utf8_lossy(&output.stdout),
        &String::from_utf8_lossy(&output.stderr),
    )
}

/// Messages `nvidia-smi` prints, with a non-zero exit, on hosts without a
/// usable NVIDIA GPU.
const NO_DEVICE_MESSAGES: [&str; 3] = [
    "no devices were found",
    "couldn't communicate with the nvidia driver",
    "nvidia-smi has failed",
];

/// `status` is `Err(description)` for a non-zero exit.
pub(crate) fn interpret_nvidia_output(
    status: Result<(), String>,
    stdout: &str,
    stderr: &str,
) -> Result<Vec<GpuDevice>, SourceError> {
    if let Err(exit) = status {
        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        let lower = detail.to_ascii_lowercase();
        if NO_DEVICE_MESSAGES.iter().any(|m| lower.contains(m)) {
            debug!(%exit, detail, "nvidia-smi reports no usable GPU");
            return Ok(Vec::new());
        }
        return Err(SourceError::Unavailable(format!(
            "nvidia-smi exited with {exit}: {detail}"
        )));
    }

    let gpus = parse_nvidia_csv(stdout);
    debug!(count = gpus.len(), "nvidia-smi enumerated GPUs");
    Ok(gpus)
}

pub(crate) fn parse_nvidia_csv(text: &str) -> Vec<GpuDevice> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 4 {
                return None;
            }

            let mut sensors = Vec::new();
            if let Some(temp) = parse_f64_loose(parts[3]).filter(|t| *t > 0.0) {
                sensors.push(GpuSensor {
                    name: "GPU Core".to_string(),
                    kind: SensorKind::Temperature,
                    value: temp,
                });
            }

            Some(GpuDevice {
                name: format!("{} #{}", parts[1], parts[0]),
                load_percent: parse_f64_loose(parts[2]),
                sensors,
            })
        })
        .collect()
}

/// Builds temperature-only devices from GPU-labelled hwmon components
/// (`amdgpu edge`, `nouveau`, ...). Components sharing a driver prefix belong
/// to one device.
pub(crate) fn devices_from_components(components: &[(String, f64)]) -> Vec<GpuDevice> {
    let mut devices: Vec<GpuDevice> = Vec::new();
    for (label, value) in components {
        let lower = label.to_lowercase();
        if !has_gpu_marker(&lower) && !lower.contains("nouveau") {
            continue;
        }
        let device_name = label.split_whitespace().next().unwrap_or(label.as_str()).to_string();
        let sensor = GpuSensor {
            name: label.clone(),
            kind: SensorKind::Temperature,
            value: *value,
        };
        match devices.iter_mut().find(|d| d.name == device_name) {
            Some(device) => device.sensors.push(sensor),
            None => devices.push(GpuDevice {
                name: device_name,
                load_percent: None,
                sensors: vec![sensor],
            }),
        }
    }
    devices
}

fn run_nvidia_smi(args: &[&str]) -> std::io::Result<std::process::Output> {
    let first = Command::new("nvidia-smi").args(args).output();

    #[cfg(target_os = "windows")]
    {
        if first.is_err() {
            return Command::new(r"C:\Windows\System32\nvidia-smi.exe")
                .args(args)
                .output();
        }
    }

    first
}
