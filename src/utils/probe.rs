//! Host accelerator probing through `nvidia-smi`.

use crate::core::{ResourceProbe, ResourceReport};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const NVIDIA_SMI_ARGS: [&str; 2] = ["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"];

/// Probes NVIDIA devices by querying `nvidia-smi`.
///
/// A missing binary, a non-zero exit or a timeout all yield
/// [`ResourceReport::unavailable`].
#[derive(Debug, Clone)]
pub struct SystemProbe {
    command: String,
    timeout: Duration,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different `nvidia-smi` binary.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn query(&self) -> Option<String> {
        let mut child = Command::new(&self.command)
            .args(NVIDIA_SMI_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20))
                }
                Ok(None) | Err(_) => {
                    tracing::debug!("{} did not finish, killing it", self.command);
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
            }
        };
        if !status.success() {
            return None;
        }
        let mut stdout = String::new();
        child.stdout.take()?.read_to_string(&mut stdout).ok()?;
        Some(stdout)
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            command: "nvidia-smi".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Parses `name, memory.total` CSV rows (memory in MiB).
pub fn parse_nvidia_smi(output: &str) -> ResourceReport {
    let devices: Vec<(String, u64)> = output
        .lines()
        .filter_map(|line| {
            let (name, memory) = line.rsplit_once(',')?;
            let mib = memory.trim().parse::<u64>().ok()?;
            Some((name.trim().to_string(), mib.saturating_mul(1024 * 1024)))
        })
        .collect();
    match devices.first() {
        Some((name, bytes)) => ResourceReport {
            available: true,
            device_count: devices.len(),
            device_name: name.clone(),
            device_memory_bytes: *bytes,
        },
        None => ResourceReport::unavailable(),
    }
}

impl ResourceProbe for SystemProbe {
    fn probe(&self) -> ResourceReport {
        let report = self
            .query()
            .map(|out| parse_nvidia_smi(&out))
            .unwrap_or_else(ResourceReport::unavailable);

        #[cfg(feature = "cuda")]
        {
            use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
            let ort_cuda = CUDAExecutionProvider::default()
                .is_available()
                .unwrap_or(false);
            if report.available && !ort_cuda {
                tracing::warn!("GPU present but the CUDA execution provider is unavailable");
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_devices() {
        let report = parse_nvidia_smi("NVIDIA A100-SXM4-40GB, 40960\nNVIDIA A100-SXM4-40GB, 40960\n");
        assert!(report.available);
        assert_eq!(report.device_count, 2);
        assert_eq!(report.device_name, "NVIDIA A100-SXM4-40GB");
        assert_eq!(report.device_memory_bytes, 40960 * 1024 * 1024);
    }

    #[test]
    fn test_parse_garbage_is_unavailable() {
        assert_eq!(parse_nvidia_smi(""), ResourceReport::unavailable());
        assert_eq!(
            parse_nvidia_smi("NVIDIA-SMI has failed"),
            ResourceReport::unavailable()
        );
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let probe = SystemProbe::new().with_command("definitely-not-a-real-nvidia-smi");
        assert_eq!(probe.probe(), ResourceReport::unavailable());
    }
}
