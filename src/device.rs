//! Compute device selection for ONNX Runtime.
//!
//! The worker picks its device once at startup. CUDA support is compiled in
//! with the `cuda` feature; without it every preference resolves to CPU or
//! fails.

use crate::error::{Result, WorkerError};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which device the operator wants inference to run on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA when available, otherwise CPU.
    #[default]
    Auto,
    /// CUDA only; loading fails if it is unavailable.
    Cuda,
    /// CPU only.
    Cpu,
}

/// The device inference actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    /// NVIDIA GPU via the CUDA execution provider.
    Cuda,
    /// Default CPU execution provider.
    Cpu,
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => f.write_str("cuda"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

/// Resolve a preference against what this build and host can do.
///
/// # Errors
///
/// Returns [`WorkerError::Device`] when CUDA is required but unavailable.
pub fn select_device(preference: DevicePreference) -> Result<ComputeDevice> {
    resolve(preference, cuda_available())
}

fn resolve(preference: DevicePreference, cuda: bool) -> Result<ComputeDevice> {
    let device = match preference {
        DevicePreference::Cpu => ComputeDevice::Cpu,
        DevicePreference::Auto if cuda => ComputeDevice::Cuda,
        DevicePreference::Auto => ComputeDevice::Cpu,
        DevicePreference::Cuda if cuda => ComputeDevice::Cuda,
        DevicePreference::Cuda => {
            return Err(WorkerError::Device(
                "CUDA requested but the CUDA execution provider is not available".into(),
            ));
        }
    };
    info!("selected compute device: {device} (preference={preference:?}, cuda_available={cuda})");
    Ok(device)
}

#[cfg(feature = "cuda")]
fn cuda_available() -> bool {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::warn!("CUDA availability probe failed: {e}");
            false
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda_available() -> bool {
    false
}

/// Execution providers to register on the session for `device`.
pub fn execution_providers(device: ComputeDevice) -> Vec<ExecutionProviderDispatch> {
    match device {
        #[cfg(feature = "cuda")]
        ComputeDevice::Cuda => vec![
            ort::execution_providers::CUDAExecutionProvider::default()
                .build()
                .error_on_failure(),
        ],
        #[cfg(not(feature = "cuda"))]
        ComputeDevice::Cuda => vec![CPUExecutionProvider::default().build()],
        ComputeDevice::Cpu => vec![CPUExecutionProvider::default().build()],
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn auto_prefers_cuda_when_present() {
        assert_eq!(
            resolve(DevicePreference::Auto, true).unwrap(),
            ComputeDevice::Cuda
        );
        assert_eq!(
            resolve(DevicePreference::Auto, false).unwrap(),
            ComputeDevice::Cpu
        );
    }

    #[test]
    fn cpu_preference_ignores_cuda() {
        assert_eq!(
            resolve(DevicePreference::Cpu, true).unwrap(),
            ComputeDevice::Cpu
        );
    }

    #[test]
    fn cuda_preference_without_cuda_fails() {
        assert!(matches!(
            resolve(DevicePreference::Cuda, false),
            Err(WorkerError::Device(_))
        ));
        assert_eq!(
            resolve(DevicePreference::Cuda, true).unwrap(),
            ComputeDevice::Cuda
        );
    }

    #[test]
    fn preference_serde_is_lowercase() {
        let json = serde_json::to_string(&DevicePreference::Cuda).unwrap();
        assert_eq!(json, "\"cuda\"");
        let parsed: DevicePreference = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(parsed, DevicePreference::Auto);
    }

    #[test]
    fn device_display() {
        assert_eq!(ComputeDevice::Cuda.to_string(), "cuda");
        assert_eq!(ComputeDevice::Cpu.to_string(), "cpu");
    }

    #[test]
    fn cpu_device_registers_one_provider() {
        assert_eq!(execution_providers(ComputeDevice::Cpu).len(), 1);
    }
}
