//! Compute device selection.

use std::fmt;
use std::str::FromStr;

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};

use crate::error::Error;

/// Device the ONNX sessions run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    Cpu,
    /// CUDA device ordinal. ONNX Runtime falls back to the CPU provider if
    /// CUDA cannot be registered.
    Cuda(i32),
    #[default]
    CudaDefault,
}

impl Device {
    /// Execution providers to register, in priority order.
    #[must_use]
    pub fn execution_providers(self) -> Vec<ExecutionProviderDispatch> {
        match self {
            Self::Cpu => vec![CPUExecutionProvider::default().build()],
            Self::Cuda(id) => vec![
                CUDAExecutionProvider::default().with_device_id(id).build(),
                CPUExecutionProvider::default().build(),
            ],
            Self::CudaDefault => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::CudaDefault),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse::<i32>().ok())
                .filter(|id| *id >= 0)
                .map(Self::Cuda)
                .ok_or_else(|| {
                    Error::invalid_parameter(
                        "device",
                        format!("expected cpu, cuda or cuda:N, got {s:?}"),
                    )
                }),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
            Self::CudaDefault => f.write_str("cuda"),
        }
    }
}
