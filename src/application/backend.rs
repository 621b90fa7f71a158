// ============================================================
// Layer 2 - Backend Selection
// ============================================================
// Device and precision are picked once, from configuration, and
// turned into a concrete Burn backend type here. Use cases hand a
// `BackendTask` to `dispatch` and stay generic over the backend.
//
//   cpu → Autodiff<NdArray<f32>>
//   gpu → Autodiff<Wgpu<f32>>     (feature "wgpu")
//
// Precision does not pick the element type: parameters and AdamW
// moments stay f32 on both devices, and "mixed" switches on the
// dynamic loss scaler.

use burn::tensor::backend::AutodiffBackend;

use crate::domain::error::ForecastError;
use crate::ml::precision::Precision;
use crate::ml::{CpuTrainBackend, DeviceKind};

/// Work that runs on whichever backend configuration selects.
pub trait BackendTask {
    type Output;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<Self::Output, ForecastError>;
}

pub fn dispatch<T: BackendTask>(
    device:    DeviceKind,
    precision: Precision,
    task:      T,
) -> Result<T::Output, ForecastError> {
    match device {
        DeviceKind::Cpu => {
            tracing::debug!("Using NdArray CPU backend ({:?} precision)", precision);
            task.run::<CpuTrainBackend>(Default::default())
        }
        DeviceKind::Gpu => dispatch_gpu(precision, task),
    }
}

#[cfg(feature = "wgpu")]
fn dispatch_gpu<T: BackendTask>(precision: Precision, task: T) -> Result<T::Output, ForecastError> {
    use crate::ml::GpuTrainBackend;

    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?} ({:?} precision)", device, precision);
    task.run::<GpuTrainBackend>(device)
}

#[cfg(not(feature = "wgpu"))]
fn dispatch_gpu<T: BackendTask>(_precision: Precision, _task: T) -> Result<T::Output, ForecastError> {
    Err(ForecastError::InvalidConfig(
        "device 'gpu' requires building with the 'wgpu' feature".to_string(),
    ))
}
