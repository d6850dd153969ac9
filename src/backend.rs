//! Backend selection for the Burn framework.
//!
//! The ndarray (CPU) backend is always available; the `wgpu` feature adds
//! GPU acceleration. When an accelerator is requested but cannot be
//! configured, the run falls back to CPU with a warning rather than failing.

use burn::backend::Autodiff;
use tracing::{info, warn};

use crate::error::Result;

#[cfg(feature = "wgpu")]
pub type DefaultBackend = burn::backend::Wgpu;

#[cfg(not(feature = "wgpu"))]
pub type DefaultBackend = burn::backend::NdArray;

/// The autodiff backend used for training
pub type TrainBackend = Autodiff<DefaultBackend>;

/// Device type used by both training and inference
pub type Device = <DefaultBackend as burn::tensor::backend::Backend>::Device;

/// Human-readable name for the compiled backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "wgpu")]
    {
        "WGPU (GPU)"
    }
    #[cfg(not(feature = "wgpu"))]
    {
        "NdArray (CPU)"
    }
}

/// Initialize the compute device, falling back to CPU when an accelerator
/// was requested but none can be configured. Memory is claimed
/// incrementally by the backend; nothing is reserved up front.
pub fn init_device(want_accelerator: bool) -> Device {
    match configure_accelerator(want_accelerator) {
        Ok(()) => {
            info!("Backend initialized: {}", backend_name());
        }
        Err(err) => {
            warn!("{err}; continuing on general-purpose compute");
        }
    }
    Device::default()
}

/// Check that the requested accelerator can actually back this build.
fn configure_accelerator(want_accelerator: bool) -> Result<()> {
    if !want_accelerator {
        return Ok(());
    }

    #[cfg(feature = "wgpu")]
    {
        Ok(())
    }

    #[cfg(not(feature = "wgpu"))]
    {
        use crate::error::Error;
        if has_gpu() {
            Err(Error::AcceleratorConfig(
                "GPU present but this build has no accelerator backend (enable the `wgpu` feature)"
                    .into(),
            ))
        } else {
            Err(Error::AcceleratorConfig("no accelerator detected".into()))
        }
    }
}

/// Probe for a usable GPU on this machine
pub fn has_gpu() -> bool {
    has_nvidia_gpu() || has_amd_gpu()
}

fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || std::process::Command::new("nvidia-smi")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    {
        std::process::Command::new("nvidia-smi")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

fn has_amd_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/sys/module/amdgpu").exists()
            || std::process::Command::new("rocm-smi")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
