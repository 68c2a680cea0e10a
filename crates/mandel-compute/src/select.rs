//! Device selection: GPU first, CPU only when no GPU exists.

use tracing::{info, warn};

use crate::backend::{ComputePlatform, DeviceClass, DeviceInfo};
use crate::info::read_info_string;
use crate::status::{ClStatus, check};
use crate::{ComputeError, ComputeResult};

/// The single device a run executes on.
pub struct ComputeDevice<P: ComputePlatform> {
    pub id: P::Device,
    pub class: DeviceClass,
    pub name: String,
    pub vendor: String,
}

impl<P: ComputePlatform> Clone for ComputeDevice<P> {
    fn clone(&self) -> Self {
        Self { id: self.id.clone(), class: self.class, name: self.name.clone(), vendor: self.vendor.clone() }
    }
}

impl<P: ComputePlatform> std::fmt::Debug for ComputeDevice<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("class", &self.class)
            .field("name", &self.name)
            .field("vendor", &self.vendor)
            .finish()
    }
}

impl<P: ComputePlatform> ComputeDevice<P> {
    /// Operator-facing line naming the device.
    pub fn banner(&self) -> String {
        format!("Using device {} from vendor {}.", self.name, self.vendor)
    }
}

/// Acquire a GPU, falling back to a CPU only on `CL_DEVICE_NOT_FOUND`.
///
/// Any other failure of either request is fatal.
pub fn select_device<P: ComputePlatform>(platform: &P) -> ComputeResult<ComputeDevice<P>> {
    let (id, class) = match platform.first_device(DeviceClass::Gpu) {
        Ok(id) => (id, DeviceClass::Gpu),
        Err(status) if status == ClStatus::DEVICE_NOT_FOUND => {
            warn!(platform = %platform.name(), "no GPU device found, falling back to CPU");
            (check(platform.first_device(DeviceClass::Cpu))?, DeviceClass::Cpu)
        }
        Err(status) => return Err(ComputeError::status(status)),
    };

    let vendor = check(read_info_string(|dest| platform.device_info(&id, DeviceInfo::Vendor, dest)))?;
    let name = check(read_info_string(|dest| platform.device_info(&id, DeviceInfo::Name, dest)))?;
    info!(class = class.name(), %name, %vendor, "device selected");

    Ok(ComputeDevice { id, class, name, vendor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EmulatedConfig, EmulatedDeviceSpec, EmulatedPlatform, Fault, JournalEntry};

    #[test]
    fn prefers_gpu() {
        let platform = EmulatedPlatform::new(
            EmulatedConfig::host().with_device(EmulatedDeviceSpec::gpu("Radeon Test")),
        );
        let device = select_device(&platform).unwrap();
        assert_eq!(device.class, DeviceClass::Gpu);
        assert_eq!(device.name, "Radeon Test");
        assert_eq!(platform.journal(), vec![JournalEntry::DeviceQuery(DeviceClass::Gpu)]);
    }

    #[test]
    fn falls_back_to_cpu_when_no_gpu() {
        let platform = EmulatedPlatform::new(EmulatedConfig::host());
        let device = select_device(&platform).unwrap();
        assert_eq!(device.class, DeviceClass::Cpu);
        assert!(device.name.starts_with("Host CPU"));
        assert_eq!(
            platform.journal(),
            vec![JournalEntry::DeviceQuery(DeviceClass::Gpu), JournalEntry::DeviceQuery(DeviceClass::Cpu)]
        );
        assert_eq!(device.banner(), format!("Using device {} from vendor {}.", device.name, device.vendor));
    }

    #[test]
    fn other_gpu_failure_skips_cpu() {
        let platform = EmulatedPlatform::new(
            EmulatedConfig::host().with_fault(Fault::DeviceQuery(DeviceClass::Gpu), ClStatus::INVALID_PLATFORM),
        );
        let err = select_device(&platform).unwrap_err();
        assert_eq!(err.cl_status(), Some(ClStatus::INVALID_PLATFORM));
        assert_eq!(platform.journal(), vec![JournalEntry::DeviceQuery(DeviceClass::Gpu)]);
    }

    #[test]
    fn no_device_at_all() {
        let platform = EmulatedPlatform::new(EmulatedConfig::empty());
        let err = select_device(&platform).unwrap_err();
        assert!(matches!(err, ComputeError::Status { status: ClStatus::DEVICE_NOT_FOUND, .. }));
        assert!(err.to_string().contains("CL_DEVICE_NOT_FOUND(-1)"));
    }

    #[test]
    fn cpu_failure_after_fallback_is_fatal() {
        let platform = EmulatedPlatform::new(
            EmulatedConfig::host().with_fault(Fault::DeviceQuery(DeviceClass::Cpu), ClStatus::DEVICE_NOT_AVAILABLE),
        );
        let err = select_device(&platform).unwrap_err();
        assert_eq!(err.cl_status(), Some(ClStatus::DEVICE_NOT_AVAILABLE));
    }
}
