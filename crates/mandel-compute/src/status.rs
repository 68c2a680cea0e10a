//! Device-layer status codes and their symbolic names.
//!
//! Every raw backend call returns [`ClResult`]. [`check`] and [`check_build`]
//! lift a raw status into a [`ComputeError`] that remembers the call site, so
//! the fatal report can name the file and line that hit the failure.

use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::OnceLock;

use tracing::{debug, error};

use crate::backend::ComputePlatform;
use crate::info::read_info_string;
use crate::{ComputeError, ComputeResult};

/// Result of a raw device-layer call.
pub type ClResult<T> = Result<T, ClStatus>;

/// Numeric status returned by the device layer (`cl_int`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClStatus(pub i32);

impl ClStatus {
    pub const SUCCESS: Self = Self(0);
    pub const DEVICE_NOT_FOUND: Self = Self(-1);
    pub const DEVICE_NOT_AVAILABLE: Self = Self(-2);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Self = Self(-4);
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const OUT_OF_HOST_MEMORY: Self = Self(-6);
    pub const BUILD_PROGRAM_FAILURE: Self = Self(-11);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_DEVICE_TYPE: Self = Self(-31);
    pub const INVALID_PLATFORM: Self = Self(-32);
    pub const INVALID_DEVICE: Self = Self(-33);
    pub const INVALID_CONTEXT: Self = Self(-34);
    pub const INVALID_COMMAND_QUEUE: Self = Self(-36);
    pub const INVALID_MEM_OBJECT: Self = Self(-38);
    pub const INVALID_BUILD_OPTIONS: Self = Self(-43);
    pub const INVALID_PROGRAM: Self = Self(-44);
    pub const INVALID_PROGRAM_EXECUTABLE: Self = Self(-45);
    pub const INVALID_KERNEL_NAME: Self = Self(-46);
    pub const INVALID_KERNEL_DEFINITION: Self = Self(-47);
    pub const INVALID_KERNEL: Self = Self(-48);
    pub const INVALID_ARG_INDEX: Self = Self(-49);
    pub const INVALID_ARG_VALUE: Self = Self(-50);
    pub const INVALID_ARG_SIZE: Self = Self(-51);
    pub const INVALID_KERNEL_ARGS: Self = Self(-52);
    pub const INVALID_WORK_DIMENSION: Self = Self(-53);
    pub const INVALID_WORK_GROUP_SIZE: Self = Self(-54);
    pub const INVALID_OPERATION: Self = Self(-59);
    pub const INVALID_BUFFER_SIZE: Self = Self(-61);
    pub const INVALID_GLOBAL_WORK_SIZE: Self = Self(-63);
    pub const PLATFORM_NOT_FOUND_KHR: Self = Self(-1001);

    /// Raw numeric code.
    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Symbolic name, or `UNKNOWN_ERROR` for codes outside the known set.
    pub fn name(self) -> &'static str {
        status_name(self.0)
    }
}

impl fmt::Display for ClStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// Sentinel returned by [`status_name`] for unrecognised codes.
pub const UNKNOWN_STATUS: &str = "UNKNOWN_ERROR";

const KNOWN_STATUSES: &[(i32, &str)] = &[
    (0, "CL_SUCCESS"),
    (-1, "CL_DEVICE_NOT_FOUND"),
    (-2, "CL_DEVICE_NOT_AVAILABLE"),
    (-3, "CL_COMPILER_NOT_AVAILABLE"),
    (-4, "CL_MEM_OBJECT_ALLOCATION_FAILURE"),
    (-5, "CL_OUT_OF_RESOURCES"),
    (-6, "CL_OUT_OF_HOST_MEMORY"),
    (-7, "CL_PROFILING_INFO_NOT_AVAILABLE"),
    (-8, "CL_MEM_COPY_OVERLAP"),
    (-9, "CL_IMAGE_FORMAT_MISMATCH"),
    (-10, "CL_IMAGE_FORMAT_NOT_SUPPORTED"),
    (-11, "CL_BUILD_PROGRAM_FAILURE"),
    (-12, "CL_MAP_FAILURE"),
    (-13, "CL_MISALIGNED_SUB_BUFFER_OFFSET"),
    (-14, "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"),
    (-15, "CL_COMPILE_PROGRAM_FAILURE"),
    (-16, "CL_LINKER_NOT_AVAILABLE"),
    (-17, "CL_LINK_PROGRAM_FAILURE"),
    (-18, "CL_DEVICE_PARTITION_FAILED"),
    (-19, "CL_KERNEL_ARG_INFO_NOT_AVAILABLE"),
    (-30, "CL_INVALID_VALUE"),
    (-31, "CL_INVALID_DEVICE_TYPE"),
    (-32, "CL_INVALID_PLATFORM"),
    (-33, "CL_INVALID_DEVICE"),
    (-34, "CL_INVALID_CONTEXT"),
    (-35, "CL_INVALID_QUEUE_PROPERTIES"),
    (-36, "CL_INVALID_COMMAND_QUEUE"),
    (-37, "CL_INVALID_HOST_PTR"),
    (-38, "CL_INVALID_MEM_OBJECT"),
    (-39, "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR"),
    (-40, "CL_INVALID_IMAGE_SIZE"),
    (-41, "CL_INVALID_SAMPLER"),
    (-42, "CL_INVALID_BINARY"),
    (-43, "CL_INVALID_BUILD_OPTIONS"),
    (-44, "CL_INVALID_PROGRAM"),
    (-45, "CL_INVALID_PROGRAM_EXECUTABLE"),
    (-46, "CL_INVALID_KERNEL_NAME"),
    (-47, "CL_INVALID_KERNEL_DEFINITION"),
    (-48, "CL_INVALID_KERNEL"),
    (-49, "CL_INVALID_ARG_INDEX"),
    (-50, "CL_INVALID_ARG_VALUE"),
    (-51, "CL_INVALID_ARG_SIZE"),
    (-52, "CL_INVALID_KERNEL_ARGS"),
    (-53, "CL_INVALID_WORK_DIMENSION"),
    (-54, "CL_INVALID_WORK_GROUP_SIZE"),
    (-55, "CL_INVALID_WORK_ITEM_SIZE"),
    (-56, "CL_INVALID_GLOBAL_OFFSET"),
    (-57, "CL_INVALID_EVENT_WAIT_LIST"),
    (-58, "CL_INVALID_EVENT"),
    (-59, "CL_INVALID_OPERATION"),
    (-60, "CL_INVALID_GL_OBJECT"),
    (-61, "CL_INVALID_BUFFER_SIZE"),
    (-62, "CL_INVALID_MIP_LEVEL"),
    (-63, "CL_INVALID_GLOBAL_WORK_SIZE"),
    (-64, "CL_INVALID_PROPERTY"),
    (-65, "CL_INVALID_IMAGE_DESCRIPTOR"),
    (-66, "CL_INVALID_COMPILER_OPTIONS"),
    (-67, "CL_INVALID_LINKER_OPTIONS"),
    (-68, "CL_INVALID_DEVICE_PARTITION_COUNT"),
    (-69, "CL_INVALID_PIPE_SIZE"),
    (-70, "CL_INVALID_DEVICE_QUEUE"),
    (-1001, "CL_PLATFORM_NOT_FOUND_KHR"),
];

static STATUS_NAMES: OnceLock<HashMap<i32, &'static str>> = OnceLock::new();

/// Look up the symbolic name of a status code. Never fails.
pub fn status_name(code: i32) -> &'static str {
    STATUS_NAMES
        .get_or_init(|| KNOWN_STATUSES.iter().copied().collect())
        .get(&code)
        .copied()
        .unwrap_or(UNKNOWN_STATUS)
}

/// All codes with a symbolic name, in table order.
pub fn known_statuses() -> impl Iterator<Item = (i32, &'static str)> {
    KNOWN_STATUSES.iter().copied()
}

/// Lift a raw result into a [`ComputeResult`], recording the caller's location
/// on failure.
#[track_caller]
pub fn check<T>(result: ClResult<T>) -> ComputeResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(status) => Err(ComputeError::status(status)),
    }
}

/// Like [`check`], but a `CL_BUILD_PROGRAM_FAILURE` fetches the compiler log
/// for `program` on `device` and yields [`ComputeError::BuildFailure`].
#[track_caller]
pub fn check_build<P: ComputePlatform>(
    platform: &P,
    program: &P::Program,
    device: &P::Device,
    result: ClResult<()>,
) -> ComputeResult<()> {
    let location = Location::caller();
    match result {
        Ok(()) => Ok(()),
        Err(status) if status == ClStatus::BUILD_PROGRAM_FAILURE => {
            debug!("build failed, fetching compiler log");
            let log = read_info_string(|dest| platform.build_log(program, device, dest))
                .map_err(|status| ComputeError::Status { status, location })?;
            error!(lines = log.lines().count(), "kernel build failed");
            Err(ComputeError::BuildFailure { log, location })
        }
        Err(status) => Err(ComputeError::Status { status, location }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_resolve() {
        assert_eq!(status_name(0), "CL_SUCCESS");
        assert_eq!(status_name(-1), "CL_DEVICE_NOT_FOUND");
        assert_eq!(status_name(-11), "CL_BUILD_PROGRAM_FAILURE");
        assert_eq!(status_name(-54), "CL_INVALID_WORK_GROUP_SIZE");
        assert_eq!(status_name(-70), "CL_INVALID_DEVICE_QUEUE");
        assert_eq!(status_name(-1001), "CL_PLATFORM_NOT_FOUND_KHR");
    }

    #[test]
    fn every_table_entry_round_trips() {
        for (code, name) in known_statuses() {
            assert_eq!(status_name(code), name, "code {code}");
            assert!(name.starts_with("CL_"));
        }
    }

    #[test]
    fn unknown_codes_use_sentinel() {
        for code in [1, -20, -29, -71, -999, i32::MIN, i32::MAX] {
            assert_eq!(status_name(code), UNKNOWN_STATUS, "code {code}");
        }
    }

    #[test]
    fn display_includes_name_and_code() {
        assert_eq!(ClStatus::INVALID_KERNEL_NAME.to_string(), "CL_INVALID_KERNEL_NAME(-46)");
        assert_eq!(ClStatus(-7777).to_string(), "UNKNOWN_ERROR(-7777)");
    }

    #[test]
    fn check_passes_success_through() {
        assert_eq!(check(Ok::<_, ClStatus>(7)).unwrap(), 7);
    }

    #[test]
    fn check_records_call_site() {
        let line = line!() + 1;
        let err = check::<()>(Err(ClStatus::INVALID_CONTEXT)).unwrap_err();
        match err {
            ComputeError::Status { status, location } => {
                assert_eq!(status, ClStatus::INVALID_CONTEXT);
                assert_eq!(location.line(), line);
                assert!(location.file().ends_with("status.rs"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
