//! Per-OS in-place conversion (spec.md §4.6, §4.7).
//!
//! Each converter takes a mounted guest root (through the `FsInspector`
//! boundary), an `Inspect` record, and the caller's `RequestedGuestCaps`,
//! and returns the negotiated `GuestCaps`. Dispatch between the two is
//! by `Inspect::os_type`, mirrored on the teacher's
//! `Hypervisor::from_libvirt_domain_type` tagged-dispatch idiom.

pub mod linux;
pub mod windows;

use crate::error::{ConvertError, Result};
use crate::inspector::FsInspector;
use crate::model::{GuestCaps, Inspect, RequestedGuestCaps};

/// Run the converter matching `inspect.os_type`, mutating the guest
/// filesystem through `inspector` and returning the negotiated caps.
pub fn convert(
    inspector: &mut dyn FsInspector,
    inspect: &Inspect,
    requested: &RequestedGuestCaps,
) -> Result<GuestCaps> {
    if inspect.is_linux() {
        linux::convert(inspector, inspect, requested)
    } else if inspect.is_windows() {
        windows::convert(inspector, inspect, requested)
    } else {
        Err(ConvertError::UnsupportedSource(format!(
            "no converter for guest os_type {:?}",
            inspect.os_type
        )))
    }
}
