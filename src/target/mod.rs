//! Target metadata writers (spec.md §4.9, §6). All writers are pure
//! producers of text: they receive the final
//! `(Source, Targets, TargetBuses, GuestCaps, Inspect, TargetFirmware)`
//! tuple and never touch the filesystem themselves (the pipeline owns
//! writing the returned string to disk).

pub mod json;
pub mod libvirt_xml;
pub mod openstack;
pub mod ovf;

use std::path::PathBuf;

use crate::model::BlockBus;

/// Where each `Source` disk's converted bytes finally landed, in the
/// same order as `Source::disks` (spec.md §5's ordering guarantee).
#[derive(Debug, Clone)]
pub struct Targets {
    pub disk_files: Vec<PathBuf>,
}

/// The bus each disk is attached to in the *target* domain, parallel to
/// `Targets::disk_files` (distinct from `SourceDisk::controller`, which
/// is the bus on the source side).
#[derive(Debug, Clone)]
pub struct TargetBuses {
    pub disk_buses: Vec<BlockBus>,
}

/// Target firmware selection, distinct from `Inspect`'s as-found
/// firmware and `Source::firmware`'s as-declared firmware.
#[derive(Debug, Clone)]
pub enum TargetFirmware {
    Bios,
    Uefi {
        code: PathBuf,
        vars: PathBuf,
    },
}

/// `vd|sd|hd` device-name prefix for a bus (spec.md §4.9).
pub fn bus_prefix(bus: BlockBus) -> &'static str {
    match bus {
        BlockBus::VirtioBlk => "vd",
        BlockBus::VirtioSCSI | BlockBus::Scsi | BlockBus::Sata => "sd",
        BlockBus::Ide => "hd",
    }
}

/// Assign contiguous per-bus drive letters starting from `a` (spec.md
/// §4.9: "Drive-letter assignment is contiguous per bus starting from
/// `a`"). Returns one `<prefix><letter>` device name per disk, in disk
/// order.
pub fn assign_dev_names(buses: &[BlockBus]) -> Vec<String> {
    let mut next_letter = std::collections::HashMap::new();
    buses
        .iter()
        .map(|bus| {
            let prefix = bus_prefix(*bus);
            let counter = next_letter.entry(prefix).or_insert(0u32);
            let letter = (b'a' + (*counter as u8)) as char;
            *counter += 1;
            format!("{}{}", prefix, letter)
        })
        .collect()
}

/// libvirt `<driver type=...>` value for a disk format string.
pub fn libvirt_driver_type(format: &str) -> &str {
    match format {
        "qcow2" => "qcow2",
        _ => "raw",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_names_are_contiguous_per_bus() {
        let buses = vec![BlockBus::VirtioBlk, BlockBus::VirtioBlk, BlockBus::Ide];
        let names = assign_dev_names(&buses);
        assert_eq!(names, vec!["vda", "vdb", "hda"]);
    }
}
