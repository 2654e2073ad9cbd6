//! JSON target writer (spec.md §4.9, §6).
//!
//! Built with `serde_json::json!`, mirroring the teacher's
//! `serde`-everywhere config/metadata style rather than hand-built
//! string concatenation, since the output here is a structured object
//! with an explicit stable-keys contract.

use serde_json::{json, Value};

use crate::model::{BlockBus, GuestCaps, Inspect, Source};
use crate::target::{assign_dev_names, TargetBuses, Targets};

/// Render the JSON metadata document for `source` (spec.md §4.9).
/// Strings equal to `"unknown"` are normalized to JSON `null`.
pub fn write(
    source: &Source,
    targets: &Targets,
    buses: &TargetBuses,
    caps: &GuestCaps,
    inspect: &Inspect,
) -> String {
    let dev_names = assign_dev_names(&buses.disk_buses);

    let disks: Vec<Value> = targets
        .disk_files
        .iter()
        .zip(buses.disk_buses.iter())
        .zip(dev_names.iter())
        .map(|((file, bus), dev)| {
            json!({
                "dev": dev,
                "bus": bus_label(*bus),
                "format": if *bus == BlockBus::Ide { "raw" } else { "qcow2" },
                "file": file.to_string_lossy(),
            })
        })
        .collect();

    let nics: Vec<Value> = source
        .nics
        .iter()
        .map(|n| {
            json!({
                "vnet": n.vnet,
                "vnet-type": match n.vnet_kind {
                    crate::model::VnetKind::Bridge => "bridge",
                    crate::model::VnetKind::Network => "network",
                },
                "model": n.model,
                "mac": n.mac,
            })
        })
        .collect();

    let removables: Vec<Value> = source
        .removables
        .iter()
        .map(|r| {
            json!({
                "kind": match r.kind {
                    crate::model::RemovableKind::Cdrom => "cdrom",
                    crate::model::RemovableKind::Floppy => "floppy",
                },
                "slot": r.slot,
            })
        })
        .collect();

    let mut doc = json!({
        "version": 1,
        "name": source.effective_name(),
        "memory": source.memory_bytes,
        "vcpu": source.vcpu,
        "cpu": {
            "vendor": normalize_unknown(source.cpu_vendor.as_deref()),
            "model": normalize_unknown(source.cpu_model.as_deref()),
            "topology": {
                "sockets": source.cpu_topology.sockets,
                "cores": source.cpu_topology.cores,
                "threads": source.cpu_topology.threads,
            },
        },
        "firmware": {
            "type": match source.firmware {
                crate::model::Firmware::Uefi => "uefi",
                crate::model::Firmware::Bios => "bios",
                crate::model::Firmware::Unknown => "unknown",
            },
        },
        "features": caps_feature_list(caps),
        "machine": match caps.machine {
            crate::model::MachineType::I440fx => "pc",
            crate::model::MachineType::Q35 => "q35",
            crate::model::MachineType::Virt => "virt",
        },
        "disks": disks,
        "removables": removables,
        "nics": nics,
        "guestcaps": {
            "block_bus": bus_label(caps.block_bus),
            "net_bus": match caps.net_bus {
                crate::model::NetBus::VirtioNet => "virtio",
                crate::model::NetBus::E1000 => "e1000",
                crate::model::NetBus::Rtl8139 => "rtl8139",
            },
            "video": match caps.video {
                crate::model::VideoModel::Qxl => "qxl",
                crate::model::VideoModel::Cirrus => "cirrus",
            },
            "arch": caps.arch,
            "virtio_rng": caps.virtio_rng,
            "virtio_balloon": caps.virtio_balloon,
        },
        "inspect": serde_json::to_value(inspect).unwrap_or(Value::Null),
    });

    normalize_unknown_strings(&mut doc);
    serde_json::to_string_pretty(&doc).unwrap_or_default() + "\n"
}

fn bus_label(bus: BlockBus) -> &'static str {
    match bus {
        BlockBus::VirtioBlk | BlockBus::VirtioSCSI => "virtio",
        BlockBus::Scsi => "scsi",
        BlockBus::Sata => "sata",
        BlockBus::Ide => "ide",
    }
}

fn caps_feature_list(caps: &GuestCaps) -> Vec<&'static str> {
    let mut features = Vec::new();
    if caps.acpi {
        features.push("acpi");
    }
    if caps.isa_pvpanic {
        features.push("pvpanic");
    }
    features
}

fn normalize_unknown(s: Option<&str>) -> Option<String> {
    match s {
        Some("unknown") | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn normalize_unknown_strings(value: &mut Value) {
    match value {
        Value::String(s) if s == "unknown" => *value = Value::Null,
        Value::Array(items) => items.iter_mut().for_each(normalize_unknown_strings),
        Value::Object(map) => map.values_mut().for_each(normalize_unknown_strings),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CpuTopology, FirmwareOnDisk, Hypervisor, MachineType, NetBus, SourceDisk, VideoModel};
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    fn sample_source() -> Source {
        Source {
            name: "vm1".to_string(),
            rename: None,
            hypervisor: Hypervisor::KVM,
            memory_bytes: 1024,
            vcpu: 1,
            cpu_topology: CpuTopology::default(),
            cpu_vendor: None,
            cpu_model: None,
            features: HashSet::new(),
            firmware: crate::model::Firmware::Bios,
            display: None,
            video: None,
            sound: None,
            disks: vec![SourceDisk {
                id: 1,
                qemu_uri: "/tmp/disk.qcow2".to_string(),
                format: Some("qcow2".to_string()),
                controller: None,
            }],
            removables: vec![],
            nics: vec![],
        }
    }

    fn sample_inspect() -> Inspect {
        Inspect {
            root_device: PathBuf::from("/dev/sda1"),
            os_type: "linux".to_string(),
            distro: "unknown".to_string(),
            arch: "x86_64".to_string(),
            major_version: 9,
            minor_version: 0,
            package_format: "rpm".to_string(),
            package_manager: "dnf".to_string(),
            product_name: "unknown".to_string(),
            product_variant: None,
            mountpoints: vec![],
            applications: vec![],
            applications_map: HashMap::new(),
            firmware: FirmwareOnDisk::Bios,
            windows: None,
        }
    }

    #[test]
    fn unknown_strings_become_null() {
        let caps = GuestCaps {
            block_bus: BlockBus::VirtioBlk,
            net_bus: NetBus::VirtioNet,
            video: VideoModel::Cirrus,
            machine: MachineType::I440fx,
            arch: "x86_64".to_string(),
            acpi: true,
            virtio_rng: false,
            virtio_balloon: false,
            isa_pvpanic: false,
        };
        let targets = Targets {
            disk_files: vec![PathBuf::from("/out/vm1-sda.qcow2")],
        };
        let buses = TargetBuses {
            disk_buses: vec![BlockBus::VirtioBlk],
        };
        let out = write(&sample_source(), &targets, &buses, &caps, &sample_inspect());
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["inspect"]["distro"], Value::Null);
        assert_eq!(parsed["inspect"]["product_name"], Value::Null);
        assert!(out.ends_with('\n'));
    }
}
