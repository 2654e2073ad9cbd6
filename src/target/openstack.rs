//! OpenStack image-property writer (spec.md §4.9, §6).
//!
//! Emits the Glance `hw_*`/`os_*` key/value map as an ordered list of
//! pairs, mirroring the teacher's `config/mod.rs` flat key-value
//! serialization idiom rather than a generic map (stable iteration order
//! makes the golden-file-style tests below straightforward).

use crate::model::{BlockBus, Firmware, GuestCaps, Inspect, Source};

/// Render the OpenStack image-property list for `source` (spec.md
/// §4.9).
pub fn write(source: &Source, caps: &GuestCaps, inspect: &Inspect) -> Vec<(String, String)> {
    let mut props = vec![
        ("architecture".to_string(), caps.arch.clone()),
        ("hypervisor_type".to_string(), "kvm".to_string()),
        ("vm_mode".to_string(), "hvm".to_string()),
        ("hw_disk_bus".to_string(), hw_disk_bus(caps.block_bus).to_string()),
        ("hw_vif_model".to_string(), hw_vif_model(caps).to_string()),
        ("hw_video_model".to_string(), hw_video_model(caps).to_string()),
        ("hw_machine_type".to_string(), hw_machine_type(caps).to_string()),
    ];

    if caps.block_bus == BlockBus::VirtioSCSI {
        props.push(("hw_scsi_model".to_string(), "virtio-scsi".to_string()));
    }

    if let (Some(sockets), Some(cores), Some(threads)) = (
        source.cpu_topology.sockets,
        source.cpu_topology.cores,
        source.cpu_topology.threads,
    ) {
        props.push(("hw_cpu_sockets".to_string(), sockets.to_string()));
        props.push(("hw_cpu_cores".to_string(), cores.to_string()));
        props.push(("hw_cpu_threads".to_string(), threads.to_string()));
    }

    props.push(("os_type".to_string(), inspect.os_type.clone()));
    props.push(("os_distro".to_string(), glance_distro(&inspect.distro)));
    props.push(("os_version".to_string(), os_version(inspect)));

    if caps.virtio_rng {
        props.push(("hw_rng_model".to_string(), "virtio".to_string()));
    }

    if source.firmware == Firmware::Uefi {
        props.push(("hw_firmware_type".to_string(), "uefi".to_string()));
    }

    props
}

fn hw_disk_bus(bus: BlockBus) -> &'static str {
    match bus {
        BlockBus::VirtioBlk => "virtio",
        BlockBus::VirtioSCSI | BlockBus::Scsi => "scsi",
        BlockBus::Sata | BlockBus::Ide => "ide",
    }
}

fn hw_vif_model(caps: &GuestCaps) -> &'static str {
    match caps.net_bus {
        crate::model::NetBus::VirtioNet => "virtio",
        crate::model::NetBus::E1000 => "e1000",
        crate::model::NetBus::Rtl8139 => "rtl8139",
    }
}

fn hw_video_model(caps: &GuestCaps) -> &'static str {
    match caps.video {
        crate::model::VideoModel::Qxl => "qxl",
        crate::model::VideoModel::Cirrus => "cirrus",
    }
}

fn hw_machine_type(caps: &GuestCaps) -> &'static str {
    match caps.machine {
        crate::model::MachineType::I440fx => "pc",
        crate::model::MachineType::Q35 => "q35",
        crate::model::MachineType::Virt => "virt",
    }
}

/// Glance's distro spelling differs from libosinfo's for a few distros
/// (spec.md §4.9).
fn glance_distro(distro: &str) -> String {
    match distro.to_lowercase().as_str() {
        "archlinux" => "arch".to_string(),
        "sles" => "sled".to_string(),
        other => other.to_string(),
    }
}

fn os_version(inspect: &Inspect) -> String {
    if inspect.minor_version == 0 {
        inspect.major_version.to_string()
    } else {
        format!("{}.{}", inspect.major_version, inspect.minor_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CpuTopology, FirmwareOnDisk, Hypervisor, MachineType, NetBus, SourceDisk, VideoModel,
    };
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    fn sample_source() -> Source {
        Source {
            name: "vm1".to_string(),
            rename: None,
            hypervisor: Hypervisor::KVM,
            memory_bytes: 1024,
            vcpu: 1,
            cpu_topology: CpuTopology {
                sockets: Some(1),
                cores: Some(2),
                threads: Some(1),
            },
            cpu_vendor: None,
            cpu_model: None,
            features: HashSet::new(),
            firmware: Firmware::Uefi,
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

    fn sample_inspect(distro: &str) -> Inspect {
        Inspect {
            root_device: PathBuf::from("/dev/sda1"),
            os_type: "linux".to_string(),
            distro: distro.to_string(),
            arch: "x86_64".to_string(),
            major_version: 22,
            minor_version: 4,
            package_format: "deb".to_string(),
            package_manager: "apt".to_string(),
            product_name: "Ubuntu".to_string(),
            product_variant: None,
            mountpoints: vec![],
            applications: vec![],
            applications_map: HashMap::new(),
            firmware: FirmwareOnDisk::Uefi { esp_devices: vec![] },
            windows: None,
        }
    }

    fn sample_caps() -> GuestCaps {
        GuestCaps {
            block_bus: BlockBus::VirtioSCSI,
            net_bus: NetBus::VirtioNet,
            video: VideoModel::Qxl,
            machine: MachineType::Q35,
            arch: "x86_64".to_string(),
            acpi: true,
            virtio_rng: true,
            virtio_balloon: true,
            isa_pvpanic: false,
        }
    }

    fn find<'a>(props: &'a [(String, String)], key: &str) -> Option<&'a str> {
        props.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn glance_distro_spelling_overrides_apply() {
        let props = write(&sample_source(), &sample_caps(), &sample_inspect("archlinux"));
        assert_eq!(find(&props, "os_distro"), Some("arch"));
    }

    #[test]
    fn virtio_scsi_adds_hw_scsi_model() {
        let props = write(&sample_source(), &sample_caps(), &sample_inspect("ubuntu"));
        assert_eq!(find(&props, "hw_scsi_model"), Some("virtio-scsi"));
        assert_eq!(find(&props, "hw_disk_bus"), Some("scsi"));
    }

    #[test]
    fn uefi_firmware_and_rng_and_version() {
        let props = write(&sample_source(), &sample_caps(), &sample_inspect("ubuntu"));
        assert_eq!(find(&props, "hw_firmware_type"), Some("uefi"));
        assert_eq!(find(&props, "hw_rng_model"), Some("virtio"));
        assert_eq!(find(&props, "os_version"), Some("22.4"));
    }
}
