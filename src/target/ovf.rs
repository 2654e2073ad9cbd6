//! OVF (oVirt/RHV export) target writer and RHV `.meta` companions
//! (spec.md §4.9, §6).
//!
//! The ResourceType vocabulary mirrors `source::ovf`'s parser-side
//! constants; duplicated locally rather than shared because the two
//! modules read and write independently and neither is the other's
//! caller.

use std::fmt::Write as _;

use crate::model::{BlockBus, GuestCaps, Source};
use crate::target::{assign_dev_names, TargetBuses, Targets};

const RT_CPU: u32 = 3;
const RT_MEMORY: u32 = 4;
const RT_NIC: u32 = 10;
const RT_DISK: u32 = 17;
const RT_IDE: u32 = 5;
const RT_SCSI: u32 = 6;

/// Which oVirt/RHV export layout this OVF targets (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OvfFlavour {
    OVirt,
    RHVExportStorageDomain,
}

/// Render the OVF envelope for `source` (spec.md §4.9, §6: UTF-8 XML,
/// `xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1"`).
pub fn write(
    source: &Source,
    targets: &Targets,
    buses: &TargetBuses,
    caps: &GuestCaps,
    flavour: OvfFlavour,
) -> String {
    let mut xml = String::new();
    writeln!(xml, "<?xml version='1.0' encoding='UTF-8'?>").unwrap();
    writeln!(
        xml,
        "<ovf:Envelope xmlns:ovf=\"http://schemas.dmtf.org/ovf/envelope/1\" \
         xmlns:rasd=\"http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData\" \
         xmlns:vssd=\"http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_VirtualSystemSettingData\">"
    )
    .unwrap();

    writeln!(xml, "  <References>").unwrap();
    for (idx, file) in disk_hrefs(targets, flavour).iter().enumerate() {
        writeln!(
            xml,
            "    <File ovf:id=\"file{}\" ovf:href=\"{}\"/>",
            idx + 1,
            file
        )
        .unwrap();
    }
    writeln!(xml, "  </References>").unwrap();

    writeln!(xml, "  <DiskSection>").unwrap();
    for (idx, _) in targets.disk_files.iter().enumerate() {
        writeln!(
            xml,
            "    <Disk ovf:diskId=\"disk{}\" ovf:fileRef=\"file{}\"/>",
            idx + 1,
            idx + 1
        )
        .unwrap();
    }
    writeln!(xml, "  </DiskSection>").unwrap();

    writeln!(xml, "  <VirtualSystem ovf:id=\"{}\">", escape(source.effective_name())).unwrap();
    writeln!(xml, "    <VirtualHardwareSection>").unwrap();

    write_item(&mut xml, RT_CPU, &source.vcpu.to_string(), None);
    write_item(&mut xml, RT_MEMORY, &(source.memory_bytes / (1024 * 1024)).to_string(), None);

    let dev_names = assign_dev_names(&buses.disk_buses);
    for (idx, (bus, dev)) in buses.disk_buses.iter().zip(dev_names.iter()).enumerate() {
        let controller_rt = if *bus == BlockBus::Ide { RT_IDE } else { RT_SCSI };
        write_item(&mut xml, controller_rt, dev, Some(&format!("disk{}", idx + 1)));
        write_item(&mut xml, RT_DISK, dev, Some(&format!("disk{}", idx + 1)));
    }

    for (idx, nic) in source.nics.iter().enumerate() {
        write_item(&mut xml, RT_NIC, &format!("nic{}", idx), Some(&nic.vnet));
    }

    writeln!(xml, "    </VirtualHardwareSection>").unwrap();
    writeln!(xml, "  </VirtualSystem>").unwrap();
    writeln!(xml, "</ovf:Envelope>").unwrap();
    xml
}

fn write_item(xml: &mut String, resource_type: u32, name: &str, connection: Option<&str>) {
    writeln!(xml, "      <Item>").unwrap();
    writeln!(xml, "        <rasd:ResourceType>{}</rasd:ResourceType>", resource_type).unwrap();
    writeln!(xml, "        <rasd:ElementName>{}</rasd:ElementName>", escape(name)).unwrap();
    if let Some(conn) = connection {
        writeln!(xml, "        <rasd:Connection>{}</rasd:Connection>", escape(conn)).unwrap();
    }
    writeln!(xml, "      </Item>").unwrap();
}

/// The flavour's expected disk-reference layout (spec.md §4.9):
/// `OVirt` references the converted disk files directly; the RHV export
/// storage domain layout references them by their image UUID directory,
/// which the pipeline assigns as the target filename's stem.
fn disk_hrefs(targets: &Targets, flavour: OvfFlavour) -> Vec<String> {
    targets
        .disk_files
        .iter()
        .map(|f| match flavour {
            OvfFlavour::OVirt => f.to_string_lossy().into_owned(),
            OvfFlavour::RHVExportStorageDomain => {
                let stem = f.file_stem().and_then(|s| s.to_str()).unwrap_or("disk");
                format!("images/{}/{}", stem, stem)
            }
        })
        .collect()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// One RHV `.meta` companion file's fields (spec.md §6). `EOF` is always
/// emitted as the final line with no value, matching the vdsm format.
#[derive(Debug, Clone)]
pub struct RhvMeta {
    pub domain: String,
    pub voltype: String,
    pub format: String,
    pub disktype: String,
    pub description: String,
    pub size: u64,
    pub ctime: i64,
    pub mtime: i64,
    pub image: String,
    pub puuid: String,
    pub legality: String,
    pub pool_uuid: String,
    pub disk_type_tag: String,
}

/// Render one `.meta` companion (spec.md §6's key=value record).
pub fn write_rhv_meta(meta: &RhvMeta) -> String {
    let mut out = String::new();
    writeln!(out, "DOMAIN={}", meta.domain).unwrap();
    writeln!(out, "VOLTYPE={}", meta.voltype).unwrap();
    writeln!(out, "FORMAT={}", meta.format).unwrap();
    writeln!(out, "DISKTYPE={}", meta.disktype).unwrap();
    writeln!(out, "DESCRIPTION={}", meta.description).unwrap();
    writeln!(out, "SIZE={}", meta.size).unwrap();
    writeln!(out, "CTIME={}", meta.ctime).unwrap();
    writeln!(out, "MTIME={}", meta.mtime).unwrap();
    writeln!(out, "IMAGE={}", meta.image).unwrap();
    writeln!(out, "PUUID={}", meta.puuid).unwrap();
    writeln!(out, "LEGALITY={}", meta.legality).unwrap();
    writeln!(out, "POOL_UUID={}", meta.pool_uuid).unwrap();
    writeln!(out, "TYPE={}", meta.disk_type_tag).unwrap();
    writeln!(out, "EOF").unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CpuTopology, Firmware, Hypervisor, MachineType, NetBus, SourceDisk, VideoModel,
    };
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn sample_source() -> Source {
        Source {
            name: "vm1".to_string(),
            rename: None,
            hypervisor: Hypervisor::KVM,
            memory_bytes: 1024 * 1024 * 1024,
            vcpu: 2,
            cpu_topology: CpuTopology::default(),
            cpu_vendor: None,
            cpu_model: None,
            features: HashSet::new(),
            firmware: Firmware::Bios,
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

    fn sample_caps() -> GuestCaps {
        GuestCaps {
            block_bus: BlockBus::VirtioBlk,
            net_bus: NetBus::VirtioNet,
            video: VideoModel::Cirrus,
            machine: MachineType::I440fx,
            arch: "x86_64".to_string(),
            acpi: true,
            virtio_rng: false,
            virtio_balloon: false,
            isa_pvpanic: false,
        }
    }

    #[test]
    fn ovirt_flavour_references_file_directly() {
        let targets = Targets {
            disk_files: vec![PathBuf::from("/out/vm1-sda.qcow2")],
        };
        let buses = TargetBuses {
            disk_buses: vec![BlockBus::VirtioBlk],
        };
        let xml = write(&sample_source(), &targets, &buses, &sample_caps(), OvfFlavour::OVirt);
        assert!(xml.contains("ovf:href=\"/out/vm1-sda.qcow2\""));
        assert!(xml.contains("xmlns:ovf=\"http://schemas.dmtf.org/ovf/envelope/1\""));
    }

    #[test]
    fn rhv_flavour_uses_image_uuid_layout() {
        let targets = Targets {
            disk_files: vec![PathBuf::from("/out/vm1-sda.qcow2")],
        };
        let buses = TargetBuses {
            disk_buses: vec![BlockBus::VirtioBlk],
        };
        let xml = write(
            &sample_source(),
            &targets,
            &buses,
            &sample_caps(),
            OvfFlavour::RHVExportStorageDomain,
        );
        assert!(xml.contains("images/vm1-sda/vm1-sda"));
    }

    #[test]
    fn rhv_meta_ends_with_eof() {
        let meta = RhvMeta {
            domain: "sd-uuid".to_string(),
            voltype: "LEAF".to_string(),
            format: "COW".to_string(),
            disktype: "1".to_string(),
            description: "vm1".to_string(),
            size: 1024,
            ctime: 0,
            mtime: 0,
            image: "img-uuid".to_string(),
            puuid: "00000000-0000-0000-0000-000000000000".to_string(),
            legality: "LEGAL".to_string(),
            pool_uuid: "pool-uuid".to_string(),
            disk_type_tag: "2".to_string(),
        };
        let text = write_rhv_meta(&meta);
        assert!(text.trim_end().ends_with("EOF"));
        assert!(text.contains("DOMAIN=sd-uuid"));
    }
}
