use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use super::network_map::VnetKind;

/// Hypervisor family a `Source` was described under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hypervisor {
    Xen,
    VMware,
    QEMU,
    KVM,
    VirtualBox,
    Physical,
    Unknown,
}

impl Hypervisor {
    /// Map a libvirt `/domain/@type` attribute to a hypervisor family
    /// (spec.md §4.2).
    pub fn from_libvirt_domain_type(domain_type: &str) -> Self {
        match domain_type.to_lowercase().as_str() {
            "xen" => Self::Xen,
            "vmware" => Self::VMware,
            "qemu" => Self::QEMU,
            "kvm" => Self::KVM,
            "vbox" | "virtualbox" => Self::VirtualBox,
            _ => Self::Unknown,
        }
    }
}

/// Guest firmware (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Firmware {
    #[default]
    Unknown,
    Bios,
    Uefi,
}

/// Display listen policy (spec.md §3, Open Question on `<listen type='socket'>`).
///
/// Retained rather than dropped per SPEC_FULL.md §11: writers that cannot
/// represent `Socket` downgrade to omitting the listen element but keep
/// the rest of the display block, and log the downgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenPolicy {
    None,
    Address(String),
    Network(String),
    Socket(Option<PathBuf>),
    ExplicitNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayType {
    Vnc,
    Spice,
    Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Display {
    pub display_type: DisplayType,
    pub keymap: Option<String>,
    pub password: Option<String>,
    pub listen: ListenPolicy,
    pub port: Option<u16>,
}

/// Tagged video model, as reported by the source description (distinct
/// from the negotiated `GuestCaps::video`, which is always virtio-era).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoModelSource {
    Cirrus,
    Vga,
    Vmvga,
    Qxl,
    Virtio,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sound {
    Ac97,
    Es1370,
    Sb16,
    Ich6,
    Ich9,
    Pcspk,
    Other(String),
}

/// Block device controller a disk or removable is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockBus {
    Ide,
    Scsi,
    Sata,
    VirtioBlk,
    VirtioSCSI,
}

/// One disk belonging to a `Source`. `id` is assigned sequentially by the
/// parser and stable across the whole pipeline (spec.md §3, §5 ordering
/// guarantees, §8 invariant "disk IDs are a dense prefix 1..N").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDisk {
    pub id: u32,
    pub qemu_uri: String,
    pub format: Option<String>,
    pub controller: Option<BlockBus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovableKind {
    Cdrom,
    Floppy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRemovable {
    pub kind: RemovableKind,
    pub controller: Option<BlockBus>,
    pub slot: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceNic {
    pub mac: Option<String>,
    pub model: Option<String>,
    /// Current (possibly remapped) vnet name.
    pub vnet: String,
    /// The vnet name exactly as parsed from the source, before mapping.
    pub vnet_orig: String,
    pub vnet_kind: VnetKind,
    /// User-visible explanation of how the network mapper resolved this
    /// NIC, set by [`crate::netmap::apply`].
    pub mapping_explanation: Option<String>,
}

/// CPU topology, kept internally consistent per spec.md §3's invariant:
/// if any two of {sockets, cores, threads, total} are set, the third is
/// derivable or must be consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CpuTopology {
    pub sockets: Option<u32>,
    pub cores: Option<u32>,
    pub threads: Option<u32>,
}

impl CpuTopology {
    /// Validate against a known vCPU total, returning an error message if
    /// the provided fields are mutually inconsistent.
    pub fn check_consistent(&self, total: u32) -> Result<(), String> {
        match (self.sockets, self.cores, self.threads) {
            (Some(s), Some(c), Some(t)) => {
                if s * c * t != total {
                    return Err(format!(
                        "cpu topology {}x{}x{} does not multiply to vcpu count {}",
                        s, c, t, total
                    ));
                }
            }
            (Some(s), Some(c), None) => {
                if total % (s * c) != 0 {
                    return Err(format!(
                        "vcpu count {} is not divisible by sockets*cores {}x{}",
                        total, s, c
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// One powered-off guest as seen from the source side (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub rename: Option<String>,
    pub hypervisor: Hypervisor,

    pub memory_bytes: u64,
    pub vcpu: u32,
    pub cpu_topology: CpuTopology,
    pub cpu_vendor: Option<String>,
    pub cpu_model: Option<String>,
    pub features: HashSet<String>,

    pub firmware: Firmware,

    pub display: Option<Display>,
    pub video: Option<VideoModelSource>,
    pub sound: Option<Sound>,

    pub disks: Vec<SourceDisk>,
    pub removables: Vec<SourceRemovable>,
    pub nics: Vec<SourceNic>,
}

impl Source {
    /// The effective name target writers should use.
    pub fn effective_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.name)
    }

    /// Validate the cross-cutting invariants of spec.md §8 that apply to
    /// every `Source` regardless of which parser produced it.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("source name must not be empty".to_string());
        }
        if self.disks.is_empty() {
            return Err("source must have at least one non-removable disk".to_string());
        }
        self.cpu_topology.check_consistent(self.vcpu)?;

        let mut seen_ids = HashSet::new();
        for (idx, disk) in self.disks.iter().enumerate() {
            if disk.id != (idx as u32) + 1 {
                return Err(format!(
                    "disk ids must be a dense 1..N prefix in parse order, got {} at position {}",
                    disk.id, idx
                ));
            }
            if !seen_ids.insert(disk.id) {
                return Err(format!("duplicate disk id {}", disk.id));
            }
        }
        Ok(())
    }
}

/// Where a `ParsedDisk`'s bytes actually live, prior to URI remapping
/// (spec.md §3). Transient: only meaningful between parse and remap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParsedDiskOrigin {
    BlockDev(PathBuf),
    File(PathBuf),
    /// The parser already produced a final `qemu_uri` (e.g. an `nbd:`
    /// network disk) that the remapper must leave untouched.
    DontRewrite,
}

/// A disk as freshly produced by a parser, before the URI remapper has
/// run. Exists only between parse and remap (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDisk {
    pub disk: SourceDisk,
    pub origin: ParsedDiskOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_source() -> Source {
        Source {
            name: "guest1".into(),
            rename: None,
            hypervisor: Hypervisor::KVM,
            memory_bytes: 1024 * 1024,
            vcpu: 1,
            cpu_topology: CpuTopology::default(),
            cpu_vendor: None,
            cpu_model: None,
            features: HashSet::new(),
            firmware: Firmware::Unknown,
            display: None,
            video: None,
            sound: None,
            disks: vec![SourceDisk {
                id: 1,
                qemu_uri: "/tmp/disk.img".into(),
                format: Some("raw".into()),
                controller: Some(BlockBus::Ide),
            }],
            removables: Vec::new(),
            nics: Vec::new(),
        }
    }

    #[test]
    fn rejects_empty_name() {
        let mut s = minimal_source();
        s.name.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_no_disks() {
        let mut s = minimal_source();
        s.disks.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_non_dense_disk_ids() {
        let mut s = minimal_source();
        s.disks.push(SourceDisk {
            id: 3,
            qemu_uri: "/tmp/disk2.img".into(),
            format: None,
            controller: None,
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn effective_name_prefers_rename() {
        let mut s = minimal_source();
        s.rename = Some("renamed".into());
        assert_eq!(s.effective_name(), "renamed");
    }

    #[test]
    fn topology_consistency_check() {
        let topo = CpuTopology {
            sockets: Some(2),
            cores: Some(4),
            threads: Some(1),
        };
        assert!(topo.check_consistent(8).is_ok());
        assert!(topo.check_consistent(9).is_err());
    }
}
