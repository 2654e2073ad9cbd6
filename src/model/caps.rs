use serde::{Deserialize, Serialize};

use super::source::BlockBus;

/// Optional preferences from the caller (spec.md §3). Honored by the
/// per-OS converter if the underlying guest supports them; if a requested
/// capability is unsupported, the converter emits an error rather than
/// silently downgrading (spec.md §4.6, §7 `NoMatchingDriver`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestedGuestCaps {
    pub block_bus: Option<BlockBus>,
    pub net_bus: Option<NetBus>,
    pub video: Option<VideoModel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetBus {
    VirtioNet,
    E1000,
    Rtl8139,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoModel {
    Qxl,
    Cirrus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineType {
    I440fx,
    Q35,
    Virt,
}

/// The negotiated result of capability selection (spec.md §3, §4.6).
///
/// Invariant: every boolean capability is `true` only when the converter
/// actually verified kernel/driver support for it; negotiation never sets
/// a capability optimistically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestCaps {
    /// Only `Ide`, `VirtioBlk`, or `VirtioSCSI` are ever produced here,
    /// despite `BlockBus` also covering `Scsi`/`Sata` for source disks.
    pub block_bus: BlockBus,
    pub net_bus: NetBus,
    pub video: VideoModel,
    pub machine: MachineType,
    pub arch: String,
    pub acpi: bool,
    pub virtio_rng: bool,
    pub virtio_balloon: bool,
    pub isa_pvpanic: bool,
}

impl GuestCaps {
    /// A conservative capability set with nothing virtio-backed, used as
    /// the negotiation starting point before kernel/driver probing.
    pub fn minimal(arch: impl Into<String>) -> Self {
        Self {
            block_bus: BlockBus::Ide,
            net_bus: NetBus::Rtl8139,
            video: VideoModel::Cirrus,
            machine: MachineType::I440fx,
            arch: arch.into(),
            acpi: true,
            virtio_rng: false,
            virtio_balloon: false,
            isa_pvpanic: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_caps_have_no_virtio() {
        let caps = GuestCaps::minimal("x86_64");
        assert!(matches!(caps.block_bus, BlockBus::Ide));
        assert!(matches!(caps.net_bus, NetBus::Rtl8139));
        assert!(!caps.virtio_rng);
        assert!(!caps.virtio_balloon);
    }
}
