//! Network mapper (spec.md §4.8).
//!
//! Applies a [`NetworkMap`] to each `SourceNic` of a `Source`, recording
//! the resolution it fired as a user-visible `mapping_explanation`.
//! Grounded on the same `model::network_map` module this builds on; no
//! teacher counterpart (the teacher manages already-running local VMs,
//! not network-mapped migration NICs).

use crate::model::{NetworkMap, Resolution, Source, VnetKind};

/// Resolve every NIC of `source` against `map`, mutating `vnet`/`vnet_kind`
/// and setting `mapping_explanation` in place.
pub fn apply(source: &mut Source, map: &NetworkMap) {
    for nic in &mut source.nics {
        let resolution = map.resolve(nic.mac.as_deref(), &nic.vnet_orig, nic.vnet_kind);
        nic.mapping_explanation = Some(explain(nic.mac.as_deref(), &nic.vnet_orig, &resolution));

        match resolution {
            Resolution::Mac { vnet, kind } => {
                nic.vnet = vnet;
                nic.vnet_kind = kind;
            }
            Resolution::InputName { vnet } | Resolution::Default { vnet } => {
                nic.vnet = vnet;
            }
            Resolution::Unchanged => {}
        }
    }
}

fn explain(mac: Option<&str>, vnet_orig: &str, resolution: &Resolution) -> String {
    match resolution {
        Resolution::Mac { vnet, kind } => format!(
            "MAC {} mapped to {} {}",
            mac.unwrap_or("<none>"),
            kind_label(*kind),
            vnet
        ),
        Resolution::InputName { vnet } => format!("{} mapped to {}", vnet_orig, vnet),
        Resolution::Default { vnet } => format!("{} mapped to default {}", vnet_orig, vnet),
        Resolution::Unchanged => format!("{} left unchanged (no matching rule)", vnet_orig),
    }
}

fn kind_label(kind: VnetKind) -> &'static str {
    match kind {
        VnetKind::Bridge => "bridge",
        VnetKind::Network => "network",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CpuTopology, Firmware, Hypervisor, SourceDisk, SourceNic,
    };
    use std::collections::HashSet;

    fn source_with_nic(nic: SourceNic) -> Source {
        Source {
            name: "vm1".to_string(),
            rename: None,
            hypervisor: Hypervisor::KVM,
            memory_bytes: 1024 * 1024 * 1024,
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
                qemu_uri: "/tmp/disk.qcow2".to_string(),
                format: Some("qcow2".to_string()),
                controller: None,
            }],
            removables: vec![],
            nics: vec![nic],
        }
    }

    fn nic(mac: Option<&str>, vnet: &str, kind: VnetKind) -> SourceNic {
        SourceNic {
            mac: mac.map(str::to_string),
            model: None,
            vnet: vnet.to_string(),
            vnet_orig: vnet.to_string(),
            vnet_kind: kind,
            mapping_explanation: None,
        }
    }

    #[test]
    fn mac_rule_overrides_kind_and_name() {
        let mut map = NetworkMap::new();
        map.add_mac_rule("52:54:00:01:02:03", VnetKind::Network, "nancy")
            .unwrap();
        let mut source = source_with_nic(nic(
            Some("52:54:00:01:02:03"),
            "virbr0",
            VnetKind::Bridge,
        ));
        apply(&mut source, &map);
        let nic = &source.nics[0];
        assert_eq!(nic.vnet, "nancy");
        assert_eq!(nic.vnet_kind, VnetKind::Network);
        assert!(nic.mapping_explanation.as_ref().unwrap().contains("MAC"));
    }

    #[test]
    fn default_network_applies_when_no_mac_or_name_rule() {
        let mut map = NetworkMap::new();
        map.set_default_network("default").unwrap();
        let mut source = source_with_nic(nic(None, "anything", VnetKind::Network));
        apply(&mut source, &map);
        assert_eq!(source.nics[0].vnet, "default");
    }

    #[test]
    fn unchanged_keeps_original_vnet() {
        let map = NetworkMap::new();
        let mut source = source_with_nic(nic(None, "virbr0", VnetKind::Bridge));
        apply(&mut source, &map);
        assert_eq!(source.nics[0].vnet, "virbr0");
        assert!(source.nics[0]
            .mapping_explanation
            .as_ref()
            .unwrap()
            .contains("unchanged"));
    }
}
