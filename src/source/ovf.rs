//! OVF-in-OVA parser (spec.md §4.3).
//!
//! Grounded on the `vm::import` libvirt-XML event-walk technique (stack
//! of open elements + "currently building this item" state), applied to
//! OVF's `rasd`/`vssd`/`vmw` vocabulary instead of libvirt's. The
//! `other_examples` OVATool reference shows the same vocabulary from the
//! generation side (`ovf.rs`); this module reads it instead.

use std::collections::HashMap;
use std::path::PathBuf;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ConvertError, Result};
use crate::model::{
    BlockBus, Firmware, ParsedDisk, ParsedDiskOrigin, RemovableKind, Source, SourceDisk,
    SourceNic, SourceRemovable, VnetKind,
};

const RT_CPU: u32 = 3;
const RT_MEMORY: u32 = 4;
const RT_NIC: u32 = 10;
const RT_FLOPPY: u32 = 14;
const RT_CDROM_1: u32 = 15;
const RT_CDROM_2: u32 = 16;
const RT_DISK: u32 = 17;
const RT_IDE: u32 = 5;
const RT_SCSI: u32 = 6;
const RT_SATA: u32 = 20;

/// A disk compression marker (spec.md §4.3's optional `@ovf:compression`),
/// surfaced so the OVA opener can decide whether `TarOptimized` is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Identity,
    Gzip,
}

pub struct ParsedOvf {
    pub source: Source,
    pub parsed_disks: Vec<ParsedDisk>,
    /// `(href, compression)` for every disk file referenced, in parse
    /// order matching `parsed_disks`.
    pub disk_files: Vec<(String, Option<Compression>)>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Clone)]
struct RawItem {
    instance_id: Option<u32>,
    resource_type: Option<u32>,
    parent: Option<u32>,
    element_name: Option<String>,
    host_resource: Option<String>,
    resource_sub_type: Option<String>,
    virtual_quantity: Option<u64>,
    cores_per_socket: Option<u32>,
}

pub fn parse_str(xml: &str) -> Result<ParsedOvf> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut warnings = Vec::new();
    let mut element_stack: Vec<String> = Vec::new();
    let mut capture_text_for: Option<&'static str> = None;

    let mut files: HashMap<String, (String, Option<Compression>)> = HashMap::new();
    let mut disks: HashMap<String, String> = HashMap::new(); // diskId -> fileRef
    let mut firmware = Firmware::Bios;
    let mut vm_name = String::new();

    let mut items: Vec<RawItem> = Vec::new();
    let mut current_item: Option<RawItem> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let parent = element_stack.last().map(|s| s.as_str()).unwrap_or("");

                match tag.as_str() {
                    "Item" => current_item = Some(RawItem::default()),
                    "InstanceID" if current_item.is_some() => capture_text_for = Some("instance_id"),
                    "ResourceType" if current_item.is_some() => capture_text_for = Some("resource_type"),
                    "Parent" if current_item.is_some() => capture_text_for = Some("parent"),
                    "ElementName" if current_item.is_some() => capture_text_for = Some("element_name"),
                    "HostResource" if current_item.is_some() => capture_text_for = Some("host_resource"),
                    "ResourceSubType" if current_item.is_some() => capture_text_for = Some("resource_sub_type"),
                    "VirtualQuantity" if current_item.is_some() => capture_text_for = Some("virtual_quantity"),
                    "CoresPerSocket" if current_item.is_some() => capture_text_for = Some("cores_per_socket"),
                    "Name" if parent == "VirtualSystem" => capture_text_for = Some("name"),
                    _ => {}
                }
                element_stack.push(tag);
            }
            Ok(Event::Empty(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "File" => {
                        let mut id = None;
                        let mut href = None;
                        let mut compression = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.local_name().as_ref() {
                                b"id" => id = Some(attr_value(&attr)),
                                b"href" => href = Some(attr_value(&attr)),
                                b"compression" => {
                                    compression = match attr_value(&attr).as_str() {
                                        "gzip" => Some(Compression::Gzip),
                                        _ => Some(Compression::Identity),
                                    }
                                }
                                _ => {}
                            }
                        }
                        if let (Some(id), Some(href)) = (id, href) {
                            files.insert(id, (href, compression));
                        }
                    }
                    "Disk" => {
                        let mut disk_id = None;
                        let mut file_ref = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.local_name().as_ref() {
                                b"diskId" => disk_id = Some(attr_value(&attr)),
                                b"fileRef" => file_ref = Some(attr_value(&attr)),
                                _ => {}
                            }
                        }
                        if let (Some(disk_id), Some(file_ref)) = (disk_id, file_ref) {
                            disks.insert(disk_id, file_ref);
                        }
                    }
                    "Config" => {
                        let mut key = String::new();
                        let mut value = String::new();
                        for attr in e.attributes().flatten() {
                            match attr.key.local_name().as_ref() {
                                b"key" => key = attr_value(&attr),
                                b"value" => value = attr_value(&attr),
                                _ => {}
                            }
                        }
                        if key == "firmware" {
                            firmware = match value.as_str() {
                                "efi" => Firmware::Uefi,
                                "bios" => Firmware::Bios,
                                _ => Firmware::Bios,
                            };
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(target) = capture_text_for {
                    let text = String::from_utf8_lossy(t.as_ref()).trim().to_string();
                    if target == "name" {
                        vm_name = text;
                    } else if let Some(item) = current_item.as_mut() {
                        match target {
                            "instance_id" => item.instance_id = text.parse().ok(),
                            "resource_type" => item.resource_type = text.parse().ok(),
                            "parent" => item.parent = text.parse().ok(),
                            "element_name" => item.element_name = Some(text),
                            "host_resource" => item.host_resource = Some(text),
                            "resource_sub_type" => item.resource_sub_type = Some(text),
                            "virtual_quantity" => item.virtual_quantity = text.parse().ok(),
                            "cores_per_socket" => item.cores_per_socket = text.parse().ok(),
                            _ => {}
                        }
                    }
                    capture_text_for = None;
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if tag == "Item" {
                    if let Some(item) = current_item.take() {
                        items.push(item);
                    }
                }
                if element_stack.last().map(|s| s.as_str()) == Some(tag.as_str()) {
                    element_stack.pop();
                }
                capture_text_for = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConvertError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    if vm_name.is_empty() {
        return Err(ConvertError::SourceParseError {
            path: PathBuf::new(),
            message: "missing or empty VirtualSystem/Name".to_string(),
        });
    }

    let cpu_item = items.iter().find(|i| i.resource_type == Some(RT_CPU));
    let vcpu = cpu_item.and_then(|i| i.virtual_quantity).unwrap_or(1) as u32;

    let mut sockets = None;
    if let Some(cps) = cpu_item.and_then(|i| i.cores_per_socket) {
        if cps > 0 && vcpu % cps == 0 {
            sockets = Some(vcpu / cps);
        } else {
            warnings.push(format!(
                "vmw:CoresPerSocket={} does not evenly divide vcpu count {}, ignoring topology",
                cps, vcpu
            ));
        }
    }

    let memory_mib = items
        .iter()
        .find(|i| i.resource_type == Some(RT_MEMORY))
        .and_then(|i| i.virtual_quantity)
        .unwrap_or(1024);
    let memory_bytes = memory_mib * 1024 * 1024;

    let mut controllers: HashMap<u32, BlockBus> = HashMap::new();
    for item in &items {
        let bus = match item.resource_type {
            Some(RT_IDE) => Some(BlockBus::Ide),
            Some(RT_SCSI) => Some(BlockBus::Scsi),
            Some(RT_SATA) => Some(BlockBus::Sata),
            _ => None,
        };
        if let (Some(bus), Some(iid)) = (bus, item.instance_id) {
            controllers.insert(iid, bus);
        }
    }

    let mut parsed_disks = Vec::new();
    let mut disk_files = Vec::new();
    let mut next_id = 1u32;
    for item in items.iter().filter(|i| i.resource_type == Some(RT_DISK)) {
        let host_resource = item.host_resource.as_deref().unwrap_or("");
        let disk_ref = host_resource
            .strip_prefix("ovf:/disk/")
            .ok_or_else(|| ConvertError::SourceParseError {
                path: PathBuf::new(),
                message: format!("disk item HostResource {:?} is not an ovf:/disk/<id> reference", host_resource),
            })?;
        let file_ref = disks.get(disk_ref).ok_or_else(|| ConvertError::SourceParseError {
            path: PathBuf::new(),
            message: format!("no DiskSection entry for diskId {:?}", disk_ref),
        })?;
        let (href, compression) = files.get(file_ref).cloned().ok_or_else(|| ConvertError::SourceParseError {
            path: PathBuf::new(),
            message: format!("no References/File entry for fileRef {:?}", file_ref),
        })?;

        let controller = item.parent.and_then(|p| controllers.get(&p).copied());
        let disk = SourceDisk {
            id: next_id,
            qemu_uri: String::new(),
            format: None,
            controller,
        };
        next_id += 1;
        disk_files.push((href.clone(), compression));
        parsed_disks.push(ParsedDisk {
            disk,
            origin: ParsedDiskOrigin::File(PathBuf::from(href)),
        });
    }

    if parsed_disks.is_empty() {
        return Err(ConvertError::SourceParseError {
            path: PathBuf::new(),
            message: "no disk items found in VirtualHardwareSection".to_string(),
        });
    }

    let mut removables = Vec::new();
    for item in items
        .iter()
        .filter(|i| matches!(i.resource_type, Some(RT_FLOPPY) | Some(RT_CDROM_1) | Some(RT_CDROM_2)))
    {
        let kind = if item.resource_type == Some(RT_FLOPPY) {
            RemovableKind::Floppy
        } else {
            RemovableKind::Cdrom
        };
        let controller = item.parent.and_then(|p| controllers.get(&p).copied());
        removables.push(SourceRemovable {
            kind,
            controller,
            slot: None,
        });
    }

    let mut synth_eth = 0u32;
    let mut nics = Vec::new();
    for item in items.iter().filter(|i| i.resource_type == Some(RT_NIC)) {
        let vnet = match &item.element_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => {
                let name = format!("eth{}", synth_eth);
                synth_eth += 1;
                name
            }
        };
        nics.push(SourceNic {
            mac: None,
            model: item.resource_sub_type.clone(),
            vnet: vnet.clone(),
            vnet_orig: vnet,
            vnet_kind: VnetKind::Network,
            mapping_explanation: None,
        });
    }

    let source = Source {
        name: vm_name,
        rename: None,
        hypervisor: crate::model::Hypervisor::VMware,
        memory_bytes,
        vcpu,
        cpu_topology: crate::model::CpuTopology {
            sockets,
            cores: sockets.and(cpu_item.and_then(|i| i.cores_per_socket)),
            threads: sockets.map(|_| 1),
        },
        cpu_vendor: None,
        cpu_model: None,
        features: Default::default(),
        firmware,
        display: None,
        video: None,
        sound: None,
        disks: parsed_disks.iter().map(|p| p.disk.clone()).collect(),
        removables,
        nics,
    };

    Ok(ParsedOvf {
        source,
        parsed_disks,
        disk_files,
        warnings,
    })
}

fn attr_value(attr: &quick_xml::events::attributes::Attribute) -> String {
    String::from_utf8_lossy(attr.value.as_ref()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_OVF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ovf:Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1"
    xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData"
    xmlns:vssd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_VirtualSystemSettingData"
    xmlns:vmw="http://www.vmware.com/schema/ovf">
  <ovf:References>
    <ovf:File ovf:href="disk1.vmdk" ovf:id="file1" ovf:size="104857600"/>
  </ovf:References>
  <ovf:DiskSection>
    <ovf:Disk ovf:capacity="10737418240" ovf:diskId="vmdisk1" ovf:fileRef="file1"/>
  </ovf:DiskSection>
  <ovf:VirtualSystem ovf:id="vm1">
    <ovf:Name>demo-guest</ovf:Name>
    <ovf:VirtualHardwareSection>
      <vmw:Config ovf:required="false" vmw:key="firmware" vmw:value="efi"/>
      <ovf:Item>
        <rasd:InstanceID>1</rasd:InstanceID>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>4</rasd:VirtualQuantity>
        <vmw:CoresPerSocket>2</vmw:CoresPerSocket>
      </ovf:Item>
      <ovf:Item>
        <rasd:InstanceID>2</rasd:InstanceID>
        <rasd:ResourceType>4</rasd:ResourceType>
        <rasd:VirtualQuantity>2048</rasd:VirtualQuantity>
      </ovf:Item>
      <ovf:Item>
        <rasd:InstanceID>3</rasd:InstanceID>
        <rasd:ResourceType>6</rasd:ResourceType>
        <rasd:ResourceSubType>lsilogic</rasd:ResourceSubType>
      </ovf:Item>
      <ovf:Item>
        <rasd:InstanceID>4</rasd:InstanceID>
        <rasd:ResourceType>17</rasd:ResourceType>
        <rasd:Parent>3</rasd:Parent>
        <rasd:HostResource>ovf:/disk/vmdisk1</rasd:HostResource>
      </ovf:Item>
      <ovf:Item>
        <rasd:InstanceID>5</rasd:InstanceID>
        <rasd:ResourceType>10</rasd:ResourceType>
        <rasd:ElementName>NAT network</rasd:ElementName>
        <rasd:ResourceSubType>E1000</rasd:ResourceSubType>
      </ovf:Item>
    </ovf:VirtualHardwareSection>
  </ovf:VirtualSystem>
</ovf:Envelope>"#;

    #[test]
    fn parses_basic_ovf() {
        let parsed = parse_str(BASIC_OVF).unwrap();
        assert_eq!(parsed.source.name, "demo-guest");
        assert_eq!(parsed.source.vcpu, 4);
        assert_eq!(parsed.source.memory_bytes, 2048 * 1024 * 1024);
        assert_eq!(parsed.source.cpu_topology.sockets, Some(2));
        assert!(matches!(parsed.source.firmware, Firmware::Uefi));
        assert_eq!(parsed.source.disks.len(), 1);
        assert!(matches!(parsed.source.disks[0].controller, Some(BlockBus::Scsi)));
        assert_eq!(parsed.disk_files[0].0, "disk1.vmdk");
        assert_eq!(parsed.source.nics[0].vnet, "NAT network");
        assert_eq!(parsed.source.nics[0].model.as_deref(), Some("E1000"));
    }

    #[test]
    fn missing_name_is_fatal() {
        let xml = BASIC_OVF.replace("<ovf:Name>demo-guest</ovf:Name>", "<ovf:Name></ovf:Name>");
        assert!(parse_str(&xml).is_err());
    }

    #[test]
    fn missing_disk_section_entry_is_fatal() {
        let xml = BASIC_OVF.replace(
            r#"<ovf:Disk ovf:capacity="10737418240" ovf:diskId="vmdisk1" ovf:fileRef="file1"/>"#,
            "",
        );
        assert!(parse_str(&xml).is_err());
    }

    #[test]
    fn defaults_when_cpu_and_memory_items_absent() {
        let xml = BASIC_OVF
            .replace(
                r#"<ovf:Item>
        <rasd:InstanceID>1</rasd:InstanceID>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>4</rasd:VirtualQuantity>
        <vmw:CoresPerSocket>2</vmw:CoresPerSocket>
      </ovf:Item>"#,
                "",
            )
            .replace(
                r#"<ovf:Item>
        <rasd:InstanceID>2</rasd:InstanceID>
        <rasd:ResourceType>4</rasd:ResourceType>
        <rasd:VirtualQuantity>2048</rasd:VirtualQuantity>
      </ovf:Item>"#,
                "",
            );
        let parsed = parse_str(&xml).unwrap();
        assert_eq!(parsed.source.vcpu, 1);
        assert_eq!(parsed.source.memory_bytes, 1024 * 1024 * 1024);
        assert!(matches!(parsed.source.firmware, Firmware::Uefi));
    }

    #[test]
    fn nic_without_element_name_synthesizes_ethn() {
        let xml = BASIC_OVF.replace("<rasd:ElementName>NAT network</rasd:ElementName>", "");
        let parsed = parse_str(&xml).unwrap();
        assert_eq!(parsed.source.nics[0].vnet, "eth0");
    }

    #[test]
    fn invalid_cores_per_socket_warns_and_drops_topology() {
        let xml = BASIC_OVF.replace("<vmw:CoresPerSocket>2</vmw:CoresPerSocket>", "<vmw:CoresPerSocket>3</vmw:CoresPerSocket>");
        let parsed = parse_str(&xml).unwrap();
        assert_eq!(parsed.source.cpu_topology.sockets, None);
        assert_eq!(parsed.warnings.len(), 1);
    }
}
