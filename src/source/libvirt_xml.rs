//! Libvirt domain XML parser (spec.md §4.2).
//!
//! Grounded on the teacher's `vm::import::parse_libvirt_xml_str`: a
//! `quick_xml` event-reader walk tracking an element stack and a small
//! amount of "currently inside this element" state, generalized from
//! QEMU-launch-script reconstruction to the full `Source` model.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ConvertError, Result};
use crate::model::{
    BlockBus, CpuTopology, Display, DisplayType, Firmware, Hypervisor, ListenPolicy, ParsedDisk,
    ParsedDiskOrigin, RemovableKind, Source, SourceDisk, SourceNic, SourceRemovable, VnetKind,
};

/// Resolves a libvirt storage-pool volume reference to a backing path.
/// The real implementation talks to a live libvirt connection; that is
/// outside this crate's scope (spec.md §1), so callers without one may
/// pass [`NullVolumeResolver`], which always fails with
/// `UnsupportedSource`.
pub trait VolumeResolver {
    fn resolve(&self, pool: &str, volume: &str) -> Result<PathBuf>;
}

pub struct NullVolumeResolver;

impl VolumeResolver for NullVolumeResolver {
    fn resolve(&self, pool: &str, volume: &str) -> Result<PathBuf> {
        Err(ConvertError::UnsupportedSource(format!(
            "volume disk {}/{} requires a live libvirt connection to resolve, none provided",
            pool, volume
        )))
    }
}

pub struct ParsedLibvirtXml {
    pub source: Source,
    pub parsed_disks: Vec<ParsedDisk>,
}

pub fn parse_file(path: &Path, resolver: &dyn VolumeResolver) -> Result<ParsedLibvirtXml> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content, resolver)
}

pub fn parse_str(xml: &str, resolver: &dyn VolumeResolver) -> Result<ParsedLibvirtXml> {
    let virtio_scsi = domain_has_virtio_scsi_controller(xml)?;
    parse_inner(xml, resolver, virtio_scsi)
}

/// First pass: does the domain declare `<controller type='scsi'
/// model='virtio-scsi'>`? Needed before disks are processed since a
/// `target/@bus='scsi'` disk's final controller depends on it
/// (spec.md §4.2).
fn domain_has_virtio_scsi_controller(xml: &str) -> Result<bool> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut found = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"controller" {
                    let mut is_scsi = false;
                    let mut is_virtio = false;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"type" if attr_value(&attr) == "scsi" => is_scsi = true,
                            b"model" if attr_value(&attr) == "virtio-scsi" => is_virtio = true,
                            _ => {}
                        }
                    }
                    if is_scsi && is_virtio {
                        found = true;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConvertError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(found)
}

fn parse_graphics_attrs(e: &quick_xml::events::BytesStart) -> GraphicsBuilder {
    let mut builder = GraphicsBuilder {
        gtype: String::new(),
        keymap: None,
        password: None,
        port: None,
        listen: ListenPolicy::None,
    };
    for attr in e.attributes().flatten() {
        let v = attr_value(&attr);
        match attr.key.as_ref() {
            b"type" => builder.gtype = v,
            b"keymap" => builder.keymap = Some(v),
            b"passwd" => builder.password = Some(v),
            b"port" => builder.port = v.parse().ok(),
            // legacy single-attribute listen form
            b"listen" if !v.is_empty() => builder.listen = ListenPolicy::Address(v),
            _ => {}
        }
    }
    builder
}

fn apply_listen_attrs(e: &quick_xml::events::BytesStart, g: &mut GraphicsBuilder) {
    let mut ltype = String::new();
    let mut address = None;
    let mut network = None;
    let mut socket = None;
    for attr in e.attributes().flatten() {
        let v = attr_value(&attr);
        match attr.key.as_ref() {
            b"type" => ltype = v,
            b"address" => address = Some(v),
            b"network" => network = Some(v),
            b"socket" => socket = Some(v),
            _ => {}
        }
    }
    g.listen = match ltype.as_str() {
        "address" => ListenPolicy::Address(address.unwrap_or_default()),
        "network" => ListenPolicy::Network(network.unwrap_or_default()),
        "socket" => ListenPolicy::Socket(socket.map(PathBuf::from)),
        "none" => ListenPolicy::ExplicitNone,
        _ => ListenPolicy::None,
    };
}

fn controller_for_bus(bus: &str, virtio_scsi: bool) -> Option<BlockBus> {
    match bus {
        "virtio" => Some(BlockBus::VirtioBlk),
        "ide" => Some(BlockBus::Ide),
        "sata" => Some(BlockBus::Sata),
        "scsi" => Some(if virtio_scsi {
            BlockBus::VirtioSCSI
        } else {
            BlockBus::Scsi
        }),
        _ => None,
    }
}

/// Strip a recognized device-name prefix (`hd|sd|vd|xvd|fd`) and parse
/// the tail as a 0-based drive index (`a`=0, `b`=1, ...), per spec.md §4.2.
fn slot_from_target_dev(dev: &str) -> Option<u32> {
    for prefix in ["xvd", "hd", "sd", "vd", "fd"] {
        if let Some(tail) = dev.strip_prefix(prefix) {
            if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_lowercase()) {
                // multi-letter tails (aa, ab, ...) follow base-26 after 'z'
                let mut index: u32 = 0;
                for c in tail.chars() {
                    index = index * 26 + (c as u32 - 'a' as u32 + 1);
                }
                return Some(index - 1);
            }
        }
    }
    None
}

struct RawDisk {
    device: String,
    disk_type: String,
    bus: String,
    source_file: Option<String>,
    source_dev: Option<String>,
    source_protocol: Option<String>,
    source_host: Option<String>,
    source_port: Option<String>,
    source_pool: Option<String>,
    source_volume: Option<String>,
    target_dev: Option<String>,
}

impl RawDisk {
    fn new() -> Self {
        Self {
            device: String::new(),
            disk_type: String::new(),
            bus: String::new(),
            source_file: None,
            source_dev: None,
            source_protocol: None,
            source_host: None,
            source_port: None,
            source_pool: None,
            source_volume: None,
            target_dev: None,
        }
    }
}

struct GraphicsBuilder {
    gtype: String,
    keymap: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    listen: ListenPolicy,
}

struct RawNic {
    mac: Option<String>,
    model: Option<String>,
    if_type: String,
    bridge_or_network: Option<String>,
}

#[allow(clippy::too_many_lines)]
fn parse_inner(xml: &str, resolver: &dyn VolumeResolver, virtio_scsi: bool) -> Result<ParsedLibvirtXml> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut domain_type: Option<String> = None;
    let mut name = String::new();
    let mut memory_bytes: Option<u64> = None;
    let mut memory_unit = "KiB".to_string();
    let mut vcpu: Option<u32> = None;
    let mut topology = CpuTopology::default();

    let mut graphics_seen = false;
    let mut display: Option<Display> = None;
    let mut current_graphics: Option<GraphicsBuilder> = None;

    let mut element_stack: Vec<String> = Vec::new();
    let mut capture_text_for: Option<&'static str> = None;

    let mut raw_disks: Vec<RawDisk> = Vec::new();
    let mut current_disk: Option<RawDisk> = None;

    let mut raw_removables: Vec<RawDisk> = Vec::new();

    let mut raw_nics: Vec<RawNic> = Vec::new();
    let mut current_nic: Option<RawNic> = None;

    // Finalize a `<graphics>` element into `display`, whether it was
    // self-closing (handled right after the Empty event) or wrapped a
    // `<listen>` child (handled at the matching End event).
    macro_rules! finalize_graphics {
        () => {
            if let Some(g) = current_graphics.take() {
                if !graphics_seen {
                    graphics_seen = true;
                    display = match g.gtype.as_str() {
                        "vnc" => Some(Display {
                            display_type: DisplayType::Vnc,
                            keymap: g.keymap,
                            password: g.password,
                            listen: g.listen,
                            port: g.port,
                        }),
                        "spice" => Some(Display {
                            display_type: DisplayType::Spice,
                            keymap: g.keymap,
                            password: g.password,
                            listen: g.listen,
                            port: g.port,
                        }),
                        _ => None,
                    };
                }
            }
        };
    }

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let parent = element_stack.last().map(|s| s.as_str()).unwrap_or("");

                match tag.as_str() {
                    "domain" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"type" {
                                domain_type = Some(attr_value(&attr));
                            }
                        }
                    }
                    "name" if parent == "domain" => {
                        capture_text_for = Some("name");
                    }
                    "memory" | "currentMemory" if parent == "domain" => {
                        if memory_bytes.is_none() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"unit" {
                                    memory_unit = attr_value(&attr);
                                }
                            }
                            capture_text_for = Some("memory");
                        }
                    }
                    "vcpu" if parent == "domain" => {
                        capture_text_for = Some("vcpu");
                    }
                    "disk" => {
                        let mut d = RawDisk::new();
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"device" => d.device = attr_value(&attr),
                                b"type" => d.disk_type = attr_value(&attr),
                                _ => {}
                            }
                        }
                        current_disk = Some(d);
                    }
                    "graphics" if !graphics_seen => {
                        current_graphics = Some(parse_graphics_attrs(e));
                    }
                    "interface" => {
                        let mut if_type = String::new();
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"type" {
                                if_type = attr_value(&attr);
                            }
                        }
                        current_nic = Some(RawNic {
                            mac: None,
                            model: None,
                            if_type,
                            bridge_or_network: None,
                        });
                    }
                    _ => {}
                }

                element_stack.push(tag);
            }
            Ok(Event::Empty(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let parent = element_stack.last().map(|s| s.as_str()).unwrap_or("");

                match tag.as_str() {
                    "topology" if parent == "cpu" => {
                        for attr in e.attributes().flatten() {
                            let v = attr_value(&attr).parse::<u32>().ok();
                            match attr.key.as_ref() {
                                b"sockets" => topology.sockets = v,
                                b"cores" => topology.cores = v,
                                b"threads" => topology.threads = v,
                                _ => {}
                            }
                        }
                    }
                    "source" if current_disk.is_some() => {
                        let d = current_disk.as_mut().unwrap();
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"file" => d.source_file = Some(attr_value(&attr)),
                                b"dev" => d.source_dev = Some(attr_value(&attr)),
                                b"protocol" => d.source_protocol = Some(attr_value(&attr)),
                                b"host" | b"name" if d.disk_type == "network" => {
                                    d.source_host = Some(attr_value(&attr))
                                }
                                b"port" => d.source_port = Some(attr_value(&attr)),
                                b"pool" => d.source_pool = Some(attr_value(&attr)),
                                b"volume" => d.source_volume = Some(attr_value(&attr)),
                                _ => {}
                            }
                        }
                    }
                    "target" if current_disk.is_some() => {
                        let d = current_disk.as_mut().unwrap();
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"bus" => d.bus = attr_value(&attr),
                                b"dev" => d.target_dev = Some(attr_value(&attr)),
                                _ => {}
                            }
                        }
                    }
                    "graphics" if !graphics_seen => {
                        current_graphics = Some(parse_graphics_attrs(e));
                        finalize_graphics!();
                    }
                    "listen" if current_graphics.is_some() => {
                        if let Some(g) = current_graphics.as_mut() {
                            apply_listen_attrs(e, g);
                        }
                    }
                    "mac" if current_nic.is_some() => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"address" {
                                current_nic.as_mut().unwrap().mac = Some(attr_value(&attr));
                            }
                        }
                    }
                    "model" if current_nic.is_some() => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"type" {
                                current_nic.as_mut().unwrap().model = Some(attr_value(&attr));
                            }
                        }
                    }
                    "source" if current_nic.is_some() => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"bridge" || attr.key.as_ref() == b"network" {
                                current_nic.as_mut().unwrap().bridge_or_network =
                                    Some(attr_value(&attr));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(target) = capture_text_for {
                    let text = String::from_utf8_lossy(t.as_ref()).trim().to_string();
                    match target {
                        "name" => name = text,
                        "memory" => {
                            if let Ok(v) = text.parse::<u64>() {
                                memory_bytes = Some(convert_memory_to_bytes(v, &memory_unit));
                            }
                        }
                        "vcpu" => vcpu = text.parse::<u32>().ok(),
                        _ => {}
                    }
                    capture_text_for = None;
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if tag == "disk" {
                    if let Some(d) = current_disk.take() {
                        if d.device == "cdrom" || d.device == "floppy" {
                            raw_removables.push(d);
                        } else {
                            raw_disks.push(d);
                        }
                    }
                }
                if tag == "interface" {
                    if let Some(n) = current_nic.take() {
                        raw_nics.push(n);
                    }
                }
                if tag == "graphics" {
                    finalize_graphics!();
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

    let domain_type = domain_type.ok_or_else(|| ConvertError::SourceParseError {
        path: PathBuf::new(),
        message: "missing required /domain/@type attribute".to_string(),
    })?;
    let hypervisor = Hypervisor::from_libvirt_domain_type(&domain_type);

    if name.is_empty() {
        return Err(ConvertError::SourceParseError {
            path: PathBuf::new(),
            message: "empty or missing <name>".to_string(),
        });
    }

    let vcpu = vcpu.unwrap_or_else(|| {
        match (topology.sockets, topology.cores, topology.threads) {
            (Some(s), Some(c), Some(t)) => s * c * t,
            _ => 1,
        }
    });

    let memory_bytes = memory_bytes.unwrap_or(1024 * 1024);

    let mut parsed_disks = Vec::new();
    for (idx, d) in raw_disks.iter().enumerate() {
        let id = (idx as u32) + 1;
        let controller = controller_for_bus(&d.bus, virtio_scsi);

        let (disk, origin) = match d.disk_type.as_str() {
            "block" => {
                let dev = d.source_dev.clone().ok_or_else(|| ConvertError::SourceParseError {
                    path: PathBuf::new(),
                    message: format!("disk {} has type='block' but no source/@dev", id),
                })?;
                (
                    SourceDisk {
                        id,
                        qemu_uri: String::new(),
                        format: None,
                        controller,
                    },
                    ParsedDiskOrigin::BlockDev(PathBuf::from(dev)),
                )
            }
            "file" => {
                let file = d.source_file.clone().ok_or_else(|| ConvertError::SourceParseError {
                    path: PathBuf::new(),
                    message: format!("disk {} has type='file' but no source/@file", id),
                })?;
                (
                    SourceDisk {
                        id,
                        qemu_uri: String::new(),
                        format: None,
                        controller,
                    },
                    ParsedDiskOrigin::File(PathBuf::from(file)),
                )
            }
            "network" => {
                let protocol = d.source_protocol.clone().unwrap_or_default();
                let host = d.source_host.clone().unwrap_or_default();
                if protocol != "nbd" || host != "localhost" {
                    return Err(ConvertError::UnsupportedSource(format!(
                        "network disk with protocol={:?} host={:?} is not supported (only nbd:localhost)",
                        protocol, host
                    )));
                }
                let port = d.source_port.clone().unwrap_or_else(|| "10809".to_string());
                (
                    SourceDisk {
                        id,
                        qemu_uri: format!("nbd:{}:{}", host, port),
                        format: None,
                        controller,
                    },
                    ParsedDiskOrigin::DontRewrite,
                )
            }
            "volume" => {
                let pool = d.source_pool.clone().unwrap_or_default();
                let volume = d.source_volume.clone().unwrap_or_default();
                let path = resolver.resolve(&pool, &volume)?;
                (
                    SourceDisk {
                        id,
                        qemu_uri: String::new(),
                        format: None,
                        controller,
                    },
                    ParsedDiskOrigin::File(path),
                )
            }
            other => {
                return Err(ConvertError::UnsupportedSource(format!(
                    "disk type {:?} is not supported",
                    other
                )))
            }
        };
        parsed_disks.push(ParsedDisk { disk, origin });
    }

    if parsed_disks.is_empty() {
        return Err(ConvertError::SourceParseError {
            path: PathBuf::new(),
            message: "no non-removable disk found".to_string(),
        });
    }

    let mut removables = Vec::new();
    for d in &raw_removables {
        let kind = if d.device == "cdrom" {
            RemovableKind::Cdrom
        } else {
            RemovableKind::Floppy
        };
        let controller = controller_for_bus(&d.bus, virtio_scsi);
        let slot = d.target_dev.as_deref().and_then(slot_from_target_dev);
        removables.push(SourceRemovable {
            kind,
            controller,
            slot,
        });
    }

    let mut synth_eth = 0u32;
    let mut nics = Vec::new();
    for n in raw_nics {
        let mac = n.mac.filter(|m| m != "00:00:00:00:00:00");
        let vnet_kind = if n.if_type == "network" {
            VnetKind::Network
        } else {
            VnetKind::Bridge
        };
        let vnet = match n.bridge_or_network {
            Some(v) if !v.is_empty() => v,
            _ => {
                let name = format!("eth{}", synth_eth);
                synth_eth += 1;
                name
            }
        };
        nics.push(SourceNic {
            mac,
            model: n.model,
            vnet: vnet.clone(),
            vnet_orig: vnet,
            vnet_kind,
            mapping_explanation: None,
        });
    }

    let source = Source {
        name: name.clone(),
        rename: None,
        hypervisor,
        memory_bytes,
        vcpu,
        cpu_topology: topology,
        cpu_vendor: None,
        cpu_model: None,
        features: HashSet::new(),
        firmware: Firmware::Unknown,
        display,
        video: None,
        sound: None,
        disks: parsed_disks.iter().map(|p| p.disk.clone()).collect(),
        removables,
        nics,
    };

    Ok(ParsedLibvirtXml {
        source,
        parsed_disks,
    })
}

fn convert_memory_to_bytes(value: u64, unit: &str) -> u64 {
    let multiplier: u64 = match unit.to_lowercase().as_str() {
        "b" | "bytes" => 1,
        "kib" | "k" | "kb" => 1024,
        "mib" | "m" | "mb" => 1024 * 1024,
        "gib" | "g" | "gb" => 1024 * 1024 * 1024,
        _ => 1024,
    };
    value * multiplier
}

fn attr_value(attr: &quick_xml::events::attributes::Attribute) -> String {
    String::from_utf8_lossy(attr.value.as_ref()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_XML: &str = r#"<domain type='kvm'>
  <name>fedora-guest</name>
  <memory unit='KiB'>1048576</memory>
  <vcpu>2</vcpu>
  <devices>
    <disk type='file' device='disk'>
      <source file='/var/lib/libvirt/images/fedora.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <source file='/iso/fedora.iso'/>
      <target dev='hdc' bus='ide'/>
    </disk>
    <interface type='bridge'>
      <mac address='52:54:00:01:02:03'/>
      <source bridge='virbr0'/>
      <model type='virtio'/>
    </interface>
    <graphics type='vnc' port='-1'/>
  </devices>
</domain>"#;

    #[test]
    fn parses_basic_domain() {
        let parsed = parse_str(BASIC_XML, &NullVolumeResolver).unwrap();
        assert_eq!(parsed.source.name, "fedora-guest");
        assert_eq!(parsed.source.vcpu, 2);
        assert_eq!(parsed.source.memory_bytes, 1024 * 1024 * 1024);
        assert_eq!(parsed.source.disks.len(), 1);
        assert_eq!(parsed.source.disks[0].id, 1);
        assert!(matches!(
            parsed.source.disks[0].controller,
            Some(BlockBus::VirtioBlk)
        ));
        assert_eq!(parsed.source.removables.len(), 1);
        assert_eq!(parsed.source.removables[0].slot, Some(2));
        assert_eq!(parsed.source.nics.len(), 1);
        assert_eq!(parsed.source.nics[0].vnet, "virbr0");
        assert_eq!(parsed.source.nics[0].mac.as_deref(), Some("52:54:00:01:02:03"));
    }

    #[test]
    fn empty_name_is_fatal() {
        let xml = BASIC_XML.replace("<name>fedora-guest</name>", "<name></name>");
        assert!(parse_str(&xml, &NullVolumeResolver).is_err());
    }

    #[test]
    fn no_disk_is_fatal() {
        let xml = BASIC_XML.replace(
            r#"<disk type='file' device='disk'>
      <source file='/var/lib/libvirt/images/fedora.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>"#,
            "",
        );
        assert!(parse_str(&xml, &NullVolumeResolver).is_err());
    }

    #[test]
    fn zero_mac_is_treated_as_absent() {
        let xml = BASIC_XML.replace(
            "52:54:00:01:02:03",
            "00:00:00:00:00:00",
        );
        let parsed = parse_str(&xml, &NullVolumeResolver).unwrap();
        assert!(parsed.source.nics[0].mac.is_none());
    }

    #[test]
    fn empty_bridge_synthesizes_ethn() {
        let xml = BASIC_XML.replace("bridge='virbr0'", "bridge=''");
        let parsed = parse_str(&xml, &NullVolumeResolver).unwrap();
        assert_eq!(parsed.source.nics[0].vnet, "eth0");
    }

    #[test]
    fn scsi_bus_without_virtio_controller_is_plain_scsi() {
        let xml = BASIC_XML.replace("bus='virtio'", "bus='scsi'");
        let parsed = parse_str(&xml, &NullVolumeResolver).unwrap();
        assert!(matches!(parsed.source.disks[0].controller, Some(BlockBus::Scsi)));
    }

    #[test]
    fn scsi_bus_with_virtio_scsi_controller_upgrades() {
        let xml = BASIC_XML
            .replace("bus='virtio'", "bus='scsi'")
            .replace(
                "<devices>",
                "<devices>\n    <controller type='scsi' model='virtio-scsi'/>",
            );
        let parsed = parse_str(&xml, &NullVolumeResolver).unwrap();
        assert!(matches!(
            parsed.source.disks[0].controller,
            Some(BlockBus::VirtioSCSI)
        ));
    }

    #[test]
    fn unsupported_display_falls_back_to_none_with_no_error() {
        let xml = BASIC_XML.replace("<graphics type='vnc' port='-1'/>", "<graphics type='sdl'/>");
        let parsed = parse_str(&xml, &NullVolumeResolver).unwrap();
        assert!(parsed.source.display.is_none());
    }

    #[test]
    fn missing_vcpu_derives_from_topology() {
        let xml = BASIC_XML.replace(
            "<vcpu>2</vcpu>",
            "<cpu><topology sockets='2' cores='2' threads='1'/></cpu>",
        );
        let parsed = parse_str(&xml, &NullVolumeResolver).unwrap();
        assert_eq!(parsed.source.vcpu, 4);
    }

    #[test]
    fn missing_vcpu_and_topology_defaults_to_one() {
        let xml = BASIC_XML.replace("<vcpu>2</vcpu>", "");
        let parsed = parse_str(&xml, &NullVolumeResolver).unwrap();
        assert_eq!(parsed.source.vcpu, 1);
    }

    #[test]
    fn slot_parsing_handles_multi_letter_tails() {
        assert_eq!(slot_from_target_dev("sda"), Some(0));
        assert_eq!(slot_from_target_dev("sdz"), Some(25));
        assert_eq!(slot_from_target_dev("sdaa"), Some(26));
    }
}
