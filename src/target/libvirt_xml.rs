//! Libvirt domain XML target writer (spec.md §4.9).
//!
//! Hand-built via `format!`/`write!`, mirroring the teacher's
//! `vm::import` string-assembly style for QEMU launch arguments — a
//! writer only needs the inverse of `source::libvirt_xml`'s event-reader
//! walk, not a generic XML-tree builder.

use std::fmt::Write as _;

use crate::model::{BlockBus, GuestCaps, ListenPolicy, Source};
use crate::target::{assign_dev_names, bus_prefix, libvirt_driver_type, TargetBuses, Targets};

/// Render the libvirt domain XML for `source` (spec.md §4.9).
pub fn write(source: &Source, targets: &Targets, buses: &TargetBuses, caps: &GuestCaps) -> String {
    let mut xml = String::new();
    let memory_kib = source.memory_bytes / 1024;

    writeln!(xml, "<domain type='kvm'>").unwrap();
    writeln!(xml, "  <name>{}</name>", escape(source.effective_name())).unwrap();
    writeln!(xml, "  <memory unit='KiB'>{}</memory>", memory_kib).unwrap();
    writeln!(xml, "  <currentMemory unit='KiB'>{}</currentMemory>", memory_kib).unwrap();
    writeln!(xml, "  <vcpu>{}</vcpu>", source.vcpu).unwrap();

    writeln!(xml, "  <os>").unwrap();
    writeln!(xml, "    <type arch='{}' machine='{}'>hvm</type>", caps.arch, machine_str(caps)).unwrap();
    writeln!(xml, "  </os>").unwrap();

    writeln!(xml, "  <features>").unwrap();
    if caps.acpi {
        writeln!(xml, "    <acpi/>").unwrap();
    }
    writeln!(xml, "  </features>").unwrap();

    writeln!(xml, "  <devices>").unwrap();
    let dev_names = assign_dev_names(&buses.disk_buses);
    for ((file, bus), dev) in targets
        .disk_files
        .iter()
        .zip(buses.disk_buses.iter())
        .zip(dev_names.iter())
    {
        let format = if *bus == BlockBus::Ide { "raw" } else { "qcow2" };
        writeln!(xml, "    <disk type='file' device='disk'>").unwrap();
        writeln!(
            xml,
            "      <driver name='qemu' type='{}' cache='none'/>",
            libvirt_driver_type(format)
        )
        .unwrap();
        writeln!(xml, "      <source file='{}'/>", escape(&file.to_string_lossy())).unwrap();
        writeln!(
            xml,
            "      <target dev='{}' bus='{}'/>",
            dev,
            libvirt_bus_name(*bus)
        )
        .unwrap();
        writeln!(xml, "    </disk>").unwrap();
    }

    for nic in &source.nics {
        writeln!(xml, "    <interface type='network'>").unwrap();
        if let Some(mac) = &nic.mac {
            writeln!(xml, "      <mac address='{}'/>", escape(mac)).unwrap();
        }
        writeln!(xml, "      <source network='{}'/>", escape(&nic.vnet)).unwrap();
        writeln!(xml, "      <model type='{}'/>", net_model_name(caps)).unwrap();
        writeln!(xml, "    </interface>").unwrap();
    }

    if let Some(display) = &source.display {
        write_graphics(&mut xml, display);
    }

    writeln!(xml, "    <input type='tablet' bus='usb'/>").unwrap();
    writeln!(xml, "    <input type='mouse' bus='ps2'/>").unwrap();
    writeln!(xml, "    <console type='pty'/>").unwrap();
    writeln!(xml, "  </devices>").unwrap();
    writeln!(xml, "</domain>").unwrap();
    xml
}

fn write_graphics(xml: &mut String, display: &crate::model::Display) {
    let type_name = match display.display_type {
        crate::model::DisplayType::Vnc => "vnc",
        crate::model::DisplayType::Spice => "spice",
        crate::model::DisplayType::Window => return,
    };
    match &display.listen {
        ListenPolicy::Socket(_) => {
            // Downgraded per SPEC_FULL.md §11: the listen element is
            // omitted but the rest of the display block is kept.
            writeln!(xml, "    <graphics type='{}'/>", type_name).unwrap();
        }
        ListenPolicy::Address(addr) => {
            writeln!(xml, "    <graphics type='{}' listen='{}'/>", type_name, escape(addr)).unwrap();
        }
        ListenPolicy::Network(_) | ListenPolicy::None | ListenPolicy::ExplicitNone => {
            writeln!(xml, "    <graphics type='{}'/>", type_name).unwrap();
        }
    }
}

fn libvirt_bus_name(bus: BlockBus) -> &'static str {
    match bus {
        BlockBus::VirtioBlk => "virtio",
        BlockBus::VirtioSCSI => "scsi",
        BlockBus::Scsi => "scsi",
        BlockBus::Sata => "sata",
        BlockBus::Ide => "ide",
    }
}

fn net_model_name(caps: &GuestCaps) -> &'static str {
    match caps.net_bus {
        crate::model::NetBus::VirtioNet => "virtio",
        crate::model::NetBus::E1000 => "e1000",
        crate::model::NetBus::Rtl8139 => "rtl8139",
    }
}

fn machine_str(caps: &GuestCaps) -> &'static str {
    match caps.machine {
        crate::model::MachineType::I440fx => "pc",
        crate::model::MachineType::Q35 => "q35",
        crate::model::MachineType::Virt => "virt",
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}
