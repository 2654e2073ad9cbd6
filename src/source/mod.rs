//! Source-ingestion parsers (spec.md §4.1-4.4): OVA archive handling,
//! libvirt domain XML, OVF-in-OVA, and VMware VMX.

pub mod libvirt_xml;
pub mod ova;
pub mod ovf;
pub mod vmx;

pub use libvirt_xml::{parse_file as parse_libvirt_xml_file, parse_str as parse_libvirt_xml_str};
pub use ova::{OvaHandle, TarByteRange};
