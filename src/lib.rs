//! Core conversion engine that migrates powered-off Xen/VMware-ESXi/
//! vCenter/KVM-libvirt/OVA guests to run natively on KVM/QEMU.
//!
//! The CLI front-end (`src/bin/v2kvm.rs`) is a thin driver over
//! [`pipeline::run`]: parse arguments into a [`request::ConvertRequest`],
//! wire up an [`inspector::FsInspector`] and a [`copier::Copier`], and
//! report the result. Everything else — source parsing, URI remapping,
//! network mapping, per-OS conversion, target metadata — lives in this
//! library so it can be driven identically from tests.

pub mod config;
pub mod convert;
pub mod copier;
pub mod error;
pub mod inspector;
pub mod model;
pub mod netmap;
pub mod pipeline;
pub mod remap;
pub mod request;
pub mod source;
pub mod subprocess;
pub mod target;
