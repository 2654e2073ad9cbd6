//! URI remapper (spec.md §4.5).
//!
//! Rewrites a `ParsedDisk`'s `origin` into the `qemu_uri` (and sometimes
//! `format` override) the copy engine understands, according to the
//! transport the source disk was actually reached through. Grounded on
//! the pack's `LNVPS-api::proxmox` (`reqwest` client-builder idiom) and
//! `LNVPS-api::ssh_client` (`ssh2::Session` over a raw socket) reference
//! examples — the teacher has no networked transport of its own.

mod esx_https;
mod vddk;
mod xen_ssh;

use std::path::Path;

use crate::error::Result;
use crate::model::{ParsedDisk, ParsedDiskOrigin, SourceDisk};

pub use esx_https::{clear_proxy_env, EsxHttpsTransport};
pub use vddk::VddkTransport;
pub use xen_ssh::XenSshTransport;

/// How a `ParsedDisk`'s bytes are actually reached (spec.md §4.5).
pub enum Transport {
    Local,
    EsxHttps(EsxHttpsTransport),
    XenSsh(XenSshTransport),
    Vddk(VddkTransport),
}

/// Rewrite one `ParsedDisk` in place, producing its final `SourceDisk`.
/// `origin = DontRewrite` (already a final URI, e.g. an inline `nbd:`
/// disk from the libvirt-XML parser) is returned untouched.
pub fn remap(parsed: &ParsedDisk, transport: &Transport) -> Result<SourceDisk> {
    let mut disk = parsed.disk.clone();

    match &parsed.origin {
        ParsedDiskOrigin::DontRewrite => {}
        ParsedDiskOrigin::BlockDev(path) | ParsedDiskOrigin::File(path) => match transport {
            Transport::Local => {
                disk.qemu_uri = local_uri(path);
            }
            Transport::EsxHttps(t) => {
                let (uri, format) = t.remap(path)?;
                disk.qemu_uri = uri;
                disk.format = Some(format);
            }
            Transport::XenSsh(t) => {
                disk.qemu_uri = t.remap(path);
            }
            Transport::Vddk(t) => {
                disk.qemu_uri = t.remap()?;
                disk.format = Some("raw".to_string());
            }
        },
    }

    Ok(disk)
}

fn local_uri(path: &Path) -> String {
    match std::fs::canonicalize(path) {
        Ok(abs) => abs.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockBus;

    fn disk(id: u32) -> SourceDisk {
        SourceDisk {
            id,
            qemu_uri: String::new(),
            format: Some("qcow2".to_string()),
            controller: Some(BlockBus::VirtioBlk),
        }
    }

    #[test]
    fn local_transport_keeps_format_and_absolutizes_path() {
        let dir = tempfile::tempdir().unwrap();
        let disk_path = dir.path().join("disk.qcow2");
        std::fs::write(&disk_path, b"fake").unwrap();

        let parsed = ParsedDisk {
            disk: disk(1),
            origin: ParsedDiskOrigin::File(disk_path.clone()),
        };
        let out = remap(&parsed, &Transport::Local).unwrap();
        assert_eq!(out.format.as_deref(), Some("qcow2"));
        assert!(Path::new(&out.qemu_uri).is_absolute());
    }

    #[test]
    fn dont_rewrite_origin_is_untouched() {
        let mut d = disk(1);
        d.qemu_uri = "nbd:localhost:10809".to_string();
        let parsed = ParsedDisk {
            disk: d,
            origin: ParsedDiskOrigin::DontRewrite,
        };
        let out = remap(&parsed, &Transport::Local).unwrap();
        assert_eq!(out.qemu_uri, "nbd:localhost:10809");
    }
}
