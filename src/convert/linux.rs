//! Linux converter (spec.md §4.6).
//!
//! Kernel enumeration, bootloader abstraction, console/device-name
//! rewrites, and capability negotiation, all driven through the
//! `FsInspector` boundary. Grounded on the teacher's
//! `vm::qemu_config::QemuEmulator` tagged-enum-with-classification-methods
//! idiom for `Bootloader`, and on `model::inspect`'s GPT GUID constants
//! for the EFI->BIOS rewrite.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::inspector::{FileId, FsInspector};
use crate::model::{
    BlockBus, GuestCaps, Inspect, MachineType, NetBus, RequestedGuestCaps, VideoModel,
    BIOS_BOOT_GPT_TYPE_GUID,
};
use crate::subprocess;

/// Feature probes required by spec.md §4.6, plus `virtio_scsi`: the spec
/// text names it only in the block-bus negotiation rule, not in the
/// explicit "required probes" list, but negotiation cannot tell
/// `VirtioSCSI` from `Ide` without it.
const PROBED_FEATURES: &[&str] = &[
    "virtio_blk",
    "virtio_net",
    "virtio_rng",
    "virtio_balloon",
    "pvpanic",
    "virtio_scsi",
];

/// One bootloader-managed kernel config variant (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootloader {
    GrubLegacy,
    Grub2BIOS,
    Grub2EFI,
    ExtLinux,
}

impl Bootloader {
    /// Config-file glob patterns the device-name rewriter must patch
    /// (spec.md §4.6's `augeas_patterns`).
    pub fn augeas_patterns(&self) -> &'static [&'static str] {
        match self {
            Bootloader::GrubLegacy => &["/files/boot/grub/menu.lst"],
            Bootloader::Grub2BIOS | Bootloader::Grub2EFI => {
                &["/files/boot/grub2/grub.cfg", "/files/etc/default/grub"]
            }
            Bootloader::ExtLinux => &["/files/boot/extlinux.conf"],
        }
    }

    /// Whether `update()` should re-run the bootloader's config
    /// generator (grub2 only, per spec.md §4.6).
    pub fn needs_regeneration(&self) -> bool {
        matches!(self, Bootloader::Grub2BIOS | Bootloader::Grub2EFI)
    }
}

/// A single kernel installed in the guest, as assembled by
/// [`enumerate_kernels`] (spec.md §4.6's kernel-detection algorithm).
#[derive(Debug, Clone)]
pub struct KernelInfo {
    pub version: String,
    pub vmlinuz: PathBuf,
    pub id: FileId,
    pub initramfs: Option<PathBuf>,
    pub module_dir: PathBuf,
    pub arch: String,
    pub is_debug: bool,
    pub is_xen_paravirt_only: bool,
    pub features: HashSet<String>,
}

impl KernelInfo {
    pub fn supports(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

/// Step 1-3: identify the vmlinuz/module-dir pair and derive the version
/// from the module directory's tail component.
fn module_dir_for_version(version: &str) -> PathBuf {
    PathBuf::from("/lib/modules").join(version)
}

/// Step 4: find a matching initramfs under `/boot`, excluding kdump
/// images, preferring the shortest filename on a tie (spec.md §4.6).
fn find_initramfs(inspector: &dyn FsInspector, version: &str) -> Result<Option<PathBuf>> {
    let entries = inspector.ls(Path::new("/boot"))?;
    let mut candidates: Vec<String> = entries
        .into_iter()
        .filter(|name| name.contains(version))
        .filter(|name| !name.contains("kdump"))
        .filter(|name| name.starts_with("initrd.img-") || name.starts_with("initramfs-"))
        .collect();
    candidates.sort_by_key(|name| name.len());
    Ok(candidates.into_iter().next().map(|name| PathBuf::from("/boot").join(name)))
}

/// Step 7: union of module-present and kernel-`.config` signals for one
/// feature probe.
fn probe_feature(
    inspector: &dyn FsInspector,
    module_dir: &Path,
    config_path: &Path,
    feature: &str,
) -> Result<bool> {
    let modules = inspector.find(module_dir)?;
    let module_name = format!("{}.ko", feature);
    if modules.iter().any(|m| {
        m.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(&module_name))
            .unwrap_or(false)
    }) {
        return Ok(true);
    }

    if inspector.exists(config_path)? {
        let config = inspector.read_file(config_path)?;
        let text = String::from_utf8_lossy(&config);
        let upper_feature = feature.to_uppercase();
        let needle_m = format!("CONFIG_{}=m", upper_feature);
        let needle_y = format!("CONFIG_{}=y", upper_feature);
        if text.contains(&needle_m) || text.contains(&needle_y) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn probe_xen_paravirt_only(inspector: &dyn FsInspector, config_path: &Path) -> Result<bool> {
    if !inspector.exists(config_path)? {
        return Ok(false);
    }
    let config = inspector.read_file(config_path)?;
    let text = String::from_utf8_lossy(&config);
    Ok(text.contains("CONFIG_X86_XEN=y") || text.contains("CONFIG_X86_64_XEN=y"))
}

/// Enumerate one package's kernel (spec.md §4.6 steps 1-7). `owned_files`
/// is the package's file manifest (step 1); `arch` is derived from an
/// ELF header the caller has already probed (step 6, outside this
/// crate's scope per spec.md §1's collaborator boundary).
pub fn build_kernel_info(
    inspector: &dyn FsInspector,
    owned_files: &[PathBuf],
    arch: &str,
) -> Result<Option<KernelInfo>> {
    let vmlinuz = owned_files
        .iter()
        .find(|p| p.to_string_lossy().starts_with("/boot/vmlinuz-"));
    let Some(vmlinuz) = vmlinuz else {
        return Ok(None);
    };

    let module_dir = owned_files
        .iter()
        .find(|p| p.to_string_lossy().starts_with("/lib/modules/"));
    let version = match module_dir {
        Some(dir) => dir
            .strip_prefix("/lib/modules/")
            .ok()
            .and_then(|rest| rest.components().next())
            .and_then(|c| c.as_os_str().to_str())
            .map(str::to_string),
        None => None,
    };
    let Some(version) = version else {
        return Ok(None);
    };

    let module_dir = module_dir_for_version(&version);
    let is_debug = vmlinuz.to_string_lossy().contains("debug");
    let config_path = PathBuf::from(format!("/boot/config-{}", version));
    let is_xen_paravirt_only = probe_xen_paravirt_only(inspector, &config_path)?;

    let mut features = HashSet::new();
    for feature in PROBED_FEATURES {
        if probe_feature(inspector, &module_dir, &config_path, feature)? {
            features.insert(feature.to_string());
        }
    }

    let id = inspector.stat(vmlinuz)?;

    Ok(Some(KernelInfo {
        version,
        vmlinuz: vmlinuz.clone(),
        id,
        initramfs: find_initramfs(inspector, &version.clone())?,
        module_dir,
        arch: arch.to_string(),
        is_debug,
        is_xen_paravirt_only,
        features,
    }))
}

/// Select the default kernel: intersect `installed` with the bootloader's
/// `list_kernels()` output, then sort by the stable tiebreak key spec.md
/// §4.6 specifies: `(is_debug, !virtio_blk, !virtio_net)`, preferring
/// earlier bootloader-menu order on a tie (this crate has no epoch/
/// version-compare signal beyond the kernel-package version string, so
/// list order stands in for "newest").
///
/// The intersection is by `(st_dev, st_ino)` identity rather than path
/// equality (spec.md §4.6): `/boot` is commonly a symlink, so the
/// bootloader menu and the installed-kernel list can name the same file
/// through different paths. `bootloader_kernel_ids` is the caller's
/// `stat()` of each bootloader menu entry.
pub fn select_default_kernel<'a>(
    installed: &'a [KernelInfo],
    bootloader_kernel_ids: &[FileId],
) -> Result<&'a KernelInfo> {
    let mut candidates: Vec<&KernelInfo> = installed
        .iter()
        .filter(|k| bootloader_kernel_ids.contains(&k.id))
        .collect();

    if candidates.is_empty() {
        return Err(ConvertError::InspectionFailed(
            "no installed kernel is referenced by the bootloader configuration".to_string(),
        ));
    }

    candidates.sort_by_key(|k| {
        (
            k.is_debug,
            !k.supports("virtio_blk"),
            !k.supports("virtio_net"),
        )
    });

    Ok(candidates[0])
}

/// Resolve a bootloader menu's kernel paths to `(st_dev, st_ino)` identity
/// for [`select_default_kernel`].
pub fn stat_bootloader_kernels(
    inspector: &dyn FsInspector,
    bootloader_kernels: &[PathBuf],
) -> Result<Vec<FileId>> {
    bootloader_kernels.iter().map(|p| inspector.stat(p)).collect()
}

/// Rewrite console arguments through the Augeas interface (spec.md
/// §4.6): `console=xvc0|hvc0` -> `console=ttyS0`, or removed entirely
/// when `keep_serial_console` is false.
pub fn configure_console(
    inspector: &mut dyn FsInspector,
    bootloader: Bootloader,
    keep_serial_console: bool,
) -> Result<()> {
    for pattern in bootloader.augeas_patterns() {
        for path in inspector.aug_match(&format!("{}//*[. =~ regexp('.*console=.*')]", pattern))? {
            let Some(value) = inspector.aug_get(&path)? else {
                continue;
            };
            let rewritten = value
                .replace("console=xvc0", "console=ttyS0")
                .replace("console=hvc0", "console=ttyS0");
            if keep_serial_console {
                inspector.aug_set(&path, &rewritten)?;
            } else {
                let stripped = rewritten
                    .split_whitespace()
                    .filter(|tok| !tok.starts_with("console="))
                    .collect::<Vec<_>>()
                    .join(" ");
                inspector.aug_set(&path, &stripped)?;
            }
        }
    }
    inspector.aug_save()
}

/// Rewrite `/dev/hd*`/`/dev/sd*` device names to `/dev/vd*` in fstab and
/// the bootloader config, leaving `UUID=`/`LABEL=` entries untouched
/// (spec.md §4.6).
pub fn rewrite_device_names(inspector: &mut dyn FsInspector, bootloader: Bootloader) -> Result<()> {
    let mut patterns = vec!["/files/etc/fstab/*/spec".to_string()];
    for pattern in bootloader.augeas_patterns() {
        patterns.push(format!("{}//*[. =~ regexp('.*/dev/[hs]d.*')]", pattern));
    }

    for pattern in &patterns {
        for path in inspector.aug_match(pattern)? {
            let Some(value) = inspector.aug_get(&path)? else {
                continue;
            };
            if value.starts_with("UUID=") || value.starts_with("LABEL=") {
                continue;
            }
            if let Some(rewritten) = rewrite_one_device_name(&value) {
                inspector.aug_set(&path, &rewritten)?;
            }
        }
    }
    inspector.aug_save()
}

fn rewrite_one_device_name(value: &str) -> Option<String> {
    for prefix in ["/dev/hd", "/dev/sd"] {
        if let Some(rest) = value.strip_prefix(prefix) {
            return Some(format!("/dev/vd{}", rest));
        }
    }
    None
}

/// Relabel the ESP as a BIOS Boot Partition, remove `/boot/efi` from
/// fstab, and re-run the bootloader installer (spec.md §4.6's
/// EFI-GRUB2 -> BIOS-GRUB2 conversion).
pub fn convert_efi_to_bios(
    inspector: &mut dyn FsInspector,
    esp_devices: &[PathBuf],
) -> Result<()> {
    for esp in esp_devices {
        inspector.part_set_gpt_type(esp, BIOS_BOOT_GPT_TYPE_GUID)?;
    }

    for path in inspector.aug_match("/files/etc/fstab/*[file = '/boot/efi']")? {
        let entry = path
            .rsplit_once('/')
            .map(|(prefix, _)| prefix.to_string())
            .unwrap_or(path);
        inspector.aug_rm(&entry)?;
    }
    inspector.aug_save()?;

    subprocess::run("grub2-install", &[], "install the grub2 package")?;
    subprocess::run("grub2-mkconfig", &["-o", "/boot/grub2/grub.cfg"], "")?;
    Ok(())
}

/// Capability negotiation (spec.md §4.6): requested capabilities the
/// kernel cannot back produce a hard error rather than a silent
/// downgrade.
pub fn negotiate_caps(
    kernel: &KernelInfo,
    requested: &RequestedGuestCaps,
) -> Result<GuestCaps> {
    let block_bus = match requested.block_bus {
        Some(BlockBus::VirtioBlk) if !kernel.supports("virtio_blk") => {
            return Err(ConvertError::NoMatchingDriver(
                "virtio-blk requested but not supported by the selected kernel".to_string(),
            ))
        }
        Some(BlockBus::VirtioSCSI) if !kernel.supports("virtio_scsi") => {
            return Err(ConvertError::NoMatchingDriver(
                "virtio-scsi requested but not supported by the selected kernel".to_string(),
            ))
        }
        Some(requested_bus) => requested_bus,
        None => {
            if kernel.supports("virtio_blk") {
                BlockBus::VirtioBlk
            } else if kernel.supports("virtio_scsi") {
                BlockBus::VirtioSCSI
            } else {
                BlockBus::Ide
            }
        }
    };

    let net_bus = match requested.net_bus {
        Some(NetBus::VirtioNet) if !kernel.supports("virtio_net") => {
            return Err(ConvertError::NoMatchingDriver(
                "virtio-net requested but not supported by the selected kernel".to_string(),
            ))
        }
        Some(requested_bus) => requested_bus,
        None if kernel.supports("virtio_net") => NetBus::VirtioNet,
        None => NetBus::Rtl8139,
    };

    Ok(GuestCaps {
        block_bus,
        net_bus,
        video: requested.video.unwrap_or(VideoModel::Cirrus),
        machine: MachineType::I440fx,
        arch: kernel.arch.clone(),
        acpi: true,
        virtio_rng: kernel.supports("virtio_rng"),
        virtio_balloon: kernel.supports("virtio_balloon"),
        isa_pvpanic: kernel.supports("pvpanic"),
    })
}

/// Entry point dispatched from [`crate::convert::convert`].
pub fn convert(
    inspector: &mut dyn FsInspector,
    _inspect: &Inspect,
    requested: &RequestedGuestCaps,
) -> Result<GuestCaps> {
    // The package manager's per-package file manifest (spec.md §4.6 step
    // 1) is a collaborator call outside this crate's scope; `/boot` and
    // `/lib/modules` are walked directly as a stand-in.
    let mut owned_files = inspector.find(Path::new("/boot"))?;
    owned_files.extend(inspector.find(Path::new("/lib/modules"))?);
    let kernel = build_kernel_info(inspector, &owned_files, "x86_64")?
        .ok_or_else(|| ConvertError::InspectionFailed("no kernel found under /boot".to_string()))?;

    if kernel.is_xen_paravirt_only {
        return Err(ConvertError::UnsupportedSource(
            "guest kernel is Xen-paravirt-only and cannot run under KVM/QEMU".to_string(),
        ));
    }

    negotiate_caps(&kernel, requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(ino: u64, features: &[&str], debug: bool) -> KernelInfo {
        KernelInfo {
            version: "5.14.0".to_string(),
            vmlinuz: PathBuf::from("/boot/vmlinuz-5.14.0"),
            id: FileId { dev: 1, ino },
            initramfs: None,
            module_dir: PathBuf::from("/lib/modules/5.14.0"),
            arch: "x86_64".to_string(),
            is_debug: debug,
            is_xen_paravirt_only: false,
            features: features.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn select_default_kernel_requires_bootloader_intersection() {
        let k = kernel(1, &[], false);
        let err = select_default_kernel(&[k], &[FileId { dev: 1, ino: 99 }]).unwrap_err();
        assert!(matches!(err, ConvertError::InspectionFailed(_)));
    }

    #[test]
    fn select_default_kernel_prefers_non_debug_virtio_capable() {
        let debug_virtio = kernel(1, &["virtio_blk", "virtio_net"], true);
        let plain = kernel(2, &[], false);
        let menu = vec![debug_virtio.id, plain.id];
        let selected = select_default_kernel(&[debug_virtio, plain], &menu).unwrap();
        assert!(!selected.is_debug);
    }

    #[test]
    fn select_default_kernel_matches_by_identity_not_path() {
        // Same vmlinuz path on both kernels (a symlinked /boot scenario),
        // distinguished only by inode identity.
        let wrong = kernel(1, &[], false);
        let right = kernel(2, &[], false);
        let menu = vec![right.id];
        let selected = select_default_kernel(&[wrong, right], &menu).unwrap();
        assert_eq!(selected.id.ino, 2);
    }

    #[test]
    fn negotiate_caps_downgrades_when_nothing_requested() {
        let k = kernel(1, &["virtio_blk", "virtio_net", "virtio_rng"], false);
        let caps = negotiate_caps(&k, &RequestedGuestCaps::default()).unwrap();
        assert!(matches!(caps.block_bus, BlockBus::VirtioBlk));
        assert!(matches!(caps.net_bus, NetBus::VirtioNet));
        assert!(caps.virtio_rng);
    }

    #[test]
    fn negotiate_caps_errors_on_unsatisfiable_request() {
        let k = kernel(1, &[], false);
        let requested = RequestedGuestCaps {
            block_bus: Some(BlockBus::VirtioBlk),
            ..Default::default()
        };
        let err = negotiate_caps(&k, &requested).unwrap_err();
        assert!(matches!(err, ConvertError::NoMatchingDriver(_)));
    }

    #[test]
    fn rewrite_one_device_name_maps_hd_and_sd_to_vd() {
        assert_eq!(
            rewrite_one_device_name("/dev/hda1").as_deref(),
            Some("/dev/vda1")
        );
        assert_eq!(
            rewrite_one_device_name("/dev/sdb2").as_deref(),
            Some("/dev/vdb2")
        );
        assert_eq!(rewrite_one_device_name("UUID=abc-123"), None);
    }

    #[test]
    fn bootloader_augeas_patterns_are_nonempty() {
        for b in [
            Bootloader::GrubLegacy,
            Bootloader::Grub2BIOS,
            Bootloader::Grub2EFI,
            Bootloader::ExtLinux,
        ] {
            assert!(!b.augeas_patterns().is_empty());
        }
    }
}
