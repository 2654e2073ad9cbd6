//! Windows converter (spec.md §4.7).
//!
//! VirtIO driver selection from a `VIRTIO_WIN` tree, registry edit
//! sequences (modeled as data, then applied to the open hive through the
//! `FsInspector` boundary, so the edit sequence itself stays unit-testable
//! without a live `HiveHandle`), firstboot installation, and the
//! antivirus guard. Grounded on the teacher's `vm::qemu_config`
//! classify-by-path idiom.

use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::inspector::{FsInspector, HiveHandle, HiveValueType};
use crate::model::{BlockBus, GuestCaps, Inspect, MachineType, NetBus, RequestedGuestCaps, VideoModel};

/// One classified file under the `VIRTIO_WIN` driver tree (spec.md
/// §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverFile {
    pub path: PathBuf,
    pub arch: String,
    pub major: u32,
    pub minor: u32,
    pub client: bool,
}

/// Classify one path by its directory segments, case-insensitively
/// (spec.md §4.7). Returns `None` for files whose extension isn't one of
/// `cat|inf|pdb|sys`, or whose segments don't resolve to an OS pair.
pub fn classify_driver_file(path: &Path) -> Option<DriverFile> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if !matches!(ext.as_str(), "cat" | "inf" | "pdb" | "sys") {
        return None;
    }

    let segments: Vec<String> = path
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .map(|s| s.to_lowercase())
        .collect();

    let arch = if segments.iter().any(|s| s == "amd64") {
        "amd64"
    } else if segments.iter().any(|s| s == "x86" || s == "i386") {
        "i386"
    } else {
        return None;
    };

    let (major, minor, client) = os_pair_from_segments(&segments)?;

    Some(DriverFile {
        path: path.to_path_buf(),
        arch: arch.to_string(),
        major,
        minor,
        client,
    })
}

fn os_pair_from_segments(segments: &[String]) -> Option<(u32, u32, bool)> {
    for segment in segments {
        let pair = match segment.as_str() {
            "xp" => Some((5, 1, true)),
            "2k3" => Some((5, 2, false)),
            "vista" => Some((6, 0, true)),
            "2k8" => Some((6, 0, false)),
            "w7" => Some((6, 1, true)),
            "2k8r2" => Some((6, 1, false)),
            "w8" => Some((6, 2, true)),
            "2k12" => Some((6, 2, false)),
            "w8.1" => Some((6, 3, true)),
            "2k12r2" => Some((6, 3, false)),
            "w10" => Some((10, 0, true)),
            "2k16" => Some((10, 0, false)),
            _ => None,
        };
        if pair.is_some() {
            return pair;
        }
    }
    None
}

/// Select every driver file matching the guest's architecture, major,
/// minor, and client/server variant (spec.md §4.7).
pub fn select_matching_drivers(
    tree: &[PathBuf],
    arch: &str,
    major: u32,
    minor: u32,
    client: bool,
) -> Vec<DriverFile> {
    tree.iter()
        .filter_map(|p| classify_driver_file(p))
        .filter(|d| d.arch == arch && d.major == major && d.minor == minor && d.client == client)
        .collect()
}

/// Storage drivers probed in order, per spec.md §4.7.
const STORAGE_DRIVER_CANDIDATES: &[&str] = &["virtio_blk", "vrtioblk", "viostor", "vioscsi"];

/// Choose the storage driver to install into `system32\drivers`. A
/// requested `VirtioSCSI` bus requires `vioscsi.inf` specifically.
pub fn choose_storage_driver<'a>(
    matched: &'a [DriverFile],
    requested_scsi: bool,
) -> Result<&'a DriverFile> {
    if requested_scsi {
        return matched
            .iter()
            .find(|d| file_stem_is(d, "vioscsi"))
            .ok_or_else(|| {
                ConvertError::NoMatchingDriver("vioscsi.inf not found for requested VirtioSCSI".to_string())
            });
    }

    for candidate in STORAGE_DRIVER_CANDIDATES {
        if let Some(found) = matched.iter().find(|d| file_stem_is(d, candidate)) {
            return Ok(found);
        }
    }
    Err(ConvertError::NoMatchingDriver(
        "no virtio storage driver found in the VIRTIO_WIN tree".to_string(),
    ))
}

fn file_stem_is(d: &DriverFile, stem: &str) -> bool {
    d.path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(stem))
        .unwrap_or(false)
}

/// Copy matching driver files into `<SYSTEMROOT>\Drivers\VirtIO\`, and
/// the chosen storage driver's `.sys` into
/// `<SYSTEMROOT>\system32\drivers\` (spec.md §4.7). Basenames are
/// lowercased on copy.
pub fn install_drivers(
    inspector: &mut dyn FsInspector,
    system_root: &Path,
    matched: &[DriverFile],
    storage_driver: &DriverFile,
) -> Result<()> {
    let virtio_dir = system_root.join("Drivers").join("VirtIO");
    for driver in matched {
        let Some(basename) = driver.path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let dest = virtio_dir.join(basename.to_lowercase());
        inspector.cp(&driver.path, &dest)?;
    }

    if storage_driver.path.extension().and_then(|e| e.to_str()) == Some("sys") {
        let basename = storage_driver
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("driver.sys")
            .to_lowercase();
        let dest = system_root.join("system32").join("drivers").join(basename);
        inspector.cp(&storage_driver.path, &dest)?;
    }

    Ok(())
}

/// One named value to write under a registry key (spec.md §4.7). `value_type`
/// and `data` are kept as distinct fields so a `REG_EXPAND_SZ` type tag is
/// never conflated with the literal value string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    pub name: String,
    pub value_type: HiveValueType,
    pub data: String,
}

/// One registry key this converter wants written for a critical device
/// driver (spec.md §4.7). Kept as plain data rather than a direct hive
/// mutation so it can be unit-tested without a live `HiveHandle`;
/// [`apply_registry_edit`] is what actually writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEdit {
    pub key_path: String,
    pub values: Vec<RegistryValue>,
}

fn reg_value(name: &str, value_type: HiveValueType, data: impl Into<String>) -> RegistryValue {
    RegistryValue {
        name: name.to_string(),
        value_type,
        data: data.into(),
    }
}

const CLASS_GUID_SCSI_ADAPTER: &str = "{4D36E97B-E325-11CE-BFC1-08002BE10318}";

/// Legacy and modern virtio PCI IDs for viostor/vioscsi (spec.md §4.7).
const VIOSTOR_PCI_IDS: &[&str] = &["VEN_1AF4&DEV_1001", "VEN_1AF4&DEV_1042"];
const VIOSCSI_PCI_IDS: &[&str] = &["VEN_1AF4&DEV_1004", "VEN_1AF4&DEV_1048"];

/// Build the registry-edit sequence for one critical device driver,
/// choosing the pre-Windows-8 `CriticalDeviceDatabase` scheme or the
/// Windows-8+ `DriverDatabase` scheme based on `has_driver_database`
/// (spec.md §4.7's "detect which scheme to use by probing for the
/// presence of the DriverDatabase node").
pub fn build_registry_edits(
    current_control_set: &str,
    driver: &str,
    has_driver_database: bool,
) -> Vec<RegistryEdit> {
    let mut edits = vec![RegistryEdit {
        key_path: format!("{}\\Services\\{}", current_control_set, driver),
        values: vec![
            reg_value("Type", HiveValueType::Dword, "0x1"),
            reg_value("Start", HiveValueType::Dword, "0x0"),
            reg_value("Group", HiveValueType::Sz, "SCSI miniport"),
            reg_value("ErrorControl", HiveValueType::Dword, "0x1"),
            reg_value(
                "ImagePath",
                HiveValueType::ExpandSz,
                format!("system32\\drivers\\{}.sys", driver),
            ),
        ],
    }];

    let pci_ids = if driver.eq_ignore_ascii_case("vioscsi") {
        VIOSCSI_PCI_IDS
    } else {
        VIOSTOR_PCI_IDS
    };

    if has_driver_database {
        for pci_id in pci_ids {
            edits.push(RegistryEdit {
                key_path: format!("DriverDatabase\\DeviceIds\\PCI\\{}", pci_id),
                values: vec![],
            });
        }
        edits.push(RegistryEdit {
            key_path: format!(
                "DriverDatabase\\DriverPackages\\{}\\Configurations\\{}",
                driver, driver
            ),
            values: vec![
                reg_value("ConfigFlags", HiveValueType::Dword, "0"),
                reg_value("Service", HiveValueType::Sz, driver),
            ],
        });
        edits.push(RegistryEdit {
            key_path: "DriverDatabase\\DriverInfFiles".to_string(),
            values: vec![],
        });
    } else {
        for pci_id in pci_ids {
            edits.push(RegistryEdit {
                key_path: format!("Control\\CriticalDeviceDatabase\\PCI#{}", pci_id),
                values: vec![
                    reg_value("Service", HiveValueType::Sz, driver),
                    reg_value("ClassGUID", HiveValueType::Sz, CLASS_GUID_SCSI_ADAPTER),
                ],
            });
        }
    }

    edits
}

fn hive_has_driver_database(inspector: &dyn FsInspector, hive: HiveHandle) -> Result<bool> {
    let root = inspector.hivex_root(hive)?;
    Ok(inspector
        .hivex_node_get_child(hive, root, "DriverDatabase")?
        .is_some())
}

/// Write one `RegistryEdit` into the open hive, creating any missing key
/// segment along the way (spec.md §4.7).
fn apply_registry_edit(inspector: &mut dyn FsInspector, hive: HiveHandle, edit: &RegistryEdit) -> Result<()> {
    let mut node = inspector.hivex_root(hive)?;
    for segment in edit.key_path.split('\\').filter(|s| !s.is_empty()) {
        node = match inspector.hivex_node_get_child(hive, node, segment)? {
            Some(child) => child,
            None => inspector.hivex_node_add_child(hive, node, segment)?,
        };
    }
    for value in &edit.values {
        inspector.hivex_node_set_value(hive, node, &value.name, value.value_type, &value.data)?;
    }
    Ok(())
}

/// Install `<Program Files>\Guestfs\Firstboot\` with a launcher batch
/// file and an empty `scripts\` subdirectory so later stages can queue
/// work, then write the values that register it as a RunOnce service
/// (spec.md §4.7).
pub fn install_firstboot(inspector: &mut dyn FsInspector, program_files: &Path) -> Result<()> {
    let firstboot_dir = program_files.join("Guestfs").join("Firstboot");
    inspector.write(
        &firstboot_dir.join("firstboot.bat"),
        b"@echo off\r\nfor %%f in (scripts\\*.bat) do call \"%%f\"\r\n",
    )?;
    inspector.write(&firstboot_dir.join("scripts").join(".keep"), b"")?;
    Ok(())
}

/// Entry point dispatched from [`crate::convert::convert`].
pub fn convert(
    inspector: &mut dyn FsInspector,
    inspect: &Inspect,
    requested: &RequestedGuestCaps,
) -> Result<GuestCaps> {
    if let Some(product) = inspect.has_antivirus_product() {
        log::warn!(
            "antivirus product {:?} detected in guest, proceeding anyway",
            product
        );
    }

    let windows = inspect
        .windows
        .as_ref()
        .ok_or_else(|| ConvertError::InspectionFailed("Windows paths not populated".to_string()))?;

    let tree = inspector.find(Path::new("/VIRTIO_WIN"))?;
    let major = inspect.major_version;
    let minor = inspect.minor_version;
    let client = inspect
        .product_variant
        .as_deref()
        .map(|v| !v.eq_ignore_ascii_case("server"))
        .unwrap_or(true);

    let matched = select_matching_drivers(&tree, "amd64", major, minor, client);
    let requested_scsi = matches!(requested.block_bus, Some(BlockBus::VirtioSCSI));
    let storage_driver = choose_storage_driver(&matched, requested_scsi)?;

    install_drivers(inspector, &windows.system_root, &matched, storage_driver)?;

    let driver_name = storage_driver
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("viostor")
        .to_string();

    let hive = inspector.hivex_open(&windows.system_hive, true)?;
    let has_driver_database = hive_has_driver_database(inspector, hive)?;
    let edits = build_registry_edits(&windows.current_control_set, &driver_name, has_driver_database);
    for edit in &edits {
        apply_registry_edit(inspector, hive, edit)?;
    }
    inspector.hivex_commit(hive)?;
    inspector.hivex_close(hive)?;

    install_firstboot(inspector, Path::new("C:\\Program Files"))?;

    let block_bus = if driver_name.eq_ignore_ascii_case("vioscsi") {
        BlockBus::VirtioSCSI
    } else {
        BlockBus::VirtioBlk
    };

    Ok(GuestCaps {
        block_bus,
        net_bus: NetBus::VirtioNet,
        video: requested.video.unwrap_or(VideoModel::Cirrus),
        machine: MachineType::I440fx,
        arch: "x86_64".to_string(),
        acpi: true,
        virtio_rng: false,
        virtio_balloon: false,
        isa_pvpanic: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{FileId, PartitionInfo};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// An in-memory hive tree, enough to exercise `apply_registry_edit`
    /// without a live `HiveHandle`. Every non-hive call is unreached by
    /// these tests.
    #[derive(Default)]
    struct FakeHive {
        children: RefCell<HashMap<u64, HashMap<String, u64>>>,
        values: RefCell<HashMap<(u64, String), (HiveValueType, String)>>,
        next_id: Cell<u64>,
    }

    impl FsInspector for FakeHive {
        fn add_drive(&mut self, _uri: &str, _readonly: bool) -> Result<()> {
            unimplemented!()
        }
        fn launch(&mut self) -> Result<()> {
            unimplemented!()
        }
        fn list_os_roots(&self) -> Result<Vec<PathBuf>> {
            unimplemented!()
        }
        fn inspect(&self, _root: &Path) -> Result<Inspect> {
            unimplemented!()
        }
        fn mount(&mut self, _device: &Path, _mountpoint: &Path) -> Result<()> {
            unimplemented!()
        }
        fn exists(&self, _path: &Path) -> Result<bool> {
            unimplemented!()
        }
        fn is_file(&self, _path: &Path) -> Result<bool> {
            unimplemented!()
        }
        fn ls(&self, _path: &Path) -> Result<Vec<String>> {
            unimplemented!()
        }
        fn find(&self, _path: &Path) -> Result<Vec<PathBuf>> {
            unimplemented!()
        }
        fn read_file(&self, _path: &Path) -> Result<Vec<u8>> {
            unimplemented!()
        }
        fn write(&mut self, _path: &Path, _contents: &[u8]) -> Result<()> {
            unimplemented!()
        }
        fn cp(&mut self, _src: &Path, _dst: &Path) -> Result<()> {
            unimplemented!()
        }
        fn stat(&self, _path: &Path) -> Result<FileId> {
            unimplemented!()
        }
        fn aug_init(&mut self, _root: &Path) -> Result<()> {
            unimplemented!()
        }
        fn aug_match(&self, _expr: &str) -> Result<Vec<String>> {
            unimplemented!()
        }
        fn aug_get(&self, _path: &str) -> Result<Option<String>> {
            unimplemented!()
        }
        fn aug_set(&mut self, _path: &str, _value: &str) -> Result<()> {
            unimplemented!()
        }
        fn aug_rm(&mut self, _path: &str) -> Result<()> {
            unimplemented!()
        }
        fn aug_save(&mut self) -> Result<()> {
            unimplemented!()
        }
        fn aug_load(&mut self) -> Result<()> {
            unimplemented!()
        }
        fn hivex_open(&mut self, _path: &Path, _write: bool) -> Result<HiveHandle> {
            Ok(HiveHandle(1))
        }
        fn hivex_root(&self, _hive: HiveHandle) -> Result<HiveNode> {
            Ok(HiveNode(0))
        }
        fn hivex_node_get_child(
            &self,
            _hive: HiveHandle,
            node: HiveNode,
            name: &str,
        ) -> Result<Option<HiveNode>> {
            Ok(self
                .children
                .borrow()
                .get(&node.0)
                .and_then(|c| c.get(name))
                .map(|id| HiveNode(*id)))
        }
        fn hivex_node_add_child(&mut self, _hive: HiveHandle, parent: HiveNode, name: &str) -> Result<HiveNode> {
            self.next_id.set(self.next_id.get() + 1);
            let id = self.next_id.get();
            self.children
                .borrow_mut()
                .entry(parent.0)
                .or_default()
                .insert(name.to_string(), id);
            Ok(HiveNode(id))
        }
        fn hivex_node_set_value(
            &mut self,
            _hive: HiveHandle,
            node: HiveNode,
            name: &str,
            value_type: HiveValueType,
            data: &str,
        ) -> Result<()> {
            self.values
                .borrow_mut()
                .insert((node.0, name.to_string()), (value_type, data.to_string()));
            Ok(())
        }
        fn hivex_commit(&mut self, _hive: HiveHandle) -> Result<()> {
            Ok(())
        }
        fn hivex_close(&mut self, _hive: HiveHandle) -> Result<()> {
            Ok(())
        }
        fn list_partitions(&self, _device: &Path) -> Result<Vec<PartitionInfo>> {
            unimplemented!()
        }
        fn part_get_gpt_type(&self, _partition: &Path) -> Result<Option<String>> {
            unimplemented!()
        }
        fn part_set_gpt_type(&mut self, _partition: &Path, _type_guid: &str) -> Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn apply_registry_edit_writes_values_into_hive() {
        let mut hive_inspector = FakeHive::default();
        let hive = hive_inspector.hivex_open(Path::new("/x"), true).unwrap();
        let edit = RegistryEdit {
            key_path: "ControlSet001\\Services\\viostor".to_string(),
            values: vec![reg_value(
                "ImagePath",
                HiveValueType::ExpandSz,
                "system32\\drivers\\viostor.sys",
            )],
        };

        apply_registry_edit(&mut hive_inspector, hive, &edit).unwrap();

        let root = hive_inspector.hivex_root(hive).unwrap();
        let cs = hive_inspector
            .hivex_node_get_child(hive, root, "ControlSet001")
            .unwrap()
            .unwrap();
        let services = hive_inspector
            .hivex_node_get_child(hive, cs, "Services")
            .unwrap()
            .unwrap();
        let viostor = hive_inspector
            .hivex_node_get_child(hive, services, "viostor")
            .unwrap()
            .unwrap();

        let (value_type, data) = hive_inspector
            .values
            .borrow()
            .get(&(viostor.0, "ImagePath".to_string()))
            .cloned()
            .unwrap();
        assert_eq!(value_type, HiveValueType::ExpandSz);
        assert_eq!(data, "system32\\drivers\\viostor.sys");
    }

    #[test]
    fn build_registry_edits_splits_image_path_type_from_value() {
        let edits = build_registry_edits("ControlSet001", "viostor", false);
        let services_edit = edits
            .iter()
            .find(|e| e.key_path.ends_with("\\Services\\viostor"))
            .unwrap();
        let image_path = services_edit
            .values
            .iter()
            .find(|v| v.name == "ImagePath")
            .unwrap();
        assert_eq!(image_path.value_type, HiveValueType::ExpandSz);
        assert_eq!(image_path.data, "system32\\drivers\\viostor.sys");
    }

    #[test]
    fn classify_driver_file_extracts_arch_and_os_pair() {
        let d = classify_driver_file(Path::new("VIRTIO_WIN/viostor/w10/amd64/viostor.sys")).unwrap();
        assert_eq!(d.arch, "amd64");
        assert_eq!((d.major, d.minor), (10, 0));
        assert!(d.client);
    }

    #[test]
    fn classify_driver_file_rejects_unknown_extension() {
        assert!(classify_driver_file(Path::new("VIRTIO_WIN/viostor/w10/amd64/readme.txt")).is_none());
    }

    #[test]
    fn choose_storage_driver_prefers_candidate_order() {
        let matched = vec![
            DriverFile {
                path: PathBuf::from("viostor.sys"),
                arch: "amd64".to_string(),
                major: 6,
                minor: 1,
                client: false,
            },
            DriverFile {
                path: PathBuf::from("vioscsi.sys"),
                arch: "amd64".to_string(),
                major: 6,
                minor: 1,
                client: false,
            },
        ];
        let chosen = choose_storage_driver(&matched, false).unwrap();
        assert_eq!(chosen.path, PathBuf::from("viostor.sys"));
    }

    #[test]
    fn choose_storage_driver_requires_vioscsi_when_requested() {
        let matched = vec![DriverFile {
            path: PathBuf::from("viostor.sys"),
            arch: "amd64".to_string(),
            major: 6,
            minor: 1,
            client: false,
        }];
        assert!(choose_storage_driver(&matched, true).is_err());
    }

    #[test]
    fn registry_edits_use_critical_device_database_pre_windows_8() {
        let edits = build_registry_edits("ControlSet001", "viostor", false);
        assert!(edits
            .iter()
            .any(|e| e.key_path.contains("CriticalDeviceDatabase")));
        assert!(!edits.iter().any(|e| e.key_path.contains("DriverDatabase")));
    }

    #[test]
    fn registry_edits_use_driver_database_windows_8_and_later() {
        let edits = build_registry_edits("ControlSet001", "vioscsi", true);
        assert!(edits.iter().any(|e| e.key_path.contains("DriverDatabase")));
    }
}
