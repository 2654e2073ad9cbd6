use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// GPT type GUIDs relevant to the EFI->BIOS GRUB2 conversion (spec.md §4.6).
pub const ESP_GPT_TYPE_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
pub const BIOS_BOOT_GPT_TYPE_GUID: &str = "21686148-6449-6E6F-744E-656564454649";

/// Firmware as found on disk by the inspector, distinct from
/// `Source::firmware` which is only the *declared* firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareOnDisk {
    Bios,
    Uefi { esp_devices: Vec<PathBuf> },
}

/// Windows-specific paths populated only when `Inspect::os_type == "windows"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsPaths {
    pub system_root: PathBuf,
    pub software_hive: PathBuf,
    pub system_hive: PathBuf,
    pub current_control_set: String,
}

/// Read-only record produced by consuming the external `FsInspector`'s
/// output (spec.md §3, §4.4 of the external-interfaces section, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspect {
    pub root_device: PathBuf,
    pub os_type: String,
    pub distro: String,
    pub arch: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub package_format: String,
    pub package_manager: String,
    pub product_name: String,
    pub product_variant: Option<String>,
    pub mountpoints: Vec<(PathBuf, PathBuf)>,
    pub applications: Vec<String>,
    pub applications_map: HashMap<String, String>,
    pub firmware: FirmwareOnDisk,
    pub windows: Option<WindowsPaths>,
}

impl Inspect {
    pub fn is_windows(&self) -> bool {
        self.os_type.eq_ignore_ascii_case("windows")
    }

    pub fn is_linux(&self) -> bool {
        self.os_type.eq_ignore_ascii_case("linux")
    }

    /// Whether any installed application name or publisher matches one of
    /// the antivirus guard patterns (spec.md §4.7).
    pub fn has_antivirus_product(&self) -> Option<String> {
        const NAME_PATTERNS: &[&str] =
            &["virus", "kaspersky", "mcafee", "norton", "sophos"];
        for app in &self.applications {
            let lower = app.to_lowercase();
            if NAME_PATTERNS.iter().any(|p| lower.contains(p)) {
                return Some(app.clone());
            }
        }
        for (app, publisher) in &self.applications_map {
            if publisher.eq_ignore_ascii_case("AVG Technologies") {
                return Some(app.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inspect() -> Inspect {
        Inspect {
            root_device: "/dev/sda1".into(),
            os_type: "linux".into(),
            distro: "fedora".into(),
            arch: "x86_64".into(),
            major_version: 39,
            minor_version: 0,
            package_format: "rpm".into(),
            package_manager: "dnf".into(),
            product_name: "Fedora".into(),
            product_variant: None,
            mountpoints: Vec::new(),
            applications: Vec::new(),
            applications_map: HashMap::new(),
            firmware: FirmwareOnDisk::Bios,
            windows: None,
        }
    }

    #[test]
    fn detects_antivirus_by_name() {
        let mut i = base_inspect();
        i.applications.push("Norton Security".into());
        assert_eq!(i.has_antivirus_product().as_deref(), Some("Norton Security"));
    }

    #[test]
    fn detects_antivirus_by_publisher() {
        let mut i = base_inspect();
        i.applications_map
            .insert("PC TuneUp".into(), "AVG Technologies".into());
        assert!(i.has_antivirus_product().is_some());
    }

    #[test]
    fn no_false_positive() {
        let mut i = base_inspect();
        i.applications.push("LibreOffice".into());
        assert!(i.has_antivirus_product().is_none());
    }
}
