//! Public input types the core accepts from its CLI collaborator
//! (spec.md §6). Wraps the per-module parser/transport/writer pieces
//! into one request the pipeline dispatches on.

use std::path::PathBuf;

use crate::model::{NetworkMap, RequestedGuestCaps};

/// Which source parser/transport combination to use (spec.md §6).
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Libvirt {
        uri: Option<String>,
        name: String,
        password_file: Option<PathBuf>,
    },
    LibvirtXml {
        path: PathBuf,
    },
    Ova {
        path: PathBuf,
    },
    Vmx {
        path: PathBuf,
    },
    Disk {
        path: PathBuf,
        format: Option<String>,
    },
}

/// RHV export compatibility level (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhvCompat {
    V0_10,
    V1_1,
}

/// Where to write the converted guest and its metadata (spec.md §6).
#[derive(Debug, Clone)]
pub enum OutputSpec {
    Libvirt {
        uri: Option<String>,
    },
    Local {
        dir: PathBuf,
    },
    Rhv {
        storage_domain_path: PathBuf,
        image_uuids: Option<Vec<String>>,
        vol_uuids: Option<Vec<String>>,
        vm_uuid: Option<String>,
        vmtype: Option<String>,
        compat: RhvCompat,
    },
    RhvUpload {
        api_url: String,
        password_file: PathBuf,
        direct: bool,
        cafile: Option<PathBuf>,
    },
    Json {
        dir: PathBuf,
        disks_pattern: String,
    },
    Openstack {
        server_id: String,
        guest_id: String,
        dev_disk_by_id: bool,
    },
    Vdsm {
        storage_domain_path: PathBuf,
        image_uuids: Option<Vec<String>>,
        vol_uuids: Option<Vec<String>>,
    },
    Null,
}

/// Multi-boot root selection policy (spec.md §6).
#[derive(Debug, Clone)]
pub enum RootChoice {
    Ask,
    Single,
    First,
    Dev(PathBuf),
}

/// One conversion request, as assembled by the CLI front-end from parsed
/// arguments (spec.md §6).
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub source: SourceSpec,
    pub requested_caps: RequestedGuestCaps,
    pub network_map: NetworkMap,
    pub output: OutputSpec,
    pub root_choice: RootChoice,
}
