//! Top-level orchestration (spec.md §2, §5).
//!
//! A straight-line sequence of stages: parse source, remap disk URIs,
//! map networks, run the per-OS converter, copy disks, write target
//! metadata. Single-threaded and synchronous throughout (spec.md §5);
//! scoped resources are released on a LIFO stack on every exit path,
//! mirroring the teacher's `vm::lifecycle` start/stop bracket style.

use std::path::{Path, PathBuf};

use crate::convert;
use crate::copier::Copier;
use crate::error::{ConvertError, Result, Warnings};
use crate::inspector::FsInspector;
use crate::model::{BlockBus, ParsedDisk, ParsedDiskOrigin, Source};
use crate::netmap;
use crate::remap::{self, Transport};
use crate::request::{ConvertRequest, OutputSpec, SourceSpec};
use crate::source;
use crate::target::{self, Targets};

/// LIFO cleanup stack for scoped resources (spec.md §5). Each closure
/// runs once, in reverse registration order, when the guard drops —
/// on success, on error, and (within what Rust can express without
/// process-level signal handling) on early return.
#[derive(Default)]
pub struct ScopedResources {
    cleanups: Vec<Box<dyn FnOnce()>>,
}

impl ScopedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, cleanup: impl FnOnce() + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }
}

impl Drop for ScopedResources {
    fn drop(&mut self) {
        while let Some(cleanup) = self.cleanups.pop() {
            cleanup();
        }
    }
}

/// The outcome of one conversion (spec.md §7: warnings are attached, not
/// fatal, when the propagation policy allows a local recovery).
#[derive(Debug, Default)]
pub struct Report {
    pub warnings: Warnings,
}

/// Parse `request.source` into a `Source` plus its unresolved disks.
/// VMX sources are accepted at the tokenizer level (spec.md §4.4 defines
/// only the typed key/value accessor surface, not a VMX->Source mapping,
/// unlike §4.2/§4.3) — seeing one here is `UnsupportedSource` until a
/// later VMX-to-`Source` assembly stage is specified.
fn parse_source(
    spec: &SourceSpec,
    resources: &mut ScopedResources,
) -> Result<(Source, Vec<ParsedDisk>)> {
    match spec {
        SourceSpec::LibvirtXml { path } => {
            let parsed =
                source::parse_libvirt_xml_file(path, &source::libvirt_xml::NullVolumeResolver)?;
            Ok((parsed.source, parsed.parsed_disks))
        }
        SourceSpec::Libvirt { .. } => Err(ConvertError::UnsupportedSource(
            "a live libvirt connection is a collaborator this crate does not provide; use LibvirtXml with an exported domain XML instead".to_string(),
        )),
        SourceSpec::Ova { path } => {
            let work_dir = std::env::temp_dir().join(format!("v2kvm-ova-{}", std::process::id()));
            let handle = source::ova::open(path, false, &work_dir)?;
            let cleanup_dir = work_dir.clone();
            resources.defer(move || {
                let _ = std::fs::remove_dir_all(&cleanup_dir);
            });
            let ovf_path = match &handle {
                source::OvaHandle::Directory(dir) => find_ovf(dir)?,
                source::OvaHandle::TarOptimized { unpacked_meta_dir, .. } => find_ovf(unpacked_meta_dir)?,
            };
            let xml = std::fs::read_to_string(&ovf_path).map_err(ConvertError::Io)?;
            let parsed = source::ovf::parse_str(&xml)?;
            Ok((parsed.source, parsed.parsed_disks))
        }
        SourceSpec::Vmx { path } => Err(ConvertError::UnsupportedSource(format!(
            "{:?}: VMX parsing exposes only typed key/value access (spec.md §4.4); no Source-assembly stage is defined for it yet",
            path
        ))),
        SourceSpec::Disk { path, format } => {
            let disk = crate::model::SourceDisk {
                id: 1,
                qemu_uri: path.to_string_lossy().into_owned(),
                format: format.clone(),
                controller: None,
            };
            let source = Source {
                name: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("disk")
                    .to_string(),
                rename: None,
                hypervisor: crate::model::Hypervisor::Unknown,
                memory_bytes: 1024 * 1024 * 1024,
                vcpu: 1,
                cpu_topology: Default::default(),
                cpu_vendor: None,
                cpu_model: None,
                features: Default::default(),
                firmware: Default::default(),
                display: None,
                video: None,
                sound: None,
                disks: vec![disk.clone()],
                removables: vec![],
                nics: vec![],
            };
            let parsed = ParsedDisk {
                disk,
                origin: ParsedDiskOrigin::File(path.clone()),
            };
            Ok((source, vec![parsed]))
        }
    }
}

fn find_ovf(dir: &Path) -> Result<PathBuf> {
    std::fs::read_dir(dir)
        .map_err(ConvertError::Io)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("ovf"))
        .ok_or_else(|| ConvertError::SourceParseError {
            path: dir.to_path_buf(),
            message: "no .ovf descriptor found in the OVA".to_string(),
        })
}

fn output_dir_for(output: &OutputSpec) -> Option<&Path> {
    match output {
        OutputSpec::Local { dir } => Some(dir),
        OutputSpec::Json { dir, .. } => Some(dir),
        _ => None,
    }
}

/// Run one full conversion. `inspector`/`copier` are the external
/// collaborators spec.md §1 treats as black boxes; the caller (the CLI
/// front-end) wires up real implementations.
pub fn run(
    request: &ConvertRequest,
    transport: &Transport,
    inspector: &mut dyn FsInspector,
    copier: &dyn Copier,
) -> Result<Report> {
    let mut report = Report::default();
    let mut resources = ScopedResources::new();

    let (mut source, parsed_disks) = parse_source(&request.source, &mut resources)?;
    source.validate().map_err(|message| ConvertError::SourceParseError {
        path: PathBuf::new(),
        message,
    })?;

    netmap::apply(&mut source, &request.network_map);

    let remapped_disks = parsed_disks
        .iter()
        .map(|p| remap::remap(p, transport))
        .collect::<Result<Vec<_>>>()?;
    source.disks = remapped_disks;

    inspector.launch()?;
    for disk in &source.disks {
        inspector.add_drive(&disk.qemu_uri, true)?;
    }
    let roots = inspector.list_os_roots()?;
    let root = match request.root_choice {
        crate::request::RootChoice::Dev(ref dev) => dev.clone(),
        _ => roots
            .into_iter()
            .next()
            .ok_or_else(|| ConvertError::InspectionFailed("no OS root found".to_string()))?,
    };
    let inspect = inspector.inspect(&root)?;

    if let Some(product) = inspect.has_antivirus_product() {
        report
            .warnings
            .push(format!("antivirus product detected: {}", product));
    }

    let caps = convert::convert(inspector, &inspect, &request.requested_caps)?;

    let disk_buses: Vec<BlockBus> = source.disks.iter().map(|_| caps.block_bus).collect();
    let buses = target::TargetBuses { disk_buses };

    let out_dir = output_dir_for(&request.output)
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&out_dir).map_err(ConvertError::Io)?;

    let dev_names = target::assign_dev_names(&buses.disk_buses);
    let mut disk_files = Vec::with_capacity(source.disks.len());
    for (disk, dev) in source.disks.iter().zip(dev_names.iter()) {
        let ext = if caps.block_bus == BlockBus::Ide { "raw" } else { "qcow2" };
        let dest = out_dir.join(format!("{}-{}.{}", source.effective_name(), dev, ext));
        copier.convert(&disk.qemu_uri, &dest.to_string_lossy(), ext, &mut |_| {})?;
        disk_files.push(dest);
    }
    let targets = Targets { disk_files };

    write_target_metadata(&source, &targets, &buses, &caps, &inspect, &request.output, &out_dir)?;

    Ok(report)
}

fn write_target_metadata(
    source: &Source,
    targets: &Targets,
    buses: &target::TargetBuses,
    caps: &crate::model::GuestCaps,
    inspect: &crate::model::Inspect,
    output: &OutputSpec,
    out_dir: &Path,
) -> Result<()> {
    match output {
        OutputSpec::Null => Ok(()),
        OutputSpec::Local { .. } | OutputSpec::Libvirt { .. } => {
            let xml = target::libvirt_xml::write(source, targets, buses, caps);
            std::fs::write(out_dir.join(format!("{}.xml", source.effective_name())), xml)
                .map_err(ConvertError::Io)
        }
        OutputSpec::Json { disks_pattern: _, .. } => {
            let json = target::json::write(source, targets, buses, caps, inspect);
            std::fs::write(out_dir.join(format!("{}.json", source.effective_name())), json)
                .map_err(ConvertError::Io)
        }
        OutputSpec::Openstack { .. } => {
            let props = target::openstack::write(source, caps, inspect);
            let text = props
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("\n");
            std::fs::write(
                out_dir.join(format!("{}.openstack.properties", source.effective_name())),
                text,
            )
            .map_err(ConvertError::Io)
        }
        OutputSpec::Rhv { .. } | OutputSpec::Vdsm { .. } => {
            let xml = target::ovf::write(source, targets, buses, caps, target::ovf::OvfFlavour::RHVExportStorageDomain);
            std::fs::write(out_dir.join(format!("{}.ovf", source.effective_name())), xml)
                .map_err(ConvertError::Io)
        }
        OutputSpec::RhvUpload { .. } => Err(ConvertError::UnsupportedSource(
            "RhvUpload requires a live RHV API session, which is outside this crate's collaborator boundary".to_string(),
        )),
    }
}
