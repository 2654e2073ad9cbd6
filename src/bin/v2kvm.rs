use clap::Parser;
use std::path::PathBuf;

use v2kvm_core::config::Config;
use v2kvm_core::copier::QemuImgCopier;
use v2kvm_core::inspector::NullFsInspector;
use v2kvm_core::model::{NetworkMap, RequestedGuestCaps, VnetKind};
use v2kvm_core::remap::{EsxHttpsTransport, Transport, VddkTransport, XenSshTransport};
use v2kvm_core::request::{ConvertRequest, OutputSpec, RootChoice, SourceSpec};

#[derive(Parser)]
#[command(name = "v2kvm")]
#[command(author = "Mark Roboff")]
#[command(version = "0.1.0")]
#[command(about = "Convert a powered-off Xen/VMware/libvirt/OVA guest to run natively on KVM/QEMU")]
struct Cli {
    /// Exported libvirt domain XML to convert from.
    #[arg(long, group = "source", conflicts_with_all = ["ova", "disk"])]
    libvirt_xml: Option<PathBuf>,

    /// OVA bundle (directory, tar, or tar.gz/xz) to convert from.
    #[arg(long, group = "source", conflicts_with_all = ["libvirt_xml", "disk"])]
    ova: Option<PathBuf>,

    /// A bare disk image to convert from, with no source hypervisor metadata.
    #[arg(long, group = "source", conflicts_with_all = ["libvirt_xml", "ova"])]
    disk: Option<PathBuf>,

    /// Format of `--disk`, if it cannot be guessed from the extension.
    #[arg(long, requires = "disk")]
    disk_format: Option<String>,

    /// Directory to write local output artifacts into.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Output kind: local (libvirt XML), json, openstack, rhv, vdsm, or null.
    #[arg(long, default_value = "local")]
    output: String,

    /// ESXi/vCenter host to fetch VMDK disks from over HTTPS.
    #[arg(long)]
    esx_host: Option<String>,
    #[arg(long)]
    esx_port: Option<u16>,
    #[arg(long)]
    esx_user: Option<String>,
    #[arg(long)]
    esx_password: Option<String>,
    #[arg(long, requires = "esx_host")]
    esx_datacenter: Option<String>,
    #[arg(long, requires = "esx_host")]
    esx_datastore: Option<String>,
    /// Skip TLS certificate verification against the ESX/vCenter host.
    #[arg(long, default_value_t = false)]
    esx_insecure: bool,

    /// Xen host to fetch disks from over SSH.
    #[arg(long)]
    xen_ssh_host: Option<String>,
    #[arg(long)]
    xen_ssh_port: Option<u16>,
    #[arg(long)]
    xen_ssh_user: Option<String>,

    /// Pre-built nbdkit argument vector for a VDDK source (opaque, passed through as-is).
    #[arg(long)]
    vddk_nbdkit_arg: Vec<String>,

    /// Requested guest storage bus (virtio-blk, virtio-scsi, ide, sata, scsi).
    #[arg(long)]
    block_bus: Option<String>,

    /// Network-map rule `mac=bridge:name` or `mac=network:name`, repeatable.
    #[arg(long = "network-map")]
    network_map: Vec<String>,

    /// Default network all unmapped NICs fall back to.
    #[arg(long)]
    default_network: Option<String>,

    /// Multi-boot root selection: ask, single, first, or a /dev path.
    #[arg(long, default_value = "first")]
    root: String,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: Cli) -> v2kvm_core::error::Result<()> {
    use v2kvm_core::error::ConvertError;

    let config = Config::load().unwrap_or_default();

    let source = if let Some(path) = cli.libvirt_xml {
        SourceSpec::LibvirtXml { path }
    } else if let Some(path) = cli.ova {
        SourceSpec::Ova { path }
    } else if let Some(path) = cli.disk {
        SourceSpec::Disk {
            path,
            format: cli.disk_format,
        }
    } else {
        return Err(ConvertError::InvalidArgument(
            "one of --libvirt-xml, --ova, or --disk is required".to_string(),
        ));
    };

    let transport = if let Some(server) = cli.esx_host {
        Transport::EsxHttps(EsxHttpsTransport {
            server,
            port: cli.esx_port,
            user: cli.esx_user,
            password: cli.esx_password,
            datacenter: cli.esx_datacenter.unwrap_or_default(),
            datastore: cli.esx_datastore.unwrap_or_default(),
            sslverify: !cli.esx_insecure,
        })
    } else if let Some(host) = cli.xen_ssh_host {
        Transport::XenSsh(XenSshTransport {
            host,
            port: cli.xen_ssh_port,
            user: cli.xen_ssh_user,
        })
    } else if !cli.vddk_nbdkit_arg.is_empty() {
        let socket_path = std::env::temp_dir().join(format!("v2kvm-vddk-{}.sock", std::process::id()));
        Transport::Vddk(VddkTransport::new(&cli.vddk_nbdkit_arg, socket_path)?)
    } else {
        Transport::Local
    };

    let mut network_map = NetworkMap::new();
    for rule in &cli.network_map {
        apply_network_map_rule(&mut network_map, rule)?;
    }
    if let Some(default) = cli.default_network.or(config.default_network.clone()) {
        network_map
            .set_default_network(default)
            .map_err(|e| ConvertError::InvalidArgument(e.to_string()))?;
    }
    if let Some(default) = config.default_bridge.clone() {
        network_map
            .set_default_bridge(default)
            .map_err(|e| ConvertError::InvalidArgument(e.to_string()))?;
    }

    let requested_caps = RequestedGuestCaps {
        block_bus: cli.block_bus.as_deref().map(parse_block_bus).transpose()?,
        net_bus: None,
        video: None,
    };

    let root_choice = parse_root_choice(&cli.root)?;

    let output = parse_output(&cli.output, &cli.output_dir)?;

    let request = ConvertRequest {
        source,
        requested_caps,
        network_map,
        output,
        root_choice,
    };

    let mut inspector = NullFsInspector;
    let copier = QemuImgCopier;

    let report = v2kvm_core::pipeline::run(&request, &transport, &mut inspector, &copier)?;
    for warning in report.warnings.iter() {
        log::warn!("{warning}");
    }

    println!("conversion complete: {}", cli.output_dir.display());
    Ok(())
}

fn apply_network_map_rule(
    map: &mut NetworkMap,
    rule: &str,
) -> v2kvm_core::error::Result<()> {
    use v2kvm_core::error::ConvertError;

    let (mac, target) = rule.split_once('=').ok_or_else(|| {
        ConvertError::InvalidArgument(format!("invalid --network-map rule {rule:?}, expected mac=kind:name"))
    })?;
    let (kind, name) = target.split_once(':').ok_or_else(|| {
        ConvertError::InvalidArgument(format!("invalid --network-map rule {rule:?}, expected mac=kind:name"))
    })?;
    let kind = match kind {
        "bridge" => VnetKind::Bridge,
        "network" => VnetKind::Network,
        other => {
            return Err(ConvertError::InvalidArgument(format!(
                "unknown network-map kind {other:?}, expected bridge or network"
            )))
        }
    };
    map.add_mac_rule(mac, kind, name)
        .map_err(|e| ConvertError::InvalidArgument(e.to_string()))
}

fn parse_block_bus(s: &str) -> v2kvm_core::error::Result<v2kvm_core::model::BlockBus> {
    use v2kvm_core::error::ConvertError;
    use v2kvm_core::model::BlockBus;

    match s {
        "virtio-blk" => Ok(BlockBus::VirtioBlk),
        "virtio-scsi" => Ok(BlockBus::VirtioSCSI),
        "ide" => Ok(BlockBus::Ide),
        "sata" => Ok(BlockBus::Sata),
        "scsi" => Ok(BlockBus::Scsi),
        other => Err(ConvertError::InvalidArgument(format!(
            "unknown --block-bus {other:?}, expected virtio-blk, virtio-scsi, ide, sata, or scsi"
        ))),
    }
}

fn parse_root_choice(s: &str) -> v2kvm_core::error::Result<RootChoice> {
    use v2kvm_core::error::ConvertError;

    match s {
        "ask" => Ok(RootChoice::Ask),
        "single" => Ok(RootChoice::Single),
        "first" => Ok(RootChoice::First),
        dev if dev.starts_with('/') => Ok(RootChoice::Dev(PathBuf::from(dev))),
        other => Err(ConvertError::InvalidArgument(format!(
            "unknown --root {other:?}, expected ask, single, first, or a /dev path"
        ))),
    }
}

fn parse_output(
    kind: &str,
    dir: &PathBuf,
) -> v2kvm_core::error::Result<OutputSpec> {
    use v2kvm_core::error::ConvertError;

    match kind {
        "local" => Ok(OutputSpec::Local { dir: dir.clone() }),
        "json" => Ok(OutputSpec::Json {
            dir: dir.clone(),
            disks_pattern: "%n-%d.%e".to_string(),
        }),
        "null" => Ok(OutputSpec::Null),
        "openstack" => Ok(OutputSpec::Openstack {
            server_id: String::new(),
            guest_id: String::new(),
            dev_disk_by_id: false,
        }),
        "rhv" => Ok(OutputSpec::Rhv {
            storage_domain_path: dir.clone(),
            image_uuids: None,
            vol_uuids: None,
            vm_uuid: None,
            vmtype: None,
            compat: v2kvm_core::request::RhvCompat::V1_1,
        }),
        "vdsm" => Ok(OutputSpec::Vdsm {
            storage_domain_path: dir.clone(),
            image_uuids: None,
            vol_uuids: None,
        }),
        other => Err(ConvertError::InvalidArgument(format!(
            "unknown --output {other:?}, expected local, json, openstack, rhv, vdsm, or null"
        ))),
    }
}

