//! The `FsInspector` boundary (spec.md §6).
//!
//! The hypervisor-agnostic guest-filesystem inspection library is a
//! collaborator, not something this crate implements (spec.md §1's
//! explicit non-goal). This module only owns the trait the Linux and
//! Windows converters are written against, following the same
//! trait-plus-`Null*`-fallback shape as [`crate::source::libvirt_xml::VolumeResolver`].

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::Inspect;

/// One partition-table entry as reported by `list_partitions`/
/// `part_get_gpt_type` (spec.md §6).
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub device: PathBuf,
    pub gpt_type_guid: Option<String>,
}

/// Device/inode pair identifying a file independent of the path used to
/// reach it (spec.md §4.6: bootloader menu entries must be matched
/// against installed kernels by identity, not by path, since `/boot` is
/// commonly a symlink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

/// The registry value type a hive node's value is stored as (hivex's
/// `REG_SZ`/`REG_EXPAND_SZ`/`REG_DWORD` and friends, narrowed to the
/// variants the Windows converter writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiveValueType {
    Sz,
    ExpandSz,
    Dword,
}

/// Guest-filesystem inspection surface (spec.md §6): drive attachment,
/// OS-root discovery, typed inspection, mounting, a small file-tree API,
/// Augeas configuration editing, registry hive access, and partition
/// tools. Every call is synchronous, matching the single-threaded core
/// (spec.md §5).
pub trait FsInspector {
    fn add_drive(&mut self, uri: &str, readonly: bool) -> Result<()>;
    fn launch(&mut self) -> Result<()>;
    fn list_os_roots(&self) -> Result<Vec<PathBuf>>;
    fn inspect(&self, root: &Path) -> Result<Inspect>;
    fn mount(&mut self, device: &Path, mountpoint: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> Result<bool>;
    fn is_file(&self, path: &Path) -> Result<bool>;
    fn ls(&self, path: &Path) -> Result<Vec<String>>;
    fn find(&self, path: &Path) -> Result<Vec<PathBuf>>;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()>;
    fn cp(&mut self, src: &Path, dst: &Path) -> Result<()>;
    fn stat(&self, path: &Path) -> Result<FileId>;

    fn aug_init(&mut self, root: &Path) -> Result<()>;
    fn aug_match(&self, expr: &str) -> Result<Vec<String>>;
    fn aug_get(&self, path: &str) -> Result<Option<String>>;
    fn aug_set(&mut self, path: &str, value: &str) -> Result<()>;
    fn aug_rm(&mut self, path: &str) -> Result<()>;
    fn aug_save(&mut self) -> Result<()>;
    fn aug_load(&mut self) -> Result<()>;

    fn hivex_open(&mut self, path: &Path, write: bool) -> Result<HiveHandle>;
    fn hivex_root(&self, hive: HiveHandle) -> Result<HiveNode>;
    fn hivex_node_get_child(&self, hive: HiveHandle, node: HiveNode, name: &str)
        -> Result<Option<HiveNode>>;
    fn hivex_node_add_child(&mut self, hive: HiveHandle, parent: HiveNode, name: &str) -> Result<HiveNode>;
    fn hivex_node_set_value(
        &mut self,
        hive: HiveHandle,
        node: HiveNode,
        name: &str,
        value_type: HiveValueType,
        data: &str,
    ) -> Result<()>;
    fn hivex_commit(&mut self, hive: HiveHandle) -> Result<()>;
    fn hivex_close(&mut self, hive: HiveHandle) -> Result<()>;

    fn list_partitions(&self, device: &Path) -> Result<Vec<PartitionInfo>>;
    fn part_get_gpt_type(&self, partition: &Path) -> Result<Option<String>>;
    fn part_set_gpt_type(&mut self, partition: &Path, type_guid: &str) -> Result<()>;
}

/// Opaque handle to an open registry hive, scoped to one `FsInspector`
/// session (spec.md §6's `hivex_open`/`hivex_close` pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HiveHandle(pub u32);

/// Opaque handle to a node within an open hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HiveNode(pub u64);

/// A no-op inspector that fails every call with `UnsupportedSource`. Used
/// where a caller has no live libvirt/guestfs backend wired up yet (e.g.
/// unit tests of code that only needs the trait object to exist).
pub struct NullFsInspector;

impl FsInspector for NullFsInspector {
    fn add_drive(&mut self, _uri: &str, _readonly: bool) -> Result<()> {
        Err(unsupported("add_drive"))
    }
    fn launch(&mut self) -> Result<()> {
        Err(unsupported("launch"))
    }
    fn list_os_roots(&self) -> Result<Vec<PathBuf>> {
        Err(unsupported("list_os_roots"))
    }
    fn inspect(&self, _root: &Path) -> Result<Inspect> {
        Err(unsupported("inspect"))
    }
    fn mount(&mut self, _device: &Path, _mountpoint: &Path) -> Result<()> {
        Err(unsupported("mount"))
    }
    fn exists(&self, _path: &Path) -> Result<bool> {
        Err(unsupported("exists"))
    }
    fn is_file(&self, _path: &Path) -> Result<bool> {
        Err(unsupported("is_file"))
    }
    fn ls(&self, _path: &Path) -> Result<Vec<String>> {
        Err(unsupported("ls"))
    }
    fn find(&self, _path: &Path) -> Result<Vec<PathBuf>> {
        Err(unsupported("find"))
    }
    fn read_file(&self, _path: &Path) -> Result<Vec<u8>> {
        Err(unsupported("read_file"))
    }
    fn write(&mut self, _path: &Path, _contents: &[u8]) -> Result<()> {
        Err(unsupported("write"))
    }
    fn cp(&mut self, _src: &Path, _dst: &Path) -> Result<()> {
        Err(unsupported("cp"))
    }
    fn stat(&self, _path: &Path) -> Result<FileId> {
        Err(unsupported("stat"))
    }
    fn aug_init(&mut self, _root: &Path) -> Result<()> {
        Err(unsupported("aug_init"))
    }
    fn aug_match(&self, _expr: &str) -> Result<Vec<String>> {
        Err(unsupported("aug_match"))
    }
    fn aug_get(&self, _path: &str) -> Result<Option<String>> {
        Err(unsupported("aug_get"))
    }
    fn aug_set(&mut self, _path: &str, _value: &str) -> Result<()> {
        Err(unsupported("aug_set"))
    }
    fn aug_rm(&mut self, _path: &str) -> Result<()> {
        Err(unsupported("aug_rm"))
    }
    fn aug_save(&mut self) -> Result<()> {
        Err(unsupported("aug_save"))
    }
    fn aug_load(&mut self) -> Result<()> {
        Err(unsupported("aug_load"))
    }
    fn hivex_open(&mut self, _path: &Path, _write: bool) -> Result<HiveHandle> {
        Err(unsupported("hivex_open"))
    }
    fn hivex_root(&self, _hive: HiveHandle) -> Result<HiveNode> {
        Err(unsupported("hivex_root"))
    }
    fn hivex_node_get_child(
        &self,
        _hive: HiveHandle,
        _node: HiveNode,
        _name: &str,
    ) -> Result<Option<HiveNode>> {
        Err(unsupported("hivex_node_get_child"))
    }
    fn hivex_node_add_child(&mut self, _hive: HiveHandle, _parent: HiveNode, _name: &str) -> Result<HiveNode> {
        Err(unsupported("hivex_node_add_child"))
    }
    fn hivex_node_set_value(
        &mut self,
        _hive: HiveHandle,
        _node: HiveNode,
        _name: &str,
        _value_type: HiveValueType,
        _data: &str,
    ) -> Result<()> {
        Err(unsupported("hivex_node_set_value"))
    }
    fn hivex_commit(&mut self, _hive: HiveHandle) -> Result<()> {
        Err(unsupported("hivex_commit"))
    }
    fn hivex_close(&mut self, _hive: HiveHandle) -> Result<()> {
        Err(unsupported("hivex_close"))
    }
    fn list_partitions(&self, _device: &Path) -> Result<Vec<PartitionInfo>> {
        Err(unsupported("list_partitions"))
    }
    fn part_get_gpt_type(&self, _partition: &Path) -> Result<Option<String>> {
        Err(unsupported("part_get_gpt_type"))
    }
    fn part_set_gpt_type(&mut self, _partition: &Path, _type_guid: &str) -> Result<()> {
        Err(unsupported("part_set_gpt_type"))
    }
}

fn unsupported(call: &str) -> crate::error::ConvertError {
    crate::error::ConvertError::UnsupportedSource(format!(
        "{} requires a live guest-inspection backend, none provided",
        call
    ))
}
