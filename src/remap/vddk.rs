//! VDDK (VMware via nbdkit plugin) transport (spec.md §4.5, SPEC_FULL.md
//! §11).
//!
//! Plugin-option parsing is explicitly out of scope; this module only
//! owns the nbdkit-process/UNIX-socket boundary: launch nbdkit with a
//! caller-supplied opaque argument vector, wait for it to bind its
//! socket, and hand back the `nbd+unix://` URI. Grounded on the
//! teacher's `commands::qemu_system` "spawn, then poll for readiness"
//! idiom, generalized from a TCP monitor socket to a UNIX listen socket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use crate::error::{ConvertError, Result};

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SOCKET_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// A running nbdkit process serving one VMware disk over a UNIX socket.
pub struct VddkPipe {
    pub socket_path: PathBuf,
    pub nbdkit_pid: u32,
    child: Child,
}

impl VddkPipe {
    /// Launch `nbdkit` with `args` (an opaque, pre-parsed argument vector
    /// supplied by the caller — plugin-option parsing is out of scope
    /// here) plus the `--unix <socket_path>` flag this module owns, and
    /// block until the socket file appears.
    pub fn spawn(args: &[String], socket_path: PathBuf) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(ConvertError::Io)?;
        }

        let mut child = Command::new("nbdkit")
            .args(args)
            .arg("--unix")
            .arg(&socket_path)
            .arg("--foreground")
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConvertError::DependencyMissing {
                        tool: "nbdkit".to_string(),
                        suggestion: "install nbdkit and the VDDK plugin".to_string(),
                    }
                } else {
                    ConvertError::Io(e)
                }
            })?;

        let pid = child.id();
        let deadline = Instant::now() + SOCKET_POLL_TIMEOUT;
        loop {
            if socket_path.exists() {
                break;
            }
            if let Some(status) = child.try_wait().map_err(ConvertError::Io)? {
                return Err(ConvertError::ExternalCommandFailed {
                    command: "nbdkit".to_string(),
                    code: status.code(),
                    stderr_tail: "nbdkit exited before creating its UNIX socket".to_string(),
                });
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                return Err(ConvertError::ExternalCommandFailed {
                    command: "nbdkit".to_string(),
                    code: None,
                    stderr_tail: format!(
                        "timed out waiting for {:?} after {:?}",
                        socket_path, SOCKET_POLL_TIMEOUT
                    ),
                });
            }
            std::thread::sleep(SOCKET_POLL_INTERVAL);
        }

        Ok(VddkPipe {
            socket_path,
            nbdkit_pid: pid,
            child,
        })
    }

    /// The `nbd+unix://` URI the copy engine reads from.
    pub fn uri(&self) -> String {
        format!(
            "nbd+unix:///?socket={}",
            self.socket_path.to_string_lossy()
        )
    }
}

impl Drop for VddkPipe {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Transport wrapper handed to the remapper's dispatch (spec.md §4.5:
/// format is always forced to `raw` for VDDK-served disks).
pub struct VddkTransport {
    pipe: VddkPipe,
}

impl VddkTransport {
    pub fn new(args: &[String], socket_path: PathBuf) -> Result<Self> {
        Ok(VddkTransport {
            pipe: VddkPipe::spawn(args, socket_path)?,
        })
    }

    pub fn remap(&self) -> Result<String> {
        Ok(self.pipe.uri())
    }

    pub fn socket_path(&self) -> &Path {
        &self.pipe.socket_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_fails_with_dependency_missing_when_nbdkit_absent() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("nbd.sock");
        // This assumes nbdkit is not on PATH in the test environment; if
        // it is, the spawn would instead succeed or time out. The
        // DependencyMissing path is the one we can assert deterministically
        // without a real VDDK plugin installed.
        let original_path = std::env::var_os("PATH");
        std::env::set_var("PATH", "");
        let result = VddkPipe::spawn(&["--version".to_string()], socket_path);
        if let Some(path) = original_path {
            std::env::set_var("PATH", path);
        }
        assert!(matches!(
            result,
            Err(ConvertError::DependencyMissing { .. })
        ));
    }

    #[test]
    fn uri_wraps_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("nbd.sock");
        std::fs::write(&socket_path, b"").unwrap();
        let pipe = VddkPipe {
            socket_path: socket_path.clone(),
            nbdkit_pid: 0,
            child: Command::new("true").spawn().unwrap(),
        };
        assert_eq!(
            pipe.uri(),
            format!("nbd+unix:///?socket={}", socket_path.to_string_lossy())
        );
    }
}
