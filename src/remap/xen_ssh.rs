//! Xen-over-SSH transport (spec.md §4.5).
//!
//! Grounded on the pack's `LNVPS-api::ssh_client::SshClient`
//! (`ssh2::Session` over a raw socket, `channel_session` + `exec`),
//! de-async'd to a plain `std::net::TcpStream` handshake to match the
//! single-threaded synchronous core (spec.md §5).

use std::io::Read;
use std::net::TcpStream;

use crate::error::{ConvertError, Result};

#[derive(Debug, Clone)]
pub struct XenSshTransport {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
}

impl XenSshTransport {
    /// Build the `json:{file.driver=ssh,...}` URI for a remote disk path
    /// (spec.md §4.5). The format is left untouched by this transport.
    pub fn remap(&self, path: &std::path::Path) -> String {
        let mut fields = vec![
            format!("\"driver\":\"ssh\""),
            format!("\"path\":{:?}", path.to_string_lossy()),
            format!("\"host\":{:?}", self.host),
        ];
        if let Some(port) = self.port {
            if port != 22 {
                fields.push(format!("\"port\":{}", port));
            }
        }
        if let Some(user) = &self.user {
            fields.push(format!("\"user\":{:?}", user));
        }
        fields.push("\"host_key_check\":\"no\"".to_string());
        format!("json:{{\"file\":{{{}}}}}", fields.join(","))
    }

    /// Open a synchronous SSH session and stat a remote file's size,
    /// used to sanity-check a disk reference before it is handed to the
    /// copy engine. Not required for every disk; callers invoke it only
    /// when a pre-flight check is requested.
    pub fn stat_remote_size(&self, path: &std::path::Path) -> Result<u64> {
        let addr = format!("{}:{}", self.host, self.port.unwrap_or(22));
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| ConvertError::AuthFailed(format!("connecting to {}: {}", addr, e)))?;

        let mut session = ssh2::Session::new()
            .map_err(|e| ConvertError::AuthFailed(format!("creating SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| ConvertError::AuthFailed(format!("SSH handshake with {}: {}", addr, e)))?;

        let user = self.user.as_deref().unwrap_or("root");
        session
            .userauth_agent(user)
            .map_err(|e| ConvertError::AuthFailed(format!("{} agent auth: {}", user, e)))?;
        if !session.authenticated() {
            return Err(ConvertError::AuthFailed(format!(
                "{} rejected credentials (hint: the URI may need a username)",
                self.host
            )));
        }

        let mut channel = session
            .channel_session()
            .map_err(|e| ConvertError::AuthFailed(format!("opening channel: {}", e)))?;
        let command = format!("stat -c %s {:?}", path.to_string_lossy());
        channel
            .exec(&command)
            .map_err(|e| ConvertError::AuthFailed(format!("exec {}: {}", command, e)))?;
        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| ConvertError::AuthFailed(format!("reading stat output: {}", e)))?;
        channel.wait_close().ok();

        output.trim().parse::<u64>().map_err(|_| {
            ConvertError::SourceParseError {
                path: path.to_path_buf(),
                message: format!("remote stat of {:?} did not return a size", path),
            }
        })
    }
}
