//! ESX-over-HTTPS transport (spec.md §4.5).
//!
//! Grounded on the pack's `LNVPS-api::proxmox` client
//! (`reqwest::ClientBuilder` with a relaxed-TLS option for
//! self-signed datastore certificates) — generalized from an async
//! JSON API client to a single memoized-cookie HEAD probe, kept
//! synchronous per spec.md §5 via `reqwest::blocking`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::{ConvertError, Result};

static SESSION_COOKIES: Lazy<Mutex<HashMap<String, String>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Proxy variables cleared before the HTTPS transport is used (spec.md
/// §4.5: "proxies degrade vCenter performance and produce misleading
/// failures").
const PROXY_VARS: &[&str] = &[
    "https_proxy",
    "HTTPS_PROXY",
    "all_proxy",
    "ALL_PROXY",
    "no_proxy",
    "NO_PROXY",
];

pub fn clear_proxy_env() {
    for var in PROXY_VARS {
        std::env::remove_var(var);
    }
}

#[derive(Debug, Clone)]
pub struct EsxHttpsTransport {
    pub server: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub datacenter: String,
    pub datastore: String,
    pub sslverify: bool,
}

impl EsxHttpsTransport {
    /// `[datastore] dir/name.vmdk` -> the `-flat.vmdk` sibling's path
    /// relative to the datastore root (spec.md §4.5's input form).
    fn flat_vmdk_path(path: &Path) -> Result<String> {
        let s = path.to_string_lossy();
        let inner = s.strip_prefix('[').ok_or_else(|| invalid_path(&s))?;
        let close = inner.find(']').ok_or_else(|| invalid_path(&s))?;
        let rest = inner[close + 1..].trim_start().to_string();
        Ok(rest.replace(".vmdk", "-flat.vmdk"))
    }

    fn authority(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host_port()),
            None => self.host_port(),
        }
    }

    fn host_port(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.server, port),
            None => self.server.clone(),
        }
    }

    fn cookie_cache_key(&self) -> String {
        format!("{}|{}", self.server, self.user.as_deref().unwrap_or(""))
    }

    fn session_cookie(&self) -> Result<String> {
        if let Some(cookie) = SESSION_COOKIES.lock().unwrap().get(&self.cookie_cache_key()) {
            return Ok(cookie.clone());
        }

        clear_proxy_env();
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(!self.sslverify)
            .build()
            .map_err(|e| ConvertError::AuthFailed(format!("building HTTPS client: {}", e)))?;

        let url = format!("https://{}/folder", self.host_port());
        let mut req = client.head(&url);
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.as_deref());
        }
        let resp = req
            .send()
            .map_err(|e| ConvertError::AuthFailed(format!("HEAD {}: {}", url, e)))?;

        if resp.status().as_u16() == 401 {
            return Err(ConvertError::AuthFailed(format!(
                "{} rejected credentials (hint: the URI may need an embedded username)",
                self.server
            )));
        }

        let cookie = resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_default();

        SESSION_COOKIES
            .lock()
            .unwrap()
            .insert(self.cookie_cache_key(), cookie.clone());
        Ok(cookie)
    }

    /// Rewrite `path` (a `[datastore] dir/name.vmdk` string) into the
    /// `https://` `-flat.vmdk` URI wrapped in a `json:` document, with
    /// the copy-time 64 MiB readahead hint (spec.md §4.5).
    pub fn remap(&self, path: &Path) -> Result<(String, String)> {
        let cookie = self.session_cookie()?;
        let flat_name = Self::flat_vmdk_path(path)?;
        let url = format!(
            "https://{}/folder/{}?dcPath={}&dsName={}",
            self.authority(),
            flat_name,
            urlencode(&self.datacenter),
            urlencode(&self.datastore)
        );
        let uri = format!(
            "json:{{\"file\":{{\"driver\":\"https\",\"url\":{:?},\"cookie\":{:?},\"sslverify\":{},\"readahead\":67108864}}}}",
            url, cookie, self.sslverify
        );
        Ok((uri, "raw".to_string()))
    }

    /// Same as [`Self::remap`] but without the copy-time readahead hint,
    /// for the inspection-time `FsInspector::add_drive` call (spec.md
    /// §4.5: "force raw... readahead 64 MiB during copy, unset during
    /// inspection").
    pub fn remap_for_inspection(&self, path: &Path) -> Result<String> {
        let cookie = self.session_cookie()?;
        let flat_name = Self::flat_vmdk_path(path)?;
        let url = format!(
            "https://{}/folder/{}?dcPath={}&dsName={}",
            self.authority(),
            flat_name,
            urlencode(&self.datacenter),
            urlencode(&self.datastore)
        );
        Ok(format!(
            "json:{{\"file\":{{\"driver\":\"https\",\"url\":{:?},\"cookie\":{:?},\"sslverify\":{}}}}}",
            url, cookie, self.sslverify
        ))
    }
}

fn invalid_path(s: &str) -> ConvertError {
    ConvertError::SourceParseError {
        path: s.into(),
        message: format!("{:?} is not a `[datastore] path` ESX disk reference", s),
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_datastore_path_rewrites_to_flat_vmdk() {
        let flat =
            EsxHttpsTransport::flat_vmdk_path(Path::new("[datastore1] myvm/myvm.vmdk")).unwrap();
        assert_eq!(flat, "myvm/myvm-flat.vmdk");
    }

    #[test]
    fn split_datastore_path_rejects_non_bracket_form() {
        assert!(EsxHttpsTransport::flat_vmdk_path(Path::new("/plain/path.vmdk")).is_err());
    }

    #[test]
    fn urlencode_escapes_spaces() {
        assert_eq!(urlencode("my dc"), "my%20dc");
    }

    #[test]
    fn clear_proxy_env_removes_all_variants() {
        for var in PROXY_VARS {
            std::env::set_var(var, "http://proxy.example:8080");
        }
        clear_proxy_env();
        for var in PROXY_VARS {
            assert!(std::env::var(var).is_err());
        }
    }
}
