use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Whether a NIC's `vnet` names a libvirt bridge or a libvirt network
/// (spec.md §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VnetKind {
    Bridge,
    Network,
}

#[derive(Debug, Error)]
pub enum NetworkMapError {
    #[error("a MAC rule for {0} was already added")]
    DuplicateMac(String),
    #[error("a rule for input {kind:?} name {name:?} was already added")]
    DuplicateInputName { kind: VnetKind, name: String },
    #[error("a default {0:?} rule was already added")]
    DuplicateDefault(VnetKind),
}

/// A triple of mappings with lookup precedence (spec.md §3, §4.8):
/// 1. per-MAC (lowercased key)
/// 2. per-input-vnet-name, split by bridge/network kind
/// 3. default bridge / default network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMap {
    mac_rules: HashMap<String, (VnetKind, String)>,
    bridge_rules: HashMap<String, String>,
    network_rules: HashMap<String, String>,
    default_bridge: Option<String>,
    default_network: Option<String>,
}

/// Result of resolving one NIC, including which rule (if any) fired, so
/// callers can build the `mapping_explanation` string spec.md §4.8 asks
/// for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Mac { vnet: String, kind: VnetKind },
    InputName { vnet: String },
    Default { vnet: String },
    Unchanged,
}

impl NetworkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mac_rule(
        &mut self,
        mac: &str,
        kind: VnetKind,
        out_name: impl Into<String>,
    ) -> Result<(), NetworkMapError> {
        let key = mac.to_lowercase();
        if self.mac_rules.contains_key(&key) {
            return Err(NetworkMapError::DuplicateMac(key));
        }
        self.mac_rules.insert(key, (kind, out_name.into()));
        Ok(())
    }

    pub fn add_bridge_rule(
        &mut self,
        input_name: &str,
        out_name: impl Into<String>,
    ) -> Result<(), NetworkMapError> {
        if self.bridge_rules.contains_key(input_name) {
            return Err(NetworkMapError::DuplicateInputName {
                kind: VnetKind::Bridge,
                name: input_name.to_string(),
            });
        }
        self.bridge_rules
            .insert(input_name.to_string(), out_name.into());
        Ok(())
    }

    pub fn add_network_rule(
        &mut self,
        input_name: &str,
        out_name: impl Into<String>,
    ) -> Result<(), NetworkMapError> {
        if self.network_rules.contains_key(input_name) {
            return Err(NetworkMapError::DuplicateInputName {
                kind: VnetKind::Network,
                name: input_name.to_string(),
            });
        }
        self.network_rules
            .insert(input_name.to_string(), out_name.into());
        Ok(())
    }

    pub fn set_default_bridge(&mut self, out_name: impl Into<String>) -> Result<(), NetworkMapError> {
        if self.default_bridge.is_some() {
            return Err(NetworkMapError::DuplicateDefault(VnetKind::Bridge));
        }
        self.default_bridge = Some(out_name.into());
        Ok(())
    }

    pub fn set_default_network(
        &mut self,
        out_name: impl Into<String>,
    ) -> Result<(), NetworkMapError> {
        if self.default_network.is_some() {
            return Err(NetworkMapError::DuplicateDefault(VnetKind::Network));
        }
        self.default_network = Some(out_name.into());
        Ok(())
    }

    /// Resolve one NIC following the precedence order of spec.md §4.8.
    pub fn resolve(&self, mac: Option<&str>, vnet: &str, kind: VnetKind) -> Resolution {
        if let Some(mac) = mac {
            if let Some((out_kind, out_name)) = self.mac_rules.get(&mac.to_lowercase()) {
                return Resolution::Mac {
                    vnet: out_name.clone(),
                    kind: *out_kind,
                };
            }
        }

        match kind {
            VnetKind::Network => {
                if let Some(out) = self.network_rules.get(vnet) {
                    return Resolution::InputName { vnet: out.clone() };
                }
                if let Some(out) = &self.default_network {
                    return Resolution::Default { vnet: out.clone() };
                }
            }
            VnetKind::Bridge => {
                if let Some(out) = self.bridge_rules.get(vnet) {
                    return Resolution::InputName { vnet: out.clone() };
                }
                if let Some(out) = &self.default_bridge {
                    return Resolution::Default { vnet: out.clone() };
                }
            }
        }

        Resolution::Unchanged
    }
}
