//! VMware VMX parser (spec.md §4.4).
//!
//! VMX is a flat key/value syntax with case-insensitive dotted
//! namespaces and a `|XX` pipe-hex escape. Keys are folded to lowercase
//! and organized into a tree keyed by dot-segments so that a namespace
//! whose `present = "FALSE"` can be dropped along with its whole subtree.

use std::collections::BTreeMap;
use std::fmt;

/// One parsed VMX document, as a tree of dot-separated namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vmx {
    /// Fully-qualified lowercase key (e.g. `scsi0:0.filename`) -> value.
    entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmxWarning(pub String);

impl fmt::Display for VmxWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Vmx {
    /// Parse a VMX document, collecting non-fatal warnings (duplicate
    /// keys keep the first value per spec.md §4.4).
    pub fn parse(text: &str) -> (Self, Vec<VmxWarning>) {
        let mut entries = BTreeMap::new();
        let mut warnings = Vec::new();

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some(eq) = line.find('=') else {
                warnings.push(VmxWarning(format!(
                    "line {}: no '=' found, skipping: {:?}",
                    lineno + 1,
                    raw_line
                )));
                continue;
            };
            let key = line[..eq].trim().to_lowercase();
            let raw_value = line[eq + 1..].trim();
            let value = match unquote_and_unescape(raw_value) {
                Some(v) => v,
                None => {
                    warnings.push(VmxWarning(format!(
                        "line {}: malformed quoted value, skipping: {:?}",
                        lineno + 1,
                        raw_line
                    )));
                    continue;
                }
            };

            if entries.contains_key(&key) {
                warnings.push(VmxWarning(format!(
                    "duplicate key {:?}, keeping first value",
                    key
                )));
                continue;
            }
            entries.insert(key, value);
        }

        let mut vmx = Self { entries };
        vmx.drop_absent_namespaces();
        (vmx, warnings)
    }

    /// Remove every key under any dot-segment prefix whose own
    /// `<prefix>.present` value is boolean-false (spec.md §4.4).
    fn drop_absent_namespaces(&mut self) {
        let absent_prefixes: Vec<String> = self
            .entries
            .iter()
            .filter_map(|(k, v)| {
                k.strip_suffix(".present")
                    .filter(|_| parse_bool(v) == Some(false))
                    .map(|prefix| prefix.to_string())
            })
            .collect();

        if absent_prefixes.is_empty() {
            return;
        }

        self.entries.retain(|k, _| {
            !absent_prefixes
                .iter()
                .any(|p| k == p || k.starts_with(&format!("{}.", p)) || k.starts_with(&format!("{}:", p)))
        });
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_lowercase()).map(|s| s.as_str())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get_string(key).and_then(|v| v.parse::<i64>().ok())
    }

    pub fn get_int64(&self, key: &str) -> Option<i64> {
        self.get_int(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_string(key).and_then(parse_bool)
    }

    /// All keys that exist directly under a dot-segment prefix, e.g.
    /// `keys_under("scsi0:0")` for `scsi0:0.filename`, `scsi0:0.present`.
    pub fn keys_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let dotted = format!("{}.", prefix);
        self.entries.keys().filter_map(move |k| {
            k.strip_prefix(&dotted)
                .filter(|rest| !rest.contains('.') && !rest.contains(':'))
        })
    }

    /// Whether any key exists under the exact dot/colon-segment prefix.
    pub fn namespace_exists(&self, prefix: &str) -> bool {
        self.entries
            .keys()
            .any(|k| k == prefix || k.starts_with(&format!("{}.", prefix)) || k.starts_with(&format!("{}:", prefix)))
    }

    /// Serialize back to VMX text, escaping values the same way the
    /// parser unescapes them. Used by the round-trip property test
    /// (spec.md §8: `parse . serialize . parse == parse`).
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push_str(" = \"");
            out.push_str(&escape(v));
            out.push_str("\"\n");
        }
        out
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Strip surrounding double quotes and unescape `|XX` hex sequences.
fn unquote_and_unescape(raw: &str) -> Option<String> {
    let inner = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    unescape(inner)
}

fn unescape(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'|' {
            if i + 2 >= bytes.len() {
                return None;
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            out.push(byte as char);
            i += 3;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    Some(out)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("|22"),
            b'|' => out.push_str("|7C"),
            _ => out.push(b as char),
        }
    }
    out
}
