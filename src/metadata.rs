//! Dynamic metadata bag for ASR records (§9 design note): a tagged-variant
//! tree so canonicalization is total and unambiguous, independent of any
//! particular serde backend's map-ordering quirks.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A scalar-or-nested metadata value. No floats other than integers cast
/// losslessly (§3) — hence `Int(i64)` and no `Float` variant at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn map() -> Self {
        MetadataValue::Map(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) -> &mut Self {
        if let MetadataValue::Map(m) = self {
            m.insert(key.into(), value);
        }
        self
    }

    /// Render this value into its canonical textual form: sorted keys
    /// (guaranteed by `BTreeMap`), fixed integer formatting, no
    /// insignificant whitespace, UTF-8 throughout.
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            MetadataValue::Null => out.push_str("null"),
            MetadataValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            MetadataValue::Int(i) => {
                let _ = write!(out, "{i}");
            }
            MetadataValue::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        c if (c as u32) < 0x20 => {
                            let _ = write!(out, "\\u{:04x}", c as u32);
                        }
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            MetadataValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            MetadataValue::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    MetadataValue::Str(k.clone()).write_canonical(out);
                    out.push(':');
                    v.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_sorts_keys_and_is_deterministic() {
        let mut m = MetadataValue::map();
        m.insert("zebra", 1i64.into());
        m.insert("alpha", "x".into());
        let mut m2 = MetadataValue::map();
        m2.insert("alpha", "x".into());
        m2.insert("zebra", 1i64.into());
        assert_eq!(m.to_canonical_string(), m2.to_canonical_string());
        assert_eq!(m.to_canonical_string(), r#"{"alpha":"x","zebra":1}"#);
    }

    #[test]
    fn escapes_control_characters_in_strings() {
        let v = MetadataValue::Str("line\nbreak\"quote".to_string());
        assert_eq!(v.to_canonical_string(), r#""line\nbreak\"quote""#);
    }
}
