//! Parameter mapping table: flat legacy keys to JSON tree paths, with
//! optional value converters and validation metadata, plus named
//! presets that inject a group of overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::ConfigError;

/// Declarative value converter between the flat-key form and the JSON
/// tree form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Converter {
    /// Boolean as `"true"/"false"` on the flat side, `"1"/"0"` in the
    /// JSON tree.
    Bool01,
}

impl Converter {
    /// Flat-side value to JSON-tree value.
    pub fn to_json(self, value: &str) -> String {
        match self {
            Converter::Bool01 => {
                if value == "true" || value == "1" {
                    "1".into()
                } else {
                    "0".into()
                }
            }
        }
    }

    /// JSON-tree value to flat-side value.
    pub fn from_json(self, value: &str) -> String {
        match self {
            Converter::Bool01 => {
                if value == "1" {
                    "true".into()
                } else {
                    "false".into()
                }
            }
        }
    }
}

/// Validation metadata for one mapped key. Unknown rules are absent
/// here by construction; a value with no applicable rule is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Allowed literal values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Inclusive numeric minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive numeric maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Glob pattern (`*` and `?` wildcards, otherwise literal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ValidationRule {
    /// Check one value, appending human-readable findings to `errors`.
    /// Returns `true` when the value passes every present rule.
    pub fn check(&self, key: &str, value: &str, errors: &mut Vec<String>) -> bool {
        let before = errors.len();
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| a == value) {
                errors.push(format!("{key}: value '{value}' not in allowed values"));
            }
        }
        if self.min.is_some() || self.max.is_some() {
            match value.parse::<f64>() {
                Ok(num) => {
                    if let Some(min) = self.min {
                        if num < min {
                            errors.push(format!("{key}: value {value} below minimum {min}"));
                        }
                    }
                    if let Some(max) = self.max {
                        if num > max {
                            errors.push(format!("{key}: value {value} above maximum {max}"));
                        }
                    }
                }
                Err(_) => errors.push(format!("{key}: value '{value}' is not numeric")),
            }
        }
        if let Some(pattern) = &self.pattern {
            if !glob_match(pattern, value) {
                errors.push(format!("{key}: value '{value}' does not match pattern"));
            }
        }
        errors.len() == before
    }
}

/// Mapping entry for one flat key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyMapping {
    /// Dotted path into the JSON config tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    /// Flat-to-tree value converter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_json: Option<Converter>,
    /// Tree-to-flat value converter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_json: Option<Converter>,
    /// Validation metadata applied to the effective value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,
}

/// One named preset: a fixed group of flat-key overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

/// The full mapping file: `mappings.<flat_key>` plus `presets.<name>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingTable {
    #[serde(default)]
    pub mappings: BTreeMap<String, KeyMapping>,
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

impl MappingTable {
    /// Load the table from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseMapping {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve a flat key to its JSON tree path, or echo the key back
    /// when no mapping exists.
    pub fn json_path<'a>(&'a self, flat_key: &'a str) -> &'a str {
        self.mappings
            .get(flat_key)
            .and_then(|m| m.json_path.as_deref())
            .unwrap_or(flat_key)
    }

    pub fn entry(&self, flat_key: &str) -> Option<&KeyMapping> {
        self.mappings.get(flat_key)
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// Build the reverse cache: JSON tree path back to flat key.
    pub fn reverse_map(&self) -> BTreeMap<String, String> {
        self.mappings
            .iter()
            .filter_map(|(flat, m)| m.json_path.clone().map(|p| (p, flat.clone())))
            .collect()
    }
}

/// Minimal glob matcher: `*` matches any run, `?` any single char,
/// everything else is literal.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();

    // Iterative wildcard match with backtracking over the last `*`.
    let (mut pi, mut vi) = (0usize, 0usize);
    let (mut star, mut star_v) = (None::<usize>, 0usize);
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_v = vi;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_v += 1;
            vi = star_v;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
