//! Externally supplied label → class id mapping.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::PipelineError;

/// Maps annotation labels to YOLO class ids, preserving insertion order.
///
/// The order is significant: it is the order class names are listed in the
/// dataset manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassMap {
    entries: Vec<(String, u32)>,
}

impl ClassMap {
    /// Builds a class map from `(label, id)` pairs.
    ///
    /// Rejects empty maps, empty labels, duplicate labels and duplicate ids.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut entries = Vec::new();
        let mut seen_labels = HashSet::new();
        let mut seen_ids = HashSet::new();

        for (label, id) in pairs {
            let label = label.into();
            if label.trim().is_empty() {
                return Err(PipelineError::InvalidClassMap {
                    message: "class labels must not be empty".to_string(),
                });
            }
            if !seen_labels.insert(label.clone()) {
                return Err(PipelineError::InvalidClassMap {
                    message: format!("duplicate label '{label}'"),
                });
            }
            if !seen_ids.insert(id) {
                return Err(PipelineError::InvalidClassMap {
                    message: format!("duplicate class id {id} (label '{label}')"),
                });
            }
            entries.push((label, id));
        }

        if entries.is_empty() {
            return Err(PipelineError::InvalidClassMap {
                message: "class map is empty".to_string(),
            });
        }

        Ok(Self { entries })
    }

    /// Builds a class map from names, assigning ids by position.
    pub fn from_names<I, S>(names: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_pairs(
            names
                .into_iter()
                .enumerate()
                .map(|(idx, name)| (name, idx as u32)),
        )
    }

    /// Loads a class map from a YAML file.
    ///
    /// Accepted shapes:
    /// - `names: [a, b]` (ids by position)
    /// - `names: {0: a, 1: b}` (ids from keys)
    /// - a top-level `{a: 0, b: 1}` mapping (insertion order kept)
    pub fn from_yaml_file(path: &Path) -> Result<Self, PipelineError> {
        let data = fs::read_to_string(path).map_err(PipelineError::Io)?;
        Self::from_yaml_str(&data).map_err(|err| match err {
            ClassMapYamlError::Yaml(source) => PipelineError::YamlParse {
                path: path.to_path_buf(),
                source,
            },
            ClassMapYamlError::Invalid(err) => err,
        })
    }

    fn from_yaml_str(data: &str) -> Result<Self, ClassMapYamlError> {
        let parsed: ClassMapFile = serde_yaml::from_str(data).map_err(ClassMapYamlError::Yaml)?;

        let map = match parsed {
            ClassMapFile::Names {
                names: NamesField::Sequence(names),
            } => Self::from_names(names),
            ClassMapFile::Names {
                names: NamesField::Mapping(by_id),
            } => Self::from_pairs(by_id.into_iter().map(|(id, name)| (name, id))),
            ClassMapFile::Labels(mapping) => {
                let mut pairs = Vec::with_capacity(mapping.len());
                for (key, value) in mapping {
                    let label = match key {
                        serde_yaml::Value::String(s) => s,
                        serde_yaml::Value::Number(n) => n.to_string(),
                        other => {
                            return Err(ClassMapYamlError::Invalid(
                                PipelineError::InvalidClassMap {
                                    message: format!("unsupported label key {other:?}"),
                                },
                            ));
                        }
                    };
                    let id = value
                        .as_u64()
                        .and_then(|id| u32::try_from(id).ok())
                        .ok_or_else(|| {
                            ClassMapYamlError::Invalid(PipelineError::InvalidClassMap {
                                message: format!("class id for '{label}' must be a u32"),
                            })
                        })?;
                    pairs.push((label, id));
                }
                Self::from_pairs(pairs)
            }
        };

        map.map_err(ClassMapYamlError::Invalid)
    }

    /// Looks up the class id for a label.
    pub fn get(&self, label: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, id)| *id)
    }

    /// Class names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses a `label=id` pair as given on the command line.
pub fn parse_class_pair(raw: &str) -> Result<(String, u32), String> {
    let (label, id) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected LABEL=ID, got '{raw}'"))?;
    let id = id
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid class id '{id}' in '{raw}'"))?;
    Ok((label.trim().to_string(), id))
}

#[derive(Debug)]
enum ClassMapYamlError {
    Yaml(serde_yaml::Error),
    Invalid(PipelineError),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassMapFile {
    Names { names: NamesField },
    Labels(serde_yaml::Mapping),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NamesField {
    Sequence(Vec<String>),
    Mapping(BTreeMap<u32, String>),
}
