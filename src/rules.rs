use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::models::FlagRule;

#[derive(Debug, Error)]
pub enum RuleBookError {
    #[error("failed to access rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rule file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no flag rule with id {0}")]
    NotFound(Uuid),
}

/// User-editable flag rules persisted as a JSON array.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    pub rules: Vec<FlagRule>,
}

impl RuleBook {
    /// A missing file is an empty rule book.
    pub fn load(path: &Path) -> Result<Self, RuleBookError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(RuleBookError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let rules = serde_json::from_str(&raw).map_err(|source| RuleBookError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { rules })
    }

    pub fn save(&self, path: &Path) -> Result<(), RuleBookError> {
        let body = serde_json::to_string_pretty(&self.rules).map_err(|source| {
            RuleBookError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        std::fs::write(path, body).map_err(|source| RuleBookError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn add(&mut self, rule: FlagRule) -> Uuid {
        let id = rule.id;
        self.rules.push(rule);
        id
    }

    pub fn remove(&mut self, id: Uuid) -> Result<FlagRule, RuleBookError> {
        let index = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or(RuleBookError::NotFound(id))?;
        Ok(self.rules.remove(index))
    }

    pub fn set_active(&mut self, id: Uuid, active: bool) -> Result<(), RuleBookError> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RuleBookError::NotFound(id))?;
        rule.active = active;
        Ok(())
    }

    pub fn active(&self) -> impl Iterator<Item = &FlagRule> {
        self.rules.iter().filter(|r| r.active)
    }
}
