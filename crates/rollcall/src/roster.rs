//! Class roster: which classes exist and the PIN that opens a session.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("cannot read class roster {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed class roster: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown class {0}")]
    UnknownClass(String),
    #[error("wrong PIN for class {0}")]
    WrongPin(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassInfo {
    pub class_code: String,
    pub class_name: String,
    pin: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassRoster {
    classes: Vec<ClassInfo>,
}

impl ClassRoster {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let text = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let roster = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), classes = roster.classes.len(), "loaded class roster");
        Ok(roster)
    }

    pub fn from_json(text: &str) -> Result<Self, RosterError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    pub fn find(&self, class_code: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.class_code == class_code)
    }

    /// Check the PIN for a class. Surrounding whitespace in the entered PIN
    /// is ignored.
    pub fn authorize(&self, class_code: &str, pin: &str) -> Result<&ClassInfo, RosterError> {
        let class = self
            .find(class_code)
            .ok_or_else(|| RosterError::UnknownClass(class_code.to_string()))?;
        if class.pin != pin.trim() {
            tracing::warn!(class = class_code, "rejected session start: wrong PIN");
            return Err(RosterError::WrongPin(class_code.to_string()));
        }
        Ok(class)
    }
}
