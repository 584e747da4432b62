//! Loads provisioning templates written as JSON or YAML and optionally split
//! across a directory tree.
//!
//! A file is parsed on its own. A directory becomes a mapping: its `main`
//! document (if any) supplies the top-level keys, and every other entry is
//! loaded recursively and stored under its name up to the first `.`. So
//! `Resources/Bucket.yaml` ends up at `Resources.Bucket`.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Candidate names for a directory's top-level document, in priority order.
pub const MAIN_FILES: [&str; 3] = ["main.json", "main.yaml", "main.yml"];

/// Errors raised while loading a template.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TemplateError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a document is not valid JSON or YAML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a directory's main document is not a mapping.
    #[error("{path} must contain a mapping to be merged with its directory")]
    NotAMapping {
        /// Main document with the wrong shape.
        path: Utf8PathBuf,
    },
}

/// Loads the template at `path`.
///
/// Files ending in `.yaml` or `.yml` are parsed as YAML, anything else as
/// JSON. Directories are merged as described in the module docs; entries
/// whose names start with `.` are ignored and entries are visited in name
/// order, so when two entries share a key the later name wins.
///
/// # Errors
///
/// Returns [`TemplateError`] naming the first path that could not be read or
/// parsed.
pub fn load_template(path: &Utf8Path) -> Result<Value, TemplateError> {
    if path.is_dir() {
        load_directory(path)
    } else {
        load_document(path)
    }
}

fn load_document(path: &Utf8Path) -> Result<Value, TemplateError> {
    debug!(path = %path, "loading template document");
    let contents = read_file(path)?;
    let parsed = if is_yaml(path) {
        serde_yaml::from_str::<Value>(&contents).map_err(|err| err.to_string())
    } else {
        serde_json::from_str::<Value>(&contents).map_err(|err| err.to_string())
    };
    parsed.map_err(|message| TemplateError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

fn load_directory(path: &Utf8Path) -> Result<Value, TemplateError> {
    debug!(path = %path, "loading template directory");
    let io_error = |err: std::io::Error| TemplateError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let dir = Dir::open_ambient_dir(path, ambient_authority()).map_err(io_error)?;

    let main_file = MAIN_FILES.into_iter().find(|name| dir.exists(name));
    let mut merged = match main_file {
        Some(name) => {
            let main_path = path.join(name);
            match load_template(&main_path)? {
                Value::Object(map) => map,
                _ => return Err(TemplateError::NotAMapping { path: main_path }),
            }
        }
        None => Map::new(),
    };

    let mut names = Vec::new();
    for entry in dir.entries().map_err(io_error)? {
        let name = entry
            .and_then(|dir_entry| dir_entry.file_name())
            .map_err(io_error)?;
        if name.starts_with('.') || Some(name.as_str()) == main_file {
            continue;
        }
        names.push(name);
    }
    names.sort();

    for name in names {
        let key = name.split('.').next().unwrap_or_default().to_owned();
        let value = load_template(&path.join(&name))?;
        merged.insert(key, value);
    }
    Ok(Value::Object(merged))
}

fn read_file(path: &Utf8Path) -> Result<String, TemplateError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| TemplateError::Io {
        path: path.to_path_buf(),
        message: String::from("template path is missing a filename"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        TemplateError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;

    dir.read_to_string(file_name)
        .map_err(|err| TemplateError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn is_yaml(path: &Utf8Path) -> bool {
    matches!(path.extension(), Some("yaml" | "yml"))
}
