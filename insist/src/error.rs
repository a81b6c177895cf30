use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsistError {
    #[error("Syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A value in a section could not be converted by its field codec.
    #[error("Cannot load [{section}] {attribute} = {value:?}: {reason}")]
    Decode {
        section: String,
        attribute: String,
        value: String,
        reason: String,
    },

    #[error("Cannot dump [{section}] {attribute}: {reason}")]
    Encode {
        section: String,
        attribute: String,
        reason: String,
    },

    /// A required configuration file is missing or unusable.
    #[error("Configuration load error for {}: {reason}", path.display())]
    ConfigurationLoad { path: PathBuf, reason: String },

    #[error("Section not found: [{0}]")]
    SectionNotFound(String),

    #[error("Type error: expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: String,
    },

    #[error("Unknown attribute '{attribute}' on {record}")]
    UnknownAttribute {
        record: &'static str,
        attribute: String,
    },

    /// The YAML description of the watched collections is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not implemented: {0}")]
    Unimplemented(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, InsistError>;
