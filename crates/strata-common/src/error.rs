use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("malformed migration {file}: {reason}")]
    MalformedMigration { file: String, reason: String },

    #[error("duplicate migration version(s) {}: {files}", join_versions(.versions))]
    DuplicateVersion { versions: Vec<i64>, files: String },

    #[error("migration version {0} not found in applied migrations")]
    TargetVersionNotFound(i64),

    #[error("migration {version} ({name}) failed: {message}")]
    ScriptExecution {
        version: i64,
        name: String,
        message: String,
    },

    #[error("ledger is locked: {0}")]
    Locked(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

fn join_versions(versions: &[i64]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
