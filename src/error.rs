use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AspectraError {
    #[error("Schema violation: {0}")]
    SchemaViolation(String),
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("Persistence failure during {operation}{}: {source}", catalog_suffix(.catalog_id))]
    PersistenceFailure {
        operation: &'static str,
        catalog_id: Option<Uuid>,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, AspectraError>;

fn catalog_suffix(catalog_id: &Option<Uuid>) -> String {
    match catalog_id {
        Some(id) => format!(" of catalog {}", id),
        None => String::new(),
    }
}

impl AspectraError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::DataCorruption { message: message.into() }
    }
}

// Helper conversions
impl From<rusqlite::Error> for AspectraError {
    fn from(e: rusqlite::Error) -> Self {
        Self::PersistenceFailure { operation: "sql", catalog_id: None, source: e }
    }
}

impl From<serde_json::Error> for AspectraError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<::config::ConfigError> for AspectraError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Attaches the engine operation and catalog to persistence failures that
/// bubbled up from a bare `?` on a rusqlite call.
pub trait ResultExt<T> {
    fn context(self, operation: &'static str, catalog_id: Uuid) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: &'static str, catalog_id: Uuid) -> Result<T> {
        self.map_err(|e| match e {
            AspectraError::PersistenceFailure { source, .. } => AspectraError::PersistenceFailure {
                operation,
                catalog_id: Some(catalog_id),
                source,
            },
            other => other,
        })
    }
}

impl<T> ResultExt<T> for rusqlite::Result<T> {
    fn context(self, operation: &'static str, catalog_id: Uuid) -> Result<T> {
        self.map_err(AspectraError::from).context(operation, catalog_id)
    }
}
