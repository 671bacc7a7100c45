use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ferrogate_core::ValidationError),

    #[error(transparent)]
    Config(#[from] ferrogate_core::ConfigError),

    #[error(transparent)]
    Warehouse(#[from] ferrogate_core::WarehouseError),

    #[error(transparent)]
    Store(#[from] ferrogate_core::StoreError),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    DatabaseUrl(#[from] ferrogate_core::DatabaseUrlError),

    #[error("command error: {0}")]
    Command(String),

    /// The command ran and its envelope carries errors.
    #[error("{error_count} error(s) reported")]
    Reported { error_count: usize },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 3,
            #[cfg(feature = "postgres")]
            Self::DatabaseUrl(_) => 3,
            Self::Reported { .. } => 4,
            Self::Store(_) => 6,
            Self::Warehouse(_) | Self::Command(_) | Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}
