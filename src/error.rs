use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid field name '{name}': {message}")]
pub struct FieldNameError {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Preview endpoint returned {status}")]
    Status { status: u16 },

    #[error("Malformed stream response: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for PreviewError {
    fn from(e: reqwest::Error) -> Self {
        PreviewError::Network(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Variables endpoint returned {status}")]
    Status { status: u16 },

    #[error("Malformed variables response: {0}")]
    Decode(String),

    #[error("No workflow id available for variable lookup")]
    MissingWorkflow,
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CatalogError::Decode(e.to_string())
        } else {
            CatalogError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BranchError {
    #[error("No source question selected")]
    NoSelection,

    #[error("Selection {index} out of range ({available} candidates)")]
    InvalidSelection { index: usize, available: usize },

    #[error("Step {0} is not a decision step")]
    NotADecision(usize),

    #[error("No branch inference panel is open")]
    PanelClosed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("Unknown step: {0}")]
    UnknownStep(Uuid),

    #[error("Step index {index} out of range ({len} steps)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Transition {from} -> {to} does not exist")]
    UnknownTransition { from: Uuid, to: Uuid },

    #[error(transparent)]
    Branch(#[from] BranchError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}
