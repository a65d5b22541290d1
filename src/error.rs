use thiserror::Error;

impl From<serde_json::Error> for TrustError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for TrustError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for TrustError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("I/O error: {}", err))
    }
}

impl From<reqwest::Error> for TrustError {
    fn from(err: reqwest::Error) -> Self {
        Self::ContentStore(format!("HTTP error: {}", err))
    }
}

impl From<config::ConfigError> for TrustError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    State(StateViolation),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Already registered: {0}")]
    Duplicate(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("Judgment module error: {0}")]
    Judge(String),
}

/// Reasons a policy transition was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateViolation {
    #[error("organization {voter} already voted on policy {policy_id}")]
    AlreadyVoted { policy_id: u64, voter: String },

    #[error("voting on policy {0} has closed")]
    VotingClosed(u64),

    #[error("voting on policy {0} is still open")]
    VotingStillOpen(u64),

    #[error("policy {0} has already been executed")]
    AlreadyExecuted(u64),

    #[error("ledger has no genesis entry")]
    MissingGenesis,

    #[error("ledger already initialised")]
    AlreadyInitialised,
}

impl TrustError {
    pub fn not_admin(caller: &str) -> Self {
        Self::Authorization(format!("{} is not the ledger admin", caller))
    }

    pub fn signature_not_found(id: u64) -> Self {
        Self::NotFound(format!("signature record {}", id))
    }

    pub fn policy_not_found(id: u64) -> Self {
        Self::NotFound(format!("policy {}", id))
    }

    pub fn organization_not_found(identity: &str) -> Self {
        Self::NotFound(format!("organization {}", identity))
    }
}

impl From<StateViolation> for TrustError {
    fn from(violation: StateViolation) -> Self {
        Self::State(violation)
    }
}
