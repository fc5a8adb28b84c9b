use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Gmail error: {0}")]
    Gmail(String),

    #[error("Record {0} is already in the ledger")]
    DuplicateKey(String),

    #[error("Record {0} is not in the ledger")]
    UnknownRecord(String),

    #[error("Amount out of range: {0}")]
    AmountOutOfRange(String),

    #[error("Ledger row {row} is unreadable: {reason}")]
    CorruptRow { row: usize, reason: String },

    #[error("Login failed: {0}")]
    Authentication(String),

    #[error("Entry for {0} was not confirmed by the ledger")]
    EntryNotConfirmed(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("Account option not available: {0}")]
    AccountOption(String),

    #[error("WebDriver error: {0}")]
    WebDriver(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
