use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::driver::{AccountChoice, Credentials, FormLocators};
use crate::error::{Result, SyncError};

const PASSWORD_ENV: &str = "PAYSYNC_LEDGER_PASSWORD";
const CONFIG_ENV: &str = "PAYSYNC_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_data_dir_string")]
    pub data_dir: String,
    #[serde(default)]
    pub mail: MailSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Read category rules from this CSV instead of the `category_rules` table.
    #[serde(default)]
    pub categories_csv: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir_string(),
            mail: MailSettings::default(),
            ledger: LedgerSettings::default(),
            categories_csv: None,
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand_path(&self.data_dir)).join("paysync.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub sender: String,
    pub subject: String,
    /// Lower fetch bound (YYYY-MM-DD) used while the ledger is still empty.
    pub epoch: String,
    /// Offset of the ledger's local time from UTC.
    pub utc_offset_minutes: i32,
    pub strict_extraction: bool,
    pub api_base: String,
    pub token_path: Option<String>,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender: "payinfo@121.ana.co.jp".to_string(),
            subject: "ご利用のお知らせ".to_string(),
            epoch: "2023-06-28".to_string(),
            utc_offset_minutes: 9 * 60,
            strict_extraction: false,
            api_base: "https://gmail.googleapis.com/gmail/v1/users/me".to_string(),
            token_path: None,
        }
    }
}

impl MailSettings {
    pub fn epoch_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.epoch, "%Y-%m-%d")
            .map_err(|e| SyncError::Settings(format!("mail.epoch `{}`: {e}", self.epoch)))
    }

    pub fn token_path(&self) -> PathBuf {
        match &self.token_path {
            Some(p) => PathBuf::from(shellexpand_path(p)),
            None => config_dir().join("token.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub webdriver_url: String,
    pub login_url: String,
    pub email: String,
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub account: AccountChoice,
    pub form: FormLocators,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            login_url: "https://moneyforward.com/sign_in".to_string(),
            email: String::new(),
            wait_timeout_secs: 10,
            poll_interval_ms: 250,
            account: AccountChoice::Index(2),
            form: FormLocators::default(),
        }
    }
}

impl LedgerSettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("paysync")
}

fn settings_path() -> PathBuf {
    match std::env::var(CONFIG_ENV) {
        Ok(p) if !p.is_empty() => PathBuf::from(shellexpand_path(&p)),
        _ => config_dir().join("settings.json"),
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("paysync")
}

fn default_data_dir_string() -> String {
    default_data_dir().to_string_lossy().to_string()
}

/// Missing file means defaults. A file that exists but does not parse is an error, so a typo
/// never silently points the run at a different ledger.
pub fn load_settings() -> Result<Settings> {
    let path = settings_path();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map_err(|e| SyncError::Settings(format!("{}: {e}", path.display())))
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let path = settings_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

pub fn settings_file() -> PathBuf {
    settings_path()
}

pub fn check_ledger_email(ledger: &LedgerSettings) -> Result<()> {
    if ledger.email.is_empty() {
        return Err(SyncError::Credentials("ledger.email is not set".to_string()));
    }
    Ok(())
}

/// Ledger login. The password comes from the environment, or a terminal prompt.
pub fn load_credentials(ledger: &LedgerSettings) -> Result<Credentials> {
    check_ledger_email(ledger)?;
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(p) if !p.is_empty() => Zeroizing::new(p),
        _ => Zeroizing::new(
            rpassword::prompt_password(format!("Ledger password for {}: ", ledger.email))
                .map_err(|e| SyncError::Credentials(e.to_string()))?,
        ),
    };
    if password.is_empty() {
        return Err(SyncError::Credentials("empty password".to_string()));
    }
    Ok(Credentials {
        email: ledger.email.clone(),
        password,
    })
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
