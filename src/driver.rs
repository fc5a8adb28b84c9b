use std::fmt;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::categorizer::CategoryResolver;
use crate::error::{Result, SyncError};
use crate::models::TransactionRecord;
use crate::session::{InteractiveSession, Locator};
use crate::settings::LedgerSettings;

const ENTRY_DATE_FORMAT: &str = "%Y/%m/%d";

/// Which option of the account combo-box receives the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountChoice {
    Index(usize),
    Label(String),
}

impl AccountChoice {
    fn resolve(&self, options: &[String]) -> Result<usize> {
        match self {
            Self::Index(i) if *i < options.len() => Ok(*i),
            Self::Index(i) => Err(SyncError::AccountOption(format!(
                "option {i} requested, {} available",
                options.len()
            ))),
            Self::Label(label) => options
                .iter()
                .position(|o| o.trim() == label)
                .ok_or_else(|| SyncError::AccountOption(format!("no option labelled `{label}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormLocators {
    pub email_field: Locator,
    pub password_field: Locator,
    pub sign_in_button: Locator,
    pub manual_entry_button: Locator,
    pub date_field: Locator,
    pub amount_field: Locator,
    pub account_select: Locator,
    pub major_category_toggle: Locator,
    pub minor_category_toggle: Locator,
    pub memo_field: Locator,
    pub submit_button: Locator,
    pub continue_button: Locator,
}

impl Default for FormLocators {
    fn default() -> Self {
        Self {
            email_field: Locator::css("input[type=\"email\"]"),
            password_field: Locator::css("input[type=\"password\"]"),
            sign_in_button: Locator::id("submitto"),
            manual_entry_button: Locator::css("button.cf-new-btn"),
            date_field: Locator::id("updated-at"),
            amount_field: Locator::id("appendedPrependedInput"),
            account_select: Locator::id("user_asset_act_sub_account_id_hash"),
            major_category_toggle: Locator::id("js-large-category-selected"),
            minor_category_toggle: Locator::id("js-middle-category-selected"),
            memo_field: Locator::id("js-content-field"),
            submit_button: Locator::id("submit-button"),
            continue_button: Locator::id("confirmation-button"),
        }
    }
}

pub struct Credentials {
    pub email: String,
    pub password: Zeroizing<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    LoggedOut,
    Authenticating,
    Ready,
    Filling,
    Confirming,
    Closed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoggedOut => "logged out",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Filling => "filling",
            Self::Confirming => "confirming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What ended up in the ledger for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub memo: String,
    pub categorized: bool,
}

/// Drives the ledger's manual-entry form, one record at a time, over a single session.
pub struct LedgerEntryDriver<S> {
    session: S,
    login_url: String,
    form: FormLocators,
    account: AccountChoice,
    timeout: Duration,
    state: DriverState,
    // After "continue entering" the form stays open and reset.
    form_open: bool,
}

impl<S: InteractiveSession> LedgerEntryDriver<S> {
    pub fn new(session: S, settings: &LedgerSettings) -> Self {
        Self {
            session,
            login_url: settings.login_url.clone(),
            form: settings.form.clone(),
            account: settings.account.clone(),
            timeout: settings.wait_timeout(),
            state: DriverState::LoggedOut,
            form_open: false,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    #[cfg(test)]
    pub fn session(&self) -> &S {
        &self.session
    }

    fn require(&self, expected: DriverState, action: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SyncError::InvalidTransition {
                action,
                state: self.state.to_string(),
            })
        }
    }

    fn click_when_visible(&mut self, target: &Locator) -> Result<()> {
        if !self.session.wait_visible(target, self.timeout)? {
            return Err(SyncError::Timeout(target.to_string()));
        }
        self.session.click(target)
    }

    pub fn login(&mut self, credentials: &Credentials) -> Result<()> {
        self.require(DriverState::LoggedOut, "log in")?;
        self.state = DriverState::Authenticating;

        self.session.start(&self.login_url)?;
        if !self.session.wait_visible(&self.form.email_field, self.timeout)? {
            return Err(SyncError::Authentication("login form did not appear".to_string()));
        }
        self.session.fill(&self.form.email_field, &credentials.email)?;
        self.session.fill(&self.form.password_field, credentials.password.as_str())?;
        self.session.click(&self.form.sign_in_button)?;

        if !self.session.wait_visible(&self.form.manual_entry_button, self.timeout)? {
            return Err(SyncError::Authentication(format!(
                "{} did not appear after signing in",
                self.form.manual_entry_button
            )));
        }
        info!("signed in to ledger as {}", credentials.email);
        self.state = DriverState::Ready;
        Ok(())
    }

    /// Enter one record and wait for the ledger to confirm it.
    ///
    /// Returning `Ok` means the save was confirmed; only then may the record be marked
    /// committed.
    pub fn enter(&mut self, record: &TransactionRecord, categories: &CategoryResolver) -> Result<EntryOutcome> {
        self.require(DriverState::Ready, "enter a transaction")?;
        self.state = DriverState::Filling;
        let form = self.form.clone();

        if !self.form_open {
            self.click_when_visible(&form.manual_entry_button)?;
        }
        if !self.session.wait_visible(&form.date_field, self.timeout)? {
            return Err(SyncError::Timeout(format!("entry form {}", form.date_field)));
        }
        self.form_open = true;

        let date = record.usage_timestamp.format(ENTRY_DATE_FORMAT).to_string();
        self.session.fill(&form.date_field, &date)?;
        self.session.fill(&form.amount_field, &record.amount.to_string())?;

        let options = self.session.options(&form.account_select)?;
        let account = self.account.resolve(&options)?;
        self.session.select_option(&form.account_select, account)?;

        let outcome = match categories.resolve(&record.merchant) {
            Some(rule) => {
                self.click_when_visible(&form.major_category_toggle)?;
                self.click_when_visible(&Locator::link_text(&rule.major_category))?;
                self.click_when_visible(&form.minor_category_toggle)?;
                self.click_when_visible(&Locator::link_text(&rule.minor_category))?;
                EntryOutcome {
                    memo: rule.display_label.clone(),
                    categorized: true,
                }
            }
            None => {
                debug!("no category rule for `{}`", record.merchant);
                EntryOutcome {
                    memo: record.merchant.clone(),
                    categorized: false,
                }
            }
        };
        self.session.fill(&form.memo_field, &outcome.memo)?;

        self.session.click(&form.submit_button)?;
        self.state = DriverState::Confirming;

        if !self.session.wait_visible(&form.continue_button, self.timeout)? {
            return Err(SyncError::EntryNotConfirmed(record.key()));
        }
        self.session.click(&form.continue_button)?;
        self.state = DriverState::Ready;
        info!("entered {date} {} yen: {}", record.amount, outcome.memo);
        Ok(outcome)
    }

    /// Tear the session down. Safe to call in any state, and more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.state == DriverState::Closed {
            return Ok(());
        }
        let was_open = self.state != DriverState::LoggedOut;
        self.state = DriverState::Closed;
        if was_open {
            self.session.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryRule;
    use crate::testing::{credentials, record_used_at, FakeSession, Journal};

    fn settings() -> LedgerSettings {
        LedgerSettings::default()
    }

    fn ready_driver(session: FakeSession) -> LedgerEntryDriver<FakeSession> {
        let mut driver = LedgerEntryDriver::new(session, &settings());
        driver.login(&credentials()).unwrap();
        driver
    }

    fn resolver() -> CategoryResolver {
        CategoryResolver::from_rules(vec![CategoryRule {
            merchant: "SMOKEBEERFACTORY OTSUKATE".to_string(),
            major_category: "食費".to_string(),
            minor_category: "外食".to_string(),
            display_label: "スモークビア".to_string(),
        }])
    }

    fn calls(driver: &LedgerEntryDriver<FakeSession>) -> Vec<String> {
        driver.session().journal().entries()
    }

    #[test]
    fn test_login_reaches_ready() {
        let driver = ready_driver(FakeSession::new(Journal::default()));
        assert_eq!(driver.state(), DriverState::Ready);
        let log = calls(&driver);
        assert_eq!(log[0], "start https://moneyforward.com/sign_in");
        assert!(log.contains(&"fill css `input[type=\"email\"]` = me@example.com".to_string()));
        assert!(log.contains(&"click #submitto".to_string()));
    }

    #[test]
    fn test_login_times_out_without_manual_entry_control() {
        let session = FakeSession::new(Journal::default()).hide(&FormLocators::default().manual_entry_button);
        let mut driver = LedgerEntryDriver::new(session, &settings());
        let err = driver.login(&credentials()).unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
        assert!(driver.enter(&record_used_at("2023-07-01 10:00:00", "2023-07-01 09:59:00", 1, "A"), &resolver()).is_err());
    }

    #[test]
    fn test_enter_with_category() {
        let mut driver = ready_driver(FakeSession::new(Journal::default()));
        let rec = record_used_at("2023-06-28 22:46:25", "2023-06-28 22:46:19", 44308, "SMOKEBEERFACTORY OTSUKATE");
        let outcome = driver.enter(&rec, &resolver()).unwrap();
        assert!(outcome.categorized);
        assert_eq!(outcome.memo, "スモークビア");
        assert_eq!(driver.state(), DriverState::Ready);

        let log = calls(&driver);
        let entry: Vec<&str> = log
            .iter()
            .map(String::as_str)
            .skip_while(|c| *c != "click css `button.cf-new-btn`")
            .filter(|c| !c.starts_with("wait "))
            .collect();
        assert_eq!(
            entry,
            [
                "click css `button.cf-new-btn`",
                "fill #updated-at = 2023/06/28",
                "fill #appendedPrependedInput = 44308",
                "select #user_asset_act_sub_account_id_hash = 2",
                "click #js-large-category-selected",
                "click link \"食費\"",
                "click #js-middle-category-selected",
                "click link \"外食\"",
                "fill #js-content-field = スモークビア",
                "click #submit-button",
                "click #confirmation-button",
            ]
        );
    }

    #[test]
    fn test_enter_without_category_uses_merchant_as_memo() {
        let mut driver = ready_driver(FakeSession::new(Journal::default()));
        let rec = record_used_at("2023-07-01 10:00:00", "2023-07-01 09:59:00", 980, "UNKNOWN SHOP ");
        let outcome = driver.enter(&rec, &resolver()).unwrap();
        assert!(!outcome.categorized);
        assert_eq!(outcome.memo, "UNKNOWN SHOP ");
        let log = calls(&driver);
        assert!(log.contains(&"fill #js-content-field = UNKNOWN SHOP ".to_string()));
        assert!(!log.iter().any(|c| c.contains("js-large-category-selected")));
    }

    #[test]
    fn test_second_entry_reuses_open_form() {
        let mut driver = ready_driver(FakeSession::new(Journal::default()));
        driver.enter(&record_used_at("2023-07-01 10:00:00", "2023-07-01 09:59:00", 1, "A"), &resolver()).unwrap();
        driver.enter(&record_used_at("2023-07-02 10:00:00", "2023-07-02 09:59:00", 2, "B"), &resolver()).unwrap();
        let opens = calls(&driver).iter().filter(|c| *c == "click css `button.cf-new-btn`").count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn test_account_by_label() {
        let mut s = settings();
        s.account = AccountChoice::Label("ANA Pay".to_string());
        let mut driver = LedgerEntryDriver::new(FakeSession::new(Journal::default()), &s);
        driver.login(&credentials()).unwrap();
        driver.enter(&record_used_at("2023-07-01 10:00:00", "2023-07-01 09:59:00", 1, "A"), &resolver()).unwrap();
        assert!(calls(&driver).contains(&"select #user_asset_act_sub_account_id_hash = 2".to_string()));
    }

    #[test]
    fn test_account_index_out_of_range() {
        let mut s = settings();
        s.account = AccountChoice::Index(9);
        let mut driver = LedgerEntryDriver::new(FakeSession::new(Journal::default()), &s);
        driver.login(&credentials()).unwrap();
        let err = driver
            .enter(&record_used_at("2023-07-01 10:00:00", "2023-07-01 09:59:00", 1, "A"), &resolver())
            .unwrap_err();
        assert!(matches!(err, SyncError::AccountOption(_)));
    }

    #[test]
    fn test_missing_confirmation_is_fatal() {
        let session = FakeSession::new(Journal::default()).hide(&FormLocators::default().continue_button);
        let mut driver = ready_driver(session);
        let err = driver
            .enter(&record_used_at("2023-07-01 10:00:00", "2023-07-01 09:59:00", 1, "A"), &resolver())
            .unwrap_err();
        assert!(matches!(err, SyncError::EntryNotConfirmed(_)));
        assert_eq!(driver.state(), DriverState::Confirming);
        let again = driver.enter(&record_used_at("2023-07-02 10:00:00", "2023-07-02 09:59:00", 1, "B"), &resolver());
        assert!(matches!(again, Err(SyncError::InvalidTransition { .. })));
    }

    #[test]
    fn test_enter_before_login_is_rejected() {
        let mut driver = LedgerEntryDriver::new(FakeSession::new(Journal::default()), &settings());
        let err = driver
            .enter(&record_used_at("2023-07-01 10:00:00", "2023-07-01 09:59:00", 1, "A"), &resolver())
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTransition { .. }));
        assert!(calls(&driver).is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut driver = ready_driver(FakeSession::new(Journal::default()));
        driver.close().unwrap();
        driver.close().unwrap();
        assert_eq!(driver.state(), DriverState::Closed);
        let closes = calls(&driver).iter().filter(|c| *c == "close").count();
        assert_eq!(closes, 1);
        assert!(driver.login(&credentials()).is_err());
    }

    #[test]
    fn test_close_without_login_touches_nothing() {
        let mut driver = LedgerEntryDriver::new(FakeSession::new(Journal::default()), &settings());
        driver.close().unwrap();
        assert!(calls(&driver).is_empty());
    }
}
