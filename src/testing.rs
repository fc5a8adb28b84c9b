//! In-memory stand-ins for the mailbox, the ledger and the browser session.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{FixedOffset, NaiveDateTime};
use zeroize::Zeroizing;

use crate::driver::Credentials;
use crate::error::{Result, SyncError};
use crate::extractor::parse_source_timestamp;
use crate::fetcher::{MessageQuery, MessageSource};
use crate::models::{Header, LedgerColumn, LedgerRow, LedgerStatus, RawMessage, TransactionRecord, TIMESTAMP_FORMAT};
use crate::reconciler::LedgerStore;
use crate::session::{InteractiveSession, Locator};

/// Shared, ordered log of side effects across fakes.
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.borrow_mut().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

pub fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

pub fn pacific() -> FixedOffset {
    FixedOffset::west_opt(8 * 3600).unwrap()
}

pub fn ts(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).unwrap()
}

pub fn record(source: &str, amount: u64, merchant: &str) -> TransactionRecord {
    record_used_at(source, source, amount, merchant)
}

pub fn record_used_at(source: &str, used: &str, amount: u64, merchant: &str) -> TransactionRecord {
    TransactionRecord {
        source_timestamp: ts(source),
        usage_timestamp: ts(used),
        amount,
        merchant: merchant.to_string(),
        status: LedgerStatus::Pending,
    }
}

pub fn body(used: &str, amount: &str, merchant: &str) -> String {
    format!("ご利用日時：{used}\nご利用金額：{amount}\nご利用店舗：{merchant}\n")
}

pub fn message(id: &str, date: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        headers: vec![
            Header {
                name: "From".to_string(),
                value: "payinfo@121.ana.co.jp".to_string(),
            },
            Header {
                name: "Date".to_string(),
                value: date.to_string(),
            },
        ],
        body_data: Some(URL_SAFE_NO_PAD.encode(body.as_bytes())),
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        email: "me@example.com".to_string(),
        password: Zeroizing::new("secret".to_string()),
    }
}

pub struct MemoryLedger {
    journal: Journal,
    rows: Vec<LedgerRow>,
}

impl MemoryLedger {
    pub fn new(journal: Journal) -> Self {
        Self::with_rows(journal, Vec::new())
    }

    pub fn with_rows(journal: Journal, rows: Vec<LedgerRow>) -> Self {
        Self { journal, rows }
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }
}

impl LedgerStore for MemoryLedger {
    fn read_rows(&self) -> Result<Vec<LedgerRow>> {
        Ok(self.rows.clone())
    }

    fn append_row(&mut self, row: &LedgerRow) -> Result<()> {
        self.journal.push(format!("ledger append {}", row.email_date));
        self.rows.push(row.clone());
        Ok(())
    }

    fn update_cell(&mut self, row: usize, column: LedgerColumn, value: &str) -> Result<()> {
        let target = self.rows.get_mut(row).ok_or_else(|| SyncError::CorruptRow {
            row,
            reason: "no such row".to_string(),
        })?;
        self.journal
            .push(format!("ledger {} {} = {value}", column.name(), target.email_date));
        match column {
            LedgerColumn::MfStatus => target.mf_status = value.to_string(),
        }
        Ok(())
    }
}

/// Mailbox holding messages oldest first; lists them newest first like Gmail.
///
/// `after:` is matched against the send date in Pacific time, as Gmail does.
pub struct FakeSource {
    journal: Journal,
    messages: Vec<RawMessage>,
    queries: RefCell<Vec<String>>,
    failing: bool,
}

impl FakeSource {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            messages: Vec::new(),
            queries: RefCell::new(Vec::new()),
            failing: false,
        }
    }

    pub fn with(mut self, id: &str, date: &str, body: &str) -> Self {
        self.messages.push(message(id, date, body));
        self
    }

    pub fn with_undecodable(mut self, id: &str, date: &str) -> Self {
        let mut msg = message(id, date, "");
        msg.body_data = Some("!!! not base64 !!!".to_string());
        self.messages.push(msg);
        self
    }

    pub fn push(&mut self, id: &str, date: &str, body: &str) {
        self.messages.push(message(id, date, body));
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }
}

impl MessageSource for FakeSource {
    fn list_ids(&self, query: &MessageQuery) -> Result<Vec<String>> {
        if self.failing {
            return Err(SyncError::Gmail("mailbox unavailable".to_string()));
        }
        self.queries.borrow_mut().push(query.to_search());
        let ids = self
            .messages
            .iter()
            .filter(|m| {
                m.header("Date")
                    .and_then(|d| parse_source_timestamp(d, pacific()).ok())
                    .map_or(true, |sent| sent.date() >= query.after)
            })
            .rev()
            .map(|m| m.id.clone())
            .collect();
        Ok(ids)
    }

    fn fetch(&self, id: &str) -> Result<RawMessage> {
        self.journal.push(format!("fetch {id}"));
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| SyncError::Gmail(format!("no message {id}")))
    }
}

/// Records every action; all controls are visible unless hidden.
pub struct FakeSession {
    journal: Journal,
    hidden: HashSet<String>,
    visible_budget: HashMap<String, usize>,
    options: Vec<String>,
}

impl FakeSession {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            hidden: HashSet::new(),
            visible_budget: HashMap::new(),
            options: ["財布", "銀行", "ANA Pay", "クレジット"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn hide(mut self, target: &Locator) -> Self {
        self.hidden.insert(target.to_string());
        self
    }

    /// `target` shows up `times` times, then never again.
    pub fn hide_after(mut self, target: &Locator, times: usize) -> Self {
        self.visible_budget.insert(target.to_string(), times);
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

impl InteractiveSession for FakeSession {
    fn start(&mut self, url: &str) -> Result<()> {
        self.journal.push(format!("start {url}"));
        Ok(())
    }

    fn fill(&mut self, target: &Locator, text: &str) -> Result<()> {
        self.journal.push(format!("fill {target} = {text}"));
        Ok(())
    }

    fn click(&mut self, target: &Locator) -> Result<()> {
        self.journal.push(format!("click {target}"));
        Ok(())
    }

    fn wait_visible(&mut self, target: &Locator, _timeout: Duration) -> Result<bool> {
        let key = target.to_string();
        self.journal.push(format!("wait {key}"));
        if self.hidden.contains(&key) {
            return Ok(false);
        }
        if let Some(left) = self.visible_budget.get_mut(&key) {
            if *left == 0 {
                return Ok(false);
            }
            *left -= 1;
        }
        Ok(true)
    }

    fn options(&mut self, _target: &Locator) -> Result<Vec<String>> {
        Ok(self.options.clone())
    }

    fn select_option(&mut self, target: &Locator, index: usize) -> Result<()> {
        if index >= self.options.len() {
            return Err(SyncError::AccountOption(format!("option {index}")));
        }
        self.journal.push(format!("select {target} = {index}"));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.journal.push("close".to_string());
        Ok(())
    }
}
