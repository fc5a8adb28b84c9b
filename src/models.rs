use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Rendering used for both timestamp columns of the ledger.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Value written to `mf_status` once the external ledger has accepted a record.
pub const COMMITTED_MARK: &str = "done";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Pending,
    Committed,
}

impl LedgerStatus {
    pub fn as_cell(&self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Committed => COMMITTED_MARK,
        }
    }

    pub fn from_cell(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => Some(Self::Pending),
            COMMITTED_MARK => Some(Self::Committed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// When the notification was sent, in ledger-local time. Identity key.
    pub source_timestamp: NaiveDateTime,
    pub usage_timestamp: NaiveDateTime,
    pub amount: u64,
    pub merchant: String,
    pub status: LedgerStatus,
}

impl TransactionRecord {
    pub fn key(&self) -> String {
        self.source_timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// The persisted form. Fails rather than wrap an amount the `amount` column cannot hold.
    pub fn to_row(&self) -> Result<LedgerRow> {
        let amount = i64::try_from(self.amount)
            .map_err(|_| SyncError::AmountOutOfRange(format!("{} for {}", self.amount, self.key())))?;
        Ok(LedgerRow {
            email_date: self.key(),
            date_of_use: self.usage_timestamp.format(TIMESTAMP_FORMAT).to_string(),
            amount,
            store: self.merchant.clone(),
            mf_status: self.status.as_cell().to_string(),
        })
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.key(), self.merchant, self.amount)
    }
}

/// One persisted ledger row, exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub email_date: String,
    pub date_of_use: String,
    pub amount: i64,
    pub store: String,
    pub mf_status: String,
}

/// Cells that may change after a row is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerColumn {
    MfStatus,
}

impl LedgerColumn {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MfStatus => "mf_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    #[serde(rename = "store")]
    pub merchant: String,
    pub major_category: String,
    pub minor_category: String,
    pub display_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A notification as handed over by a message source.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub id: String,
    pub headers: Vec<Header>,
    /// base64url payload of the text body, when the source found one.
    pub body_data: Option<String>,
}

impl RawMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, 28).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_status_cells() {
        assert_eq!(LedgerStatus::from_cell(""), Some(LedgerStatus::Pending));
        assert_eq!(LedgerStatus::from_cell("done"), Some(LedgerStatus::Committed));
        assert_eq!(LedgerStatus::from_cell("maybe"), None);
        assert_eq!(LedgerStatus::Committed.as_cell(), "done");
    }

    #[test]
    fn test_to_row_formats_timestamps() {
        let record = TransactionRecord {
            source_timestamp: at(22, 46, 25),
            usage_timestamp: at(22, 46, 19),
            amount: 44308,
            merchant: "SMOKEBEERFACTORY OTSUKATE".to_string(),
            status: LedgerStatus::Pending,
        };
        let row = record.to_row().unwrap();
        assert_eq!(row.email_date, "2023-06-28 22:46:25");
        assert_eq!(row.date_of_use, "2023-06-28 22:46:19");
        assert_eq!(row.amount, 44308);
        assert_eq!(row.mf_status, "");
    }

    #[test]
    fn test_to_row_refuses_amount_beyond_column() {
        let mut record = TransactionRecord {
            source_timestamp: at(22, 46, 25),
            usage_timestamp: at(22, 46, 19),
            amount: i64::MAX as u64,
            merchant: "X".to_string(),
            status: LedgerStatus::Pending,
        };
        assert_eq!(record.to_row().unwrap().amount, i64::MAX);
        record.amount = 9_999_999_999_999_999_999;
        assert!(matches!(record.to_row(), Err(SyncError::AmountOutOfRange(_))));
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let msg = RawMessage {
            headers: vec![Header { name: "date".into(), value: "x".into() }],
            ..Default::default()
        };
        assert_eq!(msg.header("Date"), Some("x"));
        assert_eq!(msg.header("From"), None);
    }
}
