use std::sync::OnceLock;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use log::{debug, warn};
use regex::Regex;
use thiserror::Error;

use crate::models::{LedgerStatus, RawMessage, TransactionRecord};

// Body lines look like:
//   ご利用日時：2023-06-28 22:46:19
//   ご利用金額：44,308円
//   ご利用店舗：SMOKEBEERFACTORY OTSUKATE
const USAGE_TIMESTAMP_KEY: &str = "ご利用日時";
const USAGE_AMOUNT_KEY: &str = "ご利用金額";
const USAGE_MERCHANT_KEY: &str = "ご利用店舗";
const KEY_DELIMITER: char = '：';
const CURRENCY_SUFFIX: char = '円';

const USAGE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

// Gmail hands out bodies as base64url, with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("body could not be decoded: {0}")]
    Decode(String),

    #[error("no Date header")]
    MissingDate,

    #[error("unreadable Date header `{0}`")]
    SourceTimestamp(String),

    #[error("unreadable usage timestamp `{0}`")]
    UsageTimestamp(String),

    #[error("unreadable amount `{0}`")]
    Amount(String),

    #[error("no {0} line in body")]
    MissingField(&'static str),
}

/// What to do when a body line is absent altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPolicy {
    /// Fill defaults: amount 0, empty merchant, usage time = send time.
    Lenient,
    /// Reject the message.
    Strict,
}

impl ExtractionPolicy {
    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

fn zone_annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*[+-]\d{4})(?:\s*\([^()]*\)|\s+[A-Za-z]{1,5})\s*$")
            .expect("invalid zone annotation regex")
    })
}

pub fn decode_body(data: &str) -> Result<String, ExtractError> {
    let bytes = BODY_ENGINE
        .decode(data.trim())
        .map_err(|e| ExtractError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExtractError::Decode(e.to_string()))
}

/// `"44,308円"` → 44308. Amounts must fit the ledger's signed integer column.
pub fn parse_amount(raw: &str) -> Result<u64, ExtractError> {
    let s = raw.trim().replace(',', "");
    let s = s.strip_suffix(CURRENCY_SUFFIX).unwrap_or(&s).trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(ExtractError::Amount(raw.to_string()));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ExtractError::Amount(raw.to_string()))
}

/// Usage timestamps carry no zone and are already ledger-local.
pub fn parse_usage_timestamp(raw: &str) -> Result<NaiveDateTime, ExtractError> {
    let raw_trimmed = raw.trim();
    USAGE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw_trimmed, fmt).ok())
        .ok_or_else(|| ExtractError::UsageTimestamp(raw.to_string()))
}

/// Parse a `Date` header and express it as wall time at `offset`.
///
/// The sender appends a zone label after the numeric offset (`+0900 (JST)`), which the
/// RFC 2822 parser rejects, so it is dropped first.
pub fn parse_source_timestamp(raw: &str, offset: FixedOffset) -> Result<NaiveDateTime, ExtractError> {
    let trimmed = raw.trim();
    let stamp = zone_annotation_re()
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);
    let parsed = DateTime::parse_from_rfc2822(stamp)
        .or_else(|_| DateTime::parse_from_rfc2822(trimmed))
        .map_err(|_| ExtractError::SourceTimestamp(raw.to_string()))?;
    Ok(parsed.with_timezone(&offset).naive_local())
}

#[derive(Debug, Default)]
struct BodyFields {
    usage_timestamp: Option<NaiveDateTime>,
    amount: Option<u64>,
    merchant: Option<String>,
}

fn scan_body(body: &str) -> Result<BodyFields, ExtractError> {
    let mut fields = BodyFields::default();
    for line in body.lines() {
        let Some((key, value)) = line.split_once(KEY_DELIMITER) else {
            continue;
        };
        match key.trim() {
            USAGE_TIMESTAMP_KEY => fields.usage_timestamp = Some(parse_usage_timestamp(value)?),
            USAGE_AMOUNT_KEY => fields.amount = Some(parse_amount(value)?),
            USAGE_MERCHANT_KEY => fields.merchant = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(fields)
}

#[derive(Debug, Clone)]
pub struct RecordExtractor {
    policy: ExtractionPolicy,
    offset: FixedOffset,
}

impl RecordExtractor {
    pub fn new(policy: ExtractionPolicy, offset: FixedOffset) -> Self {
        Self { policy, offset }
    }

    /// `None` means "skip this message"; the reason is logged.
    pub fn extract_record(&self, message: &RawMessage) -> Option<TransactionRecord> {
        match self.try_extract(message) {
            Ok(record) => {
                debug!("message {} -> {record}", message.id);
                Some(record)
            }
            Err(e) => {
                warn!("skipping message {}: {e}", message.id);
                None
            }
        }
    }

    pub fn try_extract(&self, message: &RawMessage) -> Result<TransactionRecord, ExtractError> {
        let data = message
            .body_data
            .as_deref()
            .ok_or_else(|| ExtractError::Decode("no body payload".to_string()))?;
        let body = decode_body(data)?;

        let date_header = message.header("Date").ok_or(ExtractError::MissingDate)?;
        let source_timestamp = parse_source_timestamp(date_header, self.offset)?;

        let fields = scan_body(&body)?;
        if self.policy == ExtractionPolicy::Strict {
            if fields.usage_timestamp.is_none() {
                return Err(ExtractError::MissingField("usage timestamp"));
            }
            if fields.amount.is_none() {
                return Err(ExtractError::MissingField("amount"));
            }
            if fields.merchant.as_deref().map_or(true, str::is_empty) {
                return Err(ExtractError::MissingField("merchant"));
            }
        }

        Ok(TransactionRecord {
            source_timestamp,
            usage_timestamp: fields.usage_timestamp.unwrap_or(source_timestamp),
            amount: fields.amount.unwrap_or(0),
            merchant: fields.merchant.unwrap_or_default(),
            status: LedgerStatus::Pending,
        })
    }
}
