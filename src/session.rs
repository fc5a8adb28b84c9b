use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a control on the ledger's web form is found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Id(String),
    Css(String),
    Xpath(String),
    LinkText(String),
}

impl Locator {
    pub fn id(value: &str) -> Self {
        Self::Id(value.to_string())
    }

    pub fn css(value: &str) -> Self {
        Self::Css(value.to_string())
    }

    pub fn link_text(value: &str) -> Self {
        Self::LinkText(value.to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(v) => write!(f, "#{v}"),
            Self::Css(v) => write!(f, "css `{v}`"),
            Self::Xpath(v) => write!(f, "xpath `{v}`"),
            Self::LinkText(v) => write!(f, "link \"{v}\""),
        }
    }
}

/// The capabilities the entry driver needs from a browser-like session.
///
/// Everything the driver does to the external ledger goes through this trait, so the
/// driver can be exercised against a recording fake.
pub trait InteractiveSession {
    /// Open the session and load `url`.
    fn start(&mut self, url: &str) -> Result<()>;

    /// Replace the contents of a text field.
    fn fill(&mut self, target: &Locator, text: &str) -> Result<()>;

    fn click(&mut self, target: &Locator) -> Result<()>;

    /// Block until `target` is present and displayed. `Ok(false)` when `timeout` elapses.
    fn wait_visible(&mut self, target: &Locator, timeout: Duration) -> Result<bool>;

    /// Labels of the options of a combo-box, in display order.
    fn options(&mut self, target: &Locator) -> Result<Vec<String>>;

    fn select_option(&mut self, target: &Locator, index: usize) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
