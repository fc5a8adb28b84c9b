use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};

use crate::error::{Result, SyncError};
use crate::session::{InteractiveSession, Locator};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Either the `value` of a W3C WebDriver response or the error it carries.
#[derive(Debug, PartialEq)]
enum Reply {
    Value(Value),
    Fault { error: String, message: String },
}

fn parse_reply(mut body: Value) -> Reply {
    let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Reply::Fault {
            error: error.to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        None => Reply::Value(value),
    }
}

fn strategy(target: &Locator) -> (&'static str, String) {
    match target {
        Locator::Id(id) => ("css selector", format!("[id=\"{}\"]", id.replace('"', "\\\""))),
        Locator::Css(css) => ("css selector", css.clone()),
        Locator::Xpath(xpath) => ("xpath", xpath.clone()),
        Locator::LinkText(text) => ("link text", text.clone()),
    }
}

fn element_id(value: &Value) -> Option<String> {
    value.get(ELEMENT_KEY).and_then(Value::as_str).map(str::to_string)
}

/// A browser driven through a WebDriver endpoint (chromedriver, geckodriver, Selenium).
pub struct WebDriverSession {
    client: Client,
    base: String,
    session_id: Option<String>,
    poll: Duration,
}

impl WebDriverSession {
    pub fn new(base: &str, poll: Duration) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            session_id: None,
            poll,
        })
    }

    fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Reply> {
        let url = format!("{}{path}", self.base);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send()?;
        let status = resp.status();
        let text = resp.text()?;
        let parsed: Value = serde_json::from_str(&text).map_err(|_| {
            SyncError::WebDriver(format!("{url}: {status} with unreadable body"))
        })?;
        Ok(parse_reply(parsed))
    }

    fn session_path(&self, suffix: &str) -> Result<String> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| SyncError::WebDriver("no open session".to_string()))?;
        Ok(format!("/session/{id}{suffix}"))
    }

    fn command(&self, method: Method, suffix: &str, body: Option<Value>) -> Result<Value> {
        let path = self.session_path(suffix)?;
        match self.call(method, &path, body)? {
            Reply::Value(v) => Ok(v),
            Reply::Fault { error, message } => {
                Err(SyncError::WebDriver(format!("{suffix}: {error}: {message}")))
            }
        }
    }

    /// `None` when nothing matches yet.
    fn find(&self, target: &Locator) -> Result<Option<String>> {
        let (using, value) = strategy(target);
        let path = self.session_path("/element")?;
        match self.call(Method::POST, &path, Some(json!({"using": using, "value": value})))? {
            Reply::Value(v) => Ok(element_id(&v)),
            Reply::Fault { error, .. } if error == "no such element" => Ok(None),
            Reply::Fault { error, message } => {
                Err(SyncError::WebDriver(format!("find {target}: {error}: {message}")))
            }
        }
    }

    fn require(&self, target: &Locator) -> Result<String> {
        self.find(target)?
            .ok_or_else(|| SyncError::WebDriver(format!("{target} not found")))
    }

    fn is_displayed(&self, element: &str) -> Result<bool> {
        let path = self.session_path(&format!("/element/{element}/displayed"))?;
        match self.call(Method::GET, &path, None)? {
            Reply::Value(v) => Ok(v.as_bool().unwrap_or(false)),
            Reply::Fault { error, .. } if error == "stale element reference" => Ok(false),
            Reply::Fault { error, message } => Err(SyncError::WebDriver(format!("{error}: {message}"))),
        }
    }

    fn option_elements(&self, target: &Locator) -> Result<Vec<String>> {
        let select = self.require(target)?;
        let found = self.command(
            Method::POST,
            &format!("/element/{select}/elements"),
            Some(json!({"using": "css selector", "value": "option"})),
        )?;
        Ok(found
            .as_array()
            .map(|items| items.iter().filter_map(element_id).collect())
            .unwrap_or_default())
    }
}

impl InteractiveSession for WebDriverSession {
    fn start(&mut self, url: &str) -> Result<()> {
        if self.session_id.is_none() {
            let created = match self.call(
                Method::POST,
                "/session",
                Some(json!({"capabilities": {"alwaysMatch": {}}})),
            )? {
                Reply::Value(v) => v,
                Reply::Fault { error, message } => {
                    return Err(SyncError::WebDriver(format!("new session: {error}: {message}")))
                }
            };
            let id = created
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| SyncError::WebDriver("new session without id".to_string()))?;
            debug!("webdriver session {id}");
            self.session_id = Some(id.to_string());
        }
        self.command(Method::POST, "/url", Some(json!({"url": url})))?;
        Ok(())
    }

    fn fill(&mut self, target: &Locator, text: &str) -> Result<()> {
        let element = self.require(target)?;
        self.command(Method::POST, &format!("/element/{element}/clear"), Some(json!({})))?;
        self.command(
            Method::POST,
            &format!("/element/{element}/value"),
            Some(json!({"text": text})),
        )?;
        Ok(())
    }

    fn click(&mut self, target: &Locator) -> Result<()> {
        let element = self.require(target)?;
        self.command(Method::POST, &format!("/element/{element}/click"), Some(json!({})))?;
        Ok(())
    }

    fn wait_visible(&mut self, target: &Locator, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find(target)? {
                if self.is_displayed(&element)? {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(self.poll);
        }
    }

    fn options(&mut self, target: &Locator) -> Result<Vec<String>> {
        let mut labels = Vec::new();
        for option in self.option_elements(target)? {
            let text = self.command(Method::GET, &format!("/element/{option}/text"), None)?;
            labels.push(text.as_str().unwrap_or_default().to_string());
        }
        Ok(labels)
    }

    fn select_option(&mut self, target: &Locator, index: usize) -> Result<()> {
        let options = self.option_elements(target)?;
        let option = options.get(index).ok_or_else(|| {
            SyncError::AccountOption(format!("{target} has {} options, wanted #{index}", options.len()))
        })?;
        self.command(Method::POST, &format!("/element/{option}/click"), Some(json!({})))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(id) = self.session_id.take() {
            if let Reply::Fault { error, message } =
                self.call(Method::DELETE, &format!("/session/{id}"), None)?
            {
                return Err(SyncError::WebDriver(format!("close: {error}: {message}")));
            }
        }
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.session_id.is_some() {
            if let Err(e) = self.close() {
                warn!("could not close browser session: {e}");
            }
        }
    }
}
