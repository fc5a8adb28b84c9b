use std::path::Path;
use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{Result, SyncError};
use crate::fetcher::{MessageQuery, MessageSource};
use crate::models::{Header, RawMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only Gmail REST v1 client. Obtaining and refreshing the token happens elsewhere.
pub struct GmailSource {
    client: Client,
    api_base: String,
    token: Zeroizing<String>,
}

#[derive(Deserialize)]
struct TokenFile {
    #[serde(alias = "access_token")]
    token: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct GmailMessage {
    id: String,
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<PayloadHeader>,
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Deserialize)]
struct PayloadHeader {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct PayloadBody {
    data: Option<String>,
}

impl Payload {
    fn own_data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }

    /// The single-part body, or the first `text/plain` part of a multipart message.
    fn text_data(&self) -> Option<&str> {
        if let Some(data) = self.own_data() {
            if self.parts.is_empty() {
                return Some(data);
            }
        }
        self.parts
            .iter()
            .find(|p| p.mime_type.eq_ignore_ascii_case("text/plain") && p.own_data().is_some())
            .and_then(Payload::own_data)
            .or_else(|| self.parts.iter().find_map(Payload::text_data))
    }
}

impl From<GmailMessage> for RawMessage {
    fn from(msg: GmailMessage) -> Self {
        let Some(payload) = msg.payload else {
            return RawMessage {
                id: msg.id,
                ..Default::default()
            };
        };
        let body_data = payload.text_data().map(str::to_string);
        RawMessage {
            id: msg.id,
            headers: payload
                .headers
                .into_iter()
                .map(|h| Header {
                    name: h.name,
                    value: h.value,
                })
                .collect(),
            body_data,
        }
    }
}

fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().unwrap_or_default();
    Err(SyncError::Gmail(format!("{status}: {}", text.trim())))
}

impl GmailSource {
    pub fn new(api_base: &str, token: Zeroizing<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Token files hold `{"token": "..."}` or `{"access_token": "..."}`.
    pub fn from_token_file(api_base: &str, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Credentials(format!("{}: {e}", path.display())))?;
        let parsed: TokenFile = serde_json::from_str(&content)
            .map_err(|e| SyncError::Credentials(format!("{}: {e}", path.display())))?;
        Self::new(api_base, Zeroizing::new(parsed.token))
    }
}

impl MessageSource for GmailSource {
    fn list_ids(&self, query: &MessageQuery) -> Result<Vec<String>> {
        let search = query.to_search();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![("q", search.clone())];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let resp = self
                .client
                .get(format!("{}/messages", self.api_base))
                .bearer_auth(self.token.as_str())
                .query(&params)
                .send()?;
            let page: ListResponse = check(resp)?.json()?;
            ids.extend(page.messages.into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        debug!("gmail returned {} ids", ids.len());
        Ok(ids)
    }

    fn fetch(&self, id: &str) -> Result<RawMessage> {
        let resp = self
            .client
            .get(format!("{}/messages/{id}", self.api_base))
            .bearer_auth(self.token.as_str())
            .query(&[("format", "full")])
            .send()?;
        let msg: GmailMessage = check(resp)?.json()?;
        Ok(msg.into())
    }
}
