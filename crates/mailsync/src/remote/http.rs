//! HTTP implementation of the remote mailbox API
//!
//! Uses synchronous HTTP (ureq) to stay executor-agnostic. Every call
//! except single-message fetches is routed through the shared
//! [`RetryPolicy`]; message fetches are bulk work whose retry policy
//! belongs to the fetch scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::api::{ChangePage, MessageList, Profile, RemoteMessage};
use super::{MailApi, TokenProvider};
use crate::error::SyncError;
use crate::models::MessageId;
use crate::retry::RetryPolicy;

/// Remote mailbox client over HTTPS
pub struct HttpMailClient {
    base_url: String,
    token: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

/// Body for label modification requests
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyLabelsBody<'a> {
    add_label_ids: &'a [&'a str],
    remove_label_ids: &'a [&'a str],
}

/// Body for batch label modification requests
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchModifyBody<'a> {
    ids: Vec<&'a str>,
    add_label_ids: &'a [&'a str],
    remove_label_ids: &'a [&'a str],
}

impl HttpMailClient {
    /// Default API base URL
    const BASE_URL: &'static str = "https://mail.vela.dev/api/v1";

    pub fn new(token: Arc<dyn TokenProvider>, retry: RetryPolicy) -> Self {
        Self {
            base_url: Self::BASE_URL.to_string(),
            token,
            retry,
        }
    }

    /// Override the API base URL (testing servers, staging)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.token.current_token()?))
    }

    /// GET a JSON resource with classified errors
    fn get_json<T: DeserializeOwned>(&self, url: &str, timeout: Option<Duration>) -> Result<T> {
        let auth = self.bearer()?;

        let call = match timeout {
            Some(t) => {
                let config = ureq::Agent::config_builder()
                    .timeout_global(Some(t))
                    .build();
                let agent: ureq::Agent = config.into();
                agent.get(url).header("Authorization", &auth).call()
            }
            None => ureq::get(url).header("Authorization", &auth).call(),
        };

        let mut response = call.map_err(classify_call_error)?;
        response
            .body_mut()
            .read_json()
            .map_err(|e| SyncError::Malformed(e.to_string()).into())
    }

    /// POST a JSON body, ignoring the response payload
    fn post_json<B: Serialize>(&self, url: &str, body: &B) -> Result<()> {
        let auth = self.bearer()?;
        ureq::post(url)
            .header("Authorization", &auth)
            .send_json(body)
            .map_err(classify_call_error)?;
        Ok(())
    }
}

/// Map a ureq error to the classified taxonomy
fn classify_call_error(err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(401) => SyncError::AuthExpired.into(),
        ureq::Error::StatusCode(429) => SyncError::RateLimited { retry_after: None }.into(),
        ureq::Error::StatusCode(status) if (500..600).contains(&status) => {
            SyncError::TransientServer { status }.into()
        }
        ureq::Error::StatusCode(status) => SyncError::UnexpectedStatus(status).into(),
        other => SyncError::NetworkTimeout(other.to_string()).into(),
    }
}

impl MailApi for HttpMailClient {
    fn get_profile(&self) -> Result<Profile> {
        let url = format!("{}/profile", self.base_url);
        self.retry
            .execute("get_profile", || self.get_json(&url, None))
    }

    fn list_messages(&self, max_results: usize, query: Option<&str>) -> Result<MessageList> {
        let mut url = format!(
            "{}/messages?maxResults={}",
            self.base_url,
            max_results.min(500)
        );
        if let Some(q) = query {
            url.push_str(&format!("&q={q}"));
        }
        self.retry
            .execute("list_messages", || self.get_json(&url, None))
    }

    fn get_message(&self, id: &MessageId, timeout: Duration) -> Result<RemoteMessage> {
        // No RetryPolicy here: the fetch scheduler owns retry for bulk
        // fetches and uses a linear scheme with per-priority budgets.
        let url = format!("{}/messages/{}?format=full", self.base_url, id.as_str());
        self.get_json(&url, Some(timeout))
    }

    fn list_changes(&self, cursor: &str, page_token: Option<&str>) -> Result<ChangePage> {
        let mut url = format!("{}/changes?startCursor={}", self.base_url, cursor);
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={token}"));
        }
        // A 404 on the changes feed means the cursor has aged out on
        // the server, not a missing resource.
        self.retry.execute("list_changes", || {
            self.get_json::<ChangePage>(&url, None)
                .map_err(remap_expired_cursor)
        })
    }

    fn modify_labels(&self, id: &MessageId, add: &[&str], remove: &[&str]) -> Result<()> {
        if id.as_str().is_empty() {
            return Err(SyncError::MissingTarget.into());
        }
        let url = format!("{}/messages/{}/modify", self.base_url, id.as_str());
        let body = ModifyLabelsBody {
            add_label_ids: add,
            remove_label_ids: remove,
        };
        self.retry
            .execute("modify_labels", || self.post_json(&url, &body))
    }

    fn batch_modify_labels(&self, ids: &[MessageId], add: &[&str], remove: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Err(SyncError::MissingTarget.into());
        }
        let url = format!("{}/messages/batchModify", self.base_url);
        let body = BatchModifyBody {
            ids: ids.iter().map(|id| id.as_str()).collect(),
            add_label_ids: add,
            remove_label_ids: remove,
        };
        self.retry
            .execute("batch_modify_labels", || self.post_json(&url, &body))
    }
}

/// Rewrite a 404 from the changes feed into the distinct
/// expired-cursor class
fn remap_expired_cursor(err: anyhow::Error) -> anyhow::Error {
    match SyncError::classify(&err) {
        Some(SyncError::UnexpectedStatus(404)) => SyncError::CursorExpired.into(),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_expired() {
        let err = classify_call_error(ureq::Error::StatusCode(401));
        assert!(matches!(
            SyncError::classify(&err),
            Some(SyncError::AuthExpired)
        ));
    }

    #[test]
    fn test_classify_rate_limited() {
        let err = classify_call_error(ureq::Error::StatusCode(429));
        assert!(matches!(
            SyncError::classify(&err),
            Some(SyncError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_classify_server_errors() {
        for status in [500, 502, 503, 504] {
            let err = classify_call_error(ureq::Error::StatusCode(status));
            assert!(matches!(
                SyncError::classify(&err),
                Some(SyncError::TransientServer { .. })
            ));
        }
    }

    #[test]
    fn test_classify_unrecognized_status_stays_structural() {
        let err = classify_call_error(ureq::Error::StatusCode(403));
        assert!(matches!(
            SyncError::classify(&err),
            Some(SyncError::UnexpectedStatus(403))
        ));
    }

    #[test]
    fn test_remap_expired_cursor() {
        let err = remap_expired_cursor(classify_call_error(ureq::Error::StatusCode(404)));
        assert!(matches!(
            SyncError::classify(&err),
            Some(SyncError::CursorExpired)
        ));

        let untouched = remap_expired_cursor(classify_call_error(ureq::Error::StatusCode(503)));
        assert!(matches!(
            SyncError::classify(&untouched),
            Some(SyncError::TransientServer { status: 503 })
        ));
    }
}
