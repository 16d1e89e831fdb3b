use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outbound mail never blocks the request path for long: the HTTP client
/// gives up after this timeout and the caller treats it as a transport
/// failure.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// MailError
///
/// Transport-level failure of outbound delivery. Deliberately not part of
/// `ApiError`: a failed send is logged by the caller and never aborts the
/// confirmation-code flow, so it must not be convertible into a response.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport failure: {0}")]
    Transport(String),
}

/// Mailer
///
/// Abstract contract for the outbound mail capability:
/// `send(to, subject, body)`. The concrete implementation is swapped between
/// the real HTTP mail API client in production and the recording mock in
/// tests, without the handlers noticing.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// The shared trait-object form placed in the application state.
pub type MailerState = Arc<dyn Mailer>;

/// HttpMailClient
///
/// Production implementation backed by a JSON HTTP mail API. The request
/// carries the configured sender address and bearer key; delivery is
/// attempted once with a bounded timeout and never retried automatically.
pub struct HttpMailClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sender: String,
}

impl HttpMailClient {
    /// Builds the client at startup. Fail-fast: a reqwest client that cannot
    /// be constructed means a broken TLS environment, not a per-request
    /// condition.
    pub fn new(endpoint: &str, api_key: &str, sender: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("FATAL: failed to construct HTTP client for mail transport");
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailClient {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.sender,
                "to": to,
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MailError::Transport(format!(
                "mail API answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// --- Test Double ---

/// A single captured outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// MockMailer
///
/// In-memory stand-in used by the test suite: records every message instead
/// of delivering it, and can be flipped into an always-failing mode to
/// exercise the transport-failure path.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails with a transport error.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Snapshot of everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Transport("mock transport down".to_string()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
