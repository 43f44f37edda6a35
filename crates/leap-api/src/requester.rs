// ── Request/response router ──
//
// Every outbound request carries a client-assigned tag which the bridge
// echoes back in `Header.ClientTag`, letting any number of requests share
// one stream. Incoming messages resolve a pending tag when they carry
// one; everything else is routed by URL to subscription handlers, then to
// catch-all unsolicited handlers, and finally dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionReader, ConnectionWriter};
use crate::error::Error;
use crate::messages::{CommuniqueType, Message, ResponseStatus};

/// Default deadline for a single request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler invoked on the read-loop task for routed messages. Must not
/// block; long work belongs on another task.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// How a subscription's URL is matched against incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlMatch {
    Exact,
    /// The subscribed URL, or anything below it. The match ends at a
    /// path-segment boundary, so `/button` does not claim
    /// `/buttongroup/5`.
    Prefix,
}

fn prefix_matches(prefix: &str, url: &str) -> bool {
    url.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

struct UrlSubscription {
    url: String,
    mode: UrlMatch,
    handler: MessageHandler,
}

struct Shared {
    next_tag: AtomicU64,
    next_handler_token: AtomicU64,
    timeout: Duration,
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    subscriptions: Mutex<Vec<UrlSubscription>>,
    unsolicited: Mutex<Vec<(u64, MessageHandler)>>,
    writer: tokio::sync::Mutex<ConnectionWriter>,
    reader: Mutex<Option<ConnectionReader>>,
    cancel: CancellationToken,
}

/// Multiplexes concurrent requests over a single [`Connection`] and
/// routes unsolicited traffic to registered handlers.
///
/// Cheaply cloneable; all clones share one stream. [`run`](Self::run)
/// must be driven on a task for any traffic to flow.
#[derive(Clone)]
pub struct Requester {
    shared: Arc<Shared>,
}

impl Requester {
    pub fn new(connection: Connection) -> Self {
        Self::with_timeout(connection, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(connection: Connection, timeout: Duration) -> Self {
        let (reader, writer) = connection.into_split();
        Self {
            shared: Arc::new(Shared {
                next_tag: AtomicU64::new(0),
                next_handler_token: AtomicU64::new(0),
                timeout,
                pending: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(Vec::new()),
                unsolicited: Mutex::new(Vec::new()),
                writer: tokio::sync::Mutex::new(writer),
                reader: Mutex::new(Some(reader)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Read loop ────────────────────────────────────────────────────

    /// Drive the read loop until the peer closes, a framing error occurs,
    /// or [`close`](Self::close) is called. Resolves all outstanding
    /// requests with [`Error::ConnectionClosed`] on exit.
    pub async fn run(&self) -> Result<(), Error> {
        let Some(mut reader) = self.shared.reader.lock().take() else {
            warn!("requester read loop started twice");
            return Ok(());
        };

        let result = loop {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break Ok(()),
                value = reader.read_value() => match value {
                    Ok(Some(value)) => self.dispatch(value),
                    Ok(None) => {
                        debug!("LEAP stream ended");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        self.fail_pending();
        result
    }

    fn dispatch(&self, value: serde_json::Value) {
        let message: Message = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "skipping message with unrecognized envelope");
                return;
            }
        };

        if let Some(tag) = message.header.client_tag.as_deref() {
            let sender = self.shared.pending.lock().remove(tag);
            if let Some(sender) = sender {
                // Send fails only if the awaiting caller was cancelled;
                // the response is dropped in that case.
                let _ = sender.send(message);
                return;
            }
            trace!(tag, "response for unknown tag");
        }

        let url = message.url().to_owned();
        let mut handlers: Vec<MessageHandler> = {
            let subscriptions = self.shared.subscriptions.lock();
            subscriptions
                .iter()
                .filter(|sub| match sub.mode {
                    UrlMatch::Exact => sub.url == url,
                    UrlMatch::Prefix => prefix_matches(&sub.url, &url),
                })
                .map(|sub| Arc::clone(&sub.handler))
                .collect()
        };
        if handlers.is_empty() {
            // Catch-all handlers only see messages no subscription claims.
            let unsolicited = self.shared.unsolicited.lock();
            handlers = unsolicited.iter().map(|(_, h)| Arc::clone(h)).collect();
        }

        if handlers.is_empty() {
            debug!(%url, communique_type = %message.communique_type, "dropping unsolicited message");
            return;
        }

        for handler in &handlers {
            handler(&message);
        }
    }

    fn fail_pending(&self) {
        // Dropping the senders resolves every awaiting caller with
        // ConnectionClosed.
        self.shared.pending.lock().clear();
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Issue a request and await its tagged response, surfacing non-2xx
    /// statuses as [`Error::Bridge`].
    pub async fn request(
        &self,
        communique_type: CommuniqueType,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Message, Error> {
        let response = self.request_raw(communique_type, url, body).await?;
        let status = response.header.status.clone();
        match status {
            Some(ref status) if status.is_successful() => Ok(response),
            other => Err(Error::Bridge {
                status: other.unwrap_or_else(|| ResponseStatus {
                    code: None,
                    message: "missing status".into(),
                }),
                url: url.to_owned(),
            }),
        }
    }

    /// Issue a request and await its tagged response without inspecting
    /// the status code.
    pub async fn request_raw(
        &self,
        communique_type: CommuniqueType,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Message, Error> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let tag = (self.shared.next_tag.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let (sender, receiver) = oneshot::channel();
        self.shared.pending.lock().insert(tag.clone(), sender);

        let message = Message::request(communique_type, url, tag.clone(), body);
        let write_result = {
            let mut writer = self.shared.writer.lock().await;
            writer.write_json(&message).await
        };
        if let Err(e) = write_result {
            self.shared.pending.lock().remove(&tag);
            return Err(e);
        }

        match tokio::time::timeout(self.shared.timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&tag);
                Err(Error::Timeout {
                    url: url.to_owned(),
                })
            }
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Send a `SubscribeRequest` and, on success, route subsequent
    /// messages matching `url` to `handler`. Returns the initial
    /// response (which carries the current state) and the request tag.
    pub async fn subscribe(
        &self,
        url: &str,
        mode: UrlMatch,
        body: Option<serde_json::Value>,
        handler: MessageHandler,
    ) -> Result<(Message, String), Error> {
        let response = self
            .request(CommuniqueType::SubscribeRequest, url, body)
            .await?;

        let tag = response.header.client_tag.clone().unwrap_or_default();
        self.shared.subscriptions.lock().push(UrlSubscription {
            url: url.to_owned(),
            mode,
            handler,
        });
        Ok((response, tag))
    }

    /// Register a catch-all handler for messages no subscription claims.
    /// Returns a token accepted by
    /// [`unsubscribe_unsolicited`](Self::unsubscribe_unsolicited).
    pub fn subscribe_unsolicited(&self, handler: MessageHandler) -> u64 {
        let token = self.shared.next_handler_token.fetch_add(1, Ordering::Relaxed);
        self.shared.unsolicited.lock().push((token, handler));
        token
    }

    pub fn unsubscribe_unsolicited(&self, token: u64) {
        self.shared.unsolicited.lock().retain(|(t, _)| *t != token);
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop the read loop, half-close the stream, and resolve all
    /// pending requests with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let mut writer = self.shared.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "error shutting down LEAP stream");
        }
        self.fail_pending();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}
