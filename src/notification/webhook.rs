use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::parcel::Parcel;
use crate::models::resident::{Resident, ResidentSummary};

// ── Parcel Event Types ───────────────────────────────────────

/// How a pickup was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupMethod {
    QrScan,
    Staff,
}

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ParcelEvent {
    /// "parcel_registered" or "parcel_picked_up".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub parcel_id: i64,
    pub tracking_id: String,
    pub status: String,
    /// Event-specific details (resident contact, pickup method, ...).
    pub details: serde_json::Value,
}

impl ParcelEvent {
    /// Sent when the desk logs a new parcel; the receiver notifies the resident.
    pub fn parcel_registered(parcel: &Parcel, resident: &Resident) -> Self {
        Self {
            event_type: "parcel_registered".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            parcel_id: parcel.id,
            tracking_id: parcel.tracking_id.to_string(),
            status: parcel.status.to_string(),
            details: serde_json::json!({
                "resident": ResidentSummary::from(resident),
                "service": parcel.service,
                "description": parcel.description,
            }),
        }
    }

    pub fn parcel_picked_up(parcel: &Parcel, method: PickupMethod) -> Self {
        Self {
            event_type: "parcel_picked_up".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            parcel_id: parcel.id,
            tracking_id: parcel.tracking_id.to_string(),
            status: parcel.status.to_string(),
            details: serde_json::json!({
                "resident_id": parcel.resident_id,
                "method": method,
                "picked_up_time": parcel.picked_up_time.map(|t| t.to_rfc3339()),
            }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let result = mac.finalize();
    let bytes = result.into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Dispatches parcel events to the configured webhook URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Parceldesk-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Arc<Vec<String>>,
    secret: Option<Arc<str>>,
    /// Background deliveries not yet awaited by `flush`.
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, secret: Option<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Parceldesk-Webhook/1.0")
                .build()?,
            urls: Arc::new(urls),
            secret: secret.map(Arc::from),
            pending: Arc::default(),
        })
    }

    /// A notifier with no targets. `notify` becomes a no-op.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            urls: Arc::new(Vec::new()),
            secret: None,
            pending: Arc::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.urls.is_empty()
    }

    /// Send a signed event to a single URL with retry.
    ///
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send_signed(
        &self,
        url: &str,
        event: &ParcelEvent,
        signing_secret: Option<&str>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = signing_secret.map(|s| hmac_sha256_hex(s, &payload));

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-parceldesk-delivery-id", &delivery_id)
                .header("x-parceldesk-timestamp", &timestamp)
                .header("x-parceldesk-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-parceldesk-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        parcel_id = event.parcel_id,
                        delivery_id = %delivery_id,
                        attempt,
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} retries: {}",
            backoff_secs.len() - 1,
            url
        ))
    }

    /// Deliver an event to every configured URL in the background.
    ///
    /// Never blocks the caller and never reports failure back: a parcel
    /// transition is complete whether or not anyone was told about it.
    pub fn notify(&self, event: ParcelEvent) {
        if self.urls.is_empty() {
            return;
        }

        let notifier = self.clone();
        let handle = tokio::spawn(async move {
            let deliveries = notifier.urls.iter().map(|url| {
                let notifier = &notifier;
                let event = &event;
                async move {
                    if let Err(e) = notifier
                        .send_signed(url, event, notifier.secret.as_deref())
                        .await
                    {
                        warn!(url = %url, error = %e, "webhook dispatch ultimately failed");
                    }
                }
            });
            futures::future::join_all(deliveries).await;
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every delivery started by `notify` so far.
    ///
    /// Short-lived callers (the CLI) must call this before the runtime
    /// shuts down, or queued events are dropped.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "webhook delivery task failed");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
