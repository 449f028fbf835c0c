use crate::database::models::PushSubscription;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use web_push::{ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushError, WebPushMessage, WebPushMessageBuilder};

pub const PUSH_TITLE: &str = "Gold Price Alert";

/// Body delivered to every push subscription.
pub fn push_payload(message: &str, metadata: &serde_json::Value) -> serde_json::Value {
    json!({
        "title": PUSH_TITLE,
        "body": message,
        "data": metadata,
    })
}

/// One outbound delivery to a single subscription endpoint.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, subscription: &PushSubscription, payload: &serde_json::Value) -> Result<()>;
}

/// VAPID signing material: a PEM encoded P-256 private key and the `sub` claim.
#[derive(Clone)]
pub struct VapidKey {
    pem: Vec<u8>,
    subject: String,
}

impl VapidKey {
    pub fn new(pem: impl Into<Vec<u8>>, subject: impl Into<String>) -> Self {
        Self {
            pem: pem.into(),
            subject: subject.into(),
        }
    }

    pub fn from_pem_file(path: &Path, subject: impl Into<String>) -> Result<Self> {
        let pem = std::fs::read(path)
            .map_err(|e| AppError::Config(format!("failed to read VAPID key {}: {}", path.display(), e)))?;
        Ok(Self::new(pem, subject))
    }
}

/// Maps the push crate's errors onto delivery errors; endpoint rejections keep
/// the status the push service would have answered with.
fn push_error(e: WebPushError) -> AppError {
    let status = match &e {
        WebPushError::EndpointNotFound { .. } => Some(404),
        WebPushError::EndpointNotValid { .. } => Some(410),
        _ => None,
    };
    AppError::Delivery {
        status,
        message: e.to_string(),
    }
}

/// Web Push transport: the payload is encrypted with the subscription's keys
/// (aes128gcm), signed with VAPID when a key is configured, and POSTed over reqwest.
pub struct WebPushTransport {
    client: reqwest::Client,
    ttl_seconds: u32,
    vapid: Option<VapidKey>,
}

impl WebPushTransport {
    pub fn new(request_timeout: Duration, ttl_seconds: u64, vapid: Option<VapidKey>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build push client: {}", e)))?;

        Ok(Self {
            client,
            ttl_seconds: u32::try_from(ttl_seconds).unwrap_or(u32::MAX),
            vapid,
        })
    }

    fn encrypt(&self, subscription: &PushSubscription, body: &[u8]) -> Result<WebPushMessage> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            subscription.keys.p256dh.as_str(),
            subscription.keys.auth.as_str(),
        );

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl_seconds);
        builder.set_payload(ContentEncoding::Aes128Gcm, body);

        if let Some(vapid) = &self.vapid {
            let mut signature = VapidSignatureBuilder::from_pem(vapid.pem.as_slice(), &info).map_err(push_error)?;
            signature.add_claim("sub", vapid.subject.as_str());
            builder.set_vapid_signature(signature.build().map_err(push_error)?);
        }

        builder.build().map_err(push_error)
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn deliver(&self, subscription: &PushSubscription, payload: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(payload).map_err(|e| AppError::Delivery {
            status: None,
            message: format!("failed to encode push payload: {}", e),
        })?;
        let message = self.encrypt(subscription, &body)?;

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());
        if let Some(encrypted) = message.payload {
            request = request
                .header(CONTENT_ENCODING, encrypted.content_encoding.to_str())
                .header(CONTENT_TYPE, "application/octet-stream");
            for (name, value) in encrypted.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(encrypted.content);
        }

        let response = request.send().await.map_err(|e| AppError::Delivery {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            debug!("Push delivered to {} ({})", subscription.endpoint, status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(AppError::Delivery {
            status: Some(status.as_u16()),
            message: if body.is_empty() {
                status.to_string()
            } else {
                format!("{}: {}", status, body)
            },
        })
    }
}
