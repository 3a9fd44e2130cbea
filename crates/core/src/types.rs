use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw webhook envelope as delivered by the chat platform.
/// `destination` is the opaque channel identifier used for tenant routing.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub message: Option<MessagePayload>,
    pub postback: Option<PostbackPayload>,
    #[serde(default)]
    pub source: EventSource,
    pub reply_token: Option<String>,
    pub webhook_event_id: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub id: Option<String>,
    pub text: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostbackPayload {
    pub data: Option<String>,
}

/// Semantic kind of an inbound event after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Text,
    Image,
    Location,
    Postback,
    Other,
}

/// One normalized inbound event. Ephemeral: lives only for the duration of
/// a single dispatch; the processed fact is recorded by the dedup marker.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub user_id: String,
    /// Upstream event id used for dedup. Absent ⇒ the event is always-new.
    pub event_id: Option<String>,
    pub message_id: Option<String>,
    pub reply_token: Option<String>,
    pub text: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Normalize a raw webhook event. Returns None for non-message,
    /// non-postback events or events without a sender.
    pub fn from_webhook(ev: &WebhookEvent) -> Option<Self> {
        let user_id = ev.source.user_id.clone().filter(|u| !u.is_empty())?;

        let (kind, msg) = match ev.event_type.as_deref() {
            Some("message") => {
                let msg = ev.message.clone().unwrap_or_default();
                let kind = match msg.message_type.as_deref() {
                    Some("text") => EventKind::Text,
                    Some("image") => EventKind::Image,
                    Some("location") => EventKind::Location,
                    _ => EventKind::Other,
                };
                (kind, msg)
            }
            Some("postback") => (EventKind::Postback, MessagePayload::default()),
            _ => return None,
        };

        // Prefer the upstream event id; message id and reply token are
        // stable fallbacks on redelivery of the same message.
        let event_id = ev
            .webhook_event_id
            .clone()
            .or_else(|| msg.id.clone())
            .or_else(|| ev.reply_token.clone())
            .filter(|s| !s.is_empty());

        Some(Self {
            kind,
            user_id,
            event_id,
            message_id: msg.id.clone(),
            reply_token: ev.reply_token.clone(),
            text: msg.text.as_deref().map(|t| t.trim().to_string()),
            latitude: msg.latitude,
            longitude: msg.longitude,
            address: msg.address.clone(),
            received_at: Utc::now(),
        })
    }
}

/// Role of a tenant sub-channel. The two roles imply different
/// conversational flows and reconciliation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Admin,
    Consumer,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Admin => "admin",
            ChannelRole::Consumer => "consumer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(ChannelRole::Admin),
            "consumer" => Some(ChannelRole::Consumer),
            _ => None,
        }
    }
}

/// One named sub-channel of a tenant's messaging surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantChannel {
    pub name: String,
    pub role: ChannelRole,
    /// Routing identifier the platform sends as the webhook `destination`.
    pub channel_id: String,
    /// Legacy numeric channel id kept for older tenant records.
    pub legacy_channel_id: Option<String>,
    pub channel_secret: Option<String>,
    pub access_token: Option<String>,
}

/// Merged per-tenant configuration resolved from the tenant store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub active: bool,
    pub channels: Vec<TenantChannel>,
}

impl TenantConfig {
    /// Classify the inbound routing identifier against the configured
    /// sub-channels. First match wins; no match defaults to the admin
    /// context so ambiguous traffic lands on the human-reviewed path.
    pub fn classify(&self, destination: &str) -> ChannelRole {
        for ch in &self.channels {
            if ch.channel_id == destination {
                return ch.role;
            }
        }
        ChannelRole::Admin
    }

    pub fn channel(&self, role: ChannelRole) -> Option<&TenantChannel> {
        self.channels.iter().find(|c| c.role == role)
    }

    /// Secret used to verify webhook signatures for the channel that
    /// received this call, falling back to the admin channel's secret.
    pub fn channel_secret_for(&self, destination: &str) -> Option<&str> {
        let role = self.classify(destination);
        self.channel(role)
            .or_else(|| self.channel(ChannelRole::Admin))
            .and_then(|c| c.channel_secret.as_deref())
    }

    pub fn access_token_for(&self, role: ChannelRole) -> Option<&str> {
        self.channel(role)
            .or_else(|| self.channel(ChannelRole::Admin))
            .and_then(|c| c.access_token.as_deref())
    }
}

/// One outbound text message, optionally carrying quick-reply buttons.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<QuickReply>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickReply {
    pub label: String,
    pub text: String,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quick_replies: Vec::new(),
        }
    }

    /// Builder-style method to add a quick-reply button.
    pub fn with_quick_reply(mut self, label: &str, text: &str) -> Self {
        self.quick_replies.push(QuickReply {
            label: label.to_string(),
            text: text.to_string(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_event(event_id: Option<&str>, message_id: Option<&str>, reply: Option<&str>) -> WebhookEvent {
        WebhookEvent {
            event_type: Some("message".to_string()),
            message: Some(MessagePayload {
                message_type: Some("text".to_string()),
                id: message_id.map(str::to_string),
                text: Some("  hello  ".to_string()),
                ..Default::default()
            }),
            source: EventSource {
                user_id: Some("U1".to_string()),
            },
            reply_token: reply.map(str::to_string),
            webhook_event_id: event_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn normalizes_text_and_trims() {
        let ev = InboundEvent::from_webhook(&text_event(Some("evt1"), Some("m1"), None)).unwrap();
        assert_eq!(ev.kind, EventKind::Text);
        assert_eq!(ev.text.as_deref(), Some("hello"));
        assert_eq!(ev.event_id.as_deref(), Some("evt1"));
    }

    #[test]
    fn event_id_falls_back_to_message_id_then_reply_token() {
        let ev = InboundEvent::from_webhook(&text_event(None, Some("m1"), Some("r1"))).unwrap();
        assert_eq!(ev.event_id.as_deref(), Some("m1"));
        let ev = InboundEvent::from_webhook(&text_event(None, None, Some("r1"))).unwrap();
        assert_eq!(ev.event_id.as_deref(), Some("r1"));
        let ev = InboundEvent::from_webhook(&text_event(None, None, None)).unwrap();
        assert!(ev.event_id.is_none());
    }

    #[test]
    fn drops_events_without_sender() {
        let mut ev = text_event(Some("evt1"), None, None);
        ev.source.user_id = None;
        assert!(InboundEvent::from_webhook(&ev).is_none());
    }

    #[test]
    fn unmatched_destination_classifies_as_admin() {
        let cfg = TenantConfig {
            tenant_id: "shop1".to_string(),
            active: true,
            channels: vec![TenantChannel {
                name: "storefront".to_string(),
                role: ChannelRole::Consumer,
                channel_id: "Uconsumer".to_string(),
                legacy_channel_id: None,
                channel_secret: None,
                access_token: None,
            }],
        };
        assert_eq!(cfg.classify("Uconsumer"), ChannelRole::Consumer);
        assert_eq!(cfg.classify("Uunknown"), ChannelRole::Admin);
    }
}
