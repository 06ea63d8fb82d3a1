use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{ChannelInfo, MAX_CONSECUTIVE_ERRORS};
use crate::error::{AppError, Result};
use crate::types::{FilterSpec, Notification, Offer};

// ---------------------------------------------------------------------------
// Message builders
// ---------------------------------------------------------------------------

/// Alert for one freshly matched offer. The link anchors to the offer's
/// position on the listing page.
pub fn offer_notification(channel: Option<String>, url: &str, offer: &Offer) -> Notification {
    Notification {
        channel,
        title: "New SkinBaron offer".to_string(),
        body: format!(
            "[View offer]({url}#offer-{pos})\nPrice: {price} €\nWear: {wear}",
            pos = offer.position,
            price = offer.price,
            wear = offer.wear,
        ),
        image_url: offer.image_url.clone(),
        stickers: offer.stickers.clone(),
    }
}

/// The one-time notice sent when a filter hits the error threshold.
pub fn disabled_notification(channel: Option<String>, spec: &FilterSpec) -> Notification {
    Notification {
        channel,
        title: "Filter disabled".to_string(),
        body: format!(
            "The filter on `{}` was disabled after {MAX_CONSECUTIVE_ERRORS} consecutive errors.",
            spec.url
        ),
        image_url: None,
        stickers: Vec::new(),
    }
}

/// Discord-compatible webhook body: one embed per notification.
pub fn webhook_payload(note: &Notification) -> serde_json::Value {
    let mut embed = json!({
        "title": note.title,
        "description": note.body,
    });
    if let Some(img) = &note.image_url {
        embed["image"] = json!({ "url": img });
    }
    if !note.stickers.is_empty() {
        embed["fields"] = json!([{
            "name": "Stickers",
            "value": note.stickers.join(", "),
            "inline": false,
        }]);
    }
    json!({ "embeds": [embed] })
}

// ---------------------------------------------------------------------------
// NotificationDispatcher
// ---------------------------------------------------------------------------

/// Drains the notification queue and posts each message to its webhook.
/// Runs as a dedicated task so delivery latency never stalls a polling loop.
/// Delivery is fire-and-forget: failures are logged and the message dropped.
pub struct NotificationDispatcher {
    client: Client,
    channels: Vec<ChannelInfo>,
    rx: mpsc::Receiver<Notification>,
}

impl NotificationDispatcher {
    pub fn new(client: Client, channels: Vec<ChannelInfo>, rx: mpsc::Receiver<Notification>) -> Self {
        Self { client, channels, rx }
    }

    pub async fn run(mut self) {
        while let Some(note) = self.rx.recv().await {
            let Some(target) = resolve_channel(&self.channels, note.channel.as_deref()) else {
                warn!(title = %note.title, "No deliverable channel, dropping notification");
                continue;
            };
            match self.deliver(target, &note).await {
                Ok(()) => debug!(channel = %target.name, title = %note.title, "Delivered"),
                Err(e) => warn!(channel = %target.name, "Webhook delivery failed: {e}"),
            }
        }
    }

    async fn deliver(&self, target: &ChannelInfo, note: &Notification) -> Result<()> {
        let res = self
            .client
            .post(&target.url)
            .json(&webhook_payload(note))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(AppError::PageStatus(res.status()));
        }
        Ok(())
    }
}

/// Pick the delivery target: the named channel when the notification carries
/// one, otherwise the first configured channel.
fn resolve_channel<'a>(
    channels: &'a [ChannelInfo],
    name: Option<&str>,
) -> Option<&'a ChannelInfo> {
    match name {
        Some(name) => channels.iter().find(|c| c.name == name),
        None => channels.first(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WearCondition;

    fn channels() -> Vec<ChannelInfo> {
        vec![
            ChannelInfo { name: "general".into(), url: "https://example.com/h/1".into() },
            ChannelInfo { name: "alerts".into(), url: "https://example.com/h/2".into() },
        ]
    }

    #[test]
    fn named_channel_is_resolved() {
        let chs = channels();
        assert_eq!(resolve_channel(&chs, Some("alerts")).unwrap().name, "alerts");
    }

    #[test]
    fn missing_name_falls_back_to_first() {
        let chs = channels();
        assert_eq!(resolve_channel(&chs, None).unwrap().name, "general");
    }

    #[test]
    fn unknown_name_resolves_nothing() {
        assert!(resolve_channel(&channels(), Some("nope")).is_none());
        assert!(resolve_channel(&[], None).is_none());
    }

    #[test]
    fn payload_includes_image_and_stickers_when_present() {
        let offer = Offer {
            position: 3,
            price: 42.5,
            wear: WearCondition::MinimalWear,
            image_url: Some("https://cdn.skinbaron.de/x.png".into()),
            stickers: vec!["Crown (Foil)".into(), "Howling Dawn".into()],
        };
        let note = offer_notification(Some("general".into()), "https://example/listing", &offer);
        assert!(note.body.contains("#offer-3"));
        assert!(note.body.contains("42.5 €"));
        assert!(note.body.contains("Minimal Wear"));

        let payload = webhook_payload(&note);
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "New SkinBaron offer");
        assert_eq!(embed["image"]["url"], "https://cdn.skinbaron.de/x.png");
        assert_eq!(embed["fields"][0]["value"], "Crown (Foil), Howling Dawn");
    }

    #[test]
    fn payload_omits_absent_image_and_stickers() {
        let spec = FilterSpec {
            url: "https://example/listing".into(),
            min_price: 1.0,
            max_price: 2.0,
            name: "n".into(),
            paused: false,
            channel: None,
        };
        let note = disabled_notification(None, &spec);
        let payload = webhook_payload(&note);
        let embed = &payload["embeds"][0];
        assert!(embed.get("image").is_none());
        assert!(embed.get("fields").is_none());
        assert!(note.body.contains("3 consecutive errors"));
    }
}
