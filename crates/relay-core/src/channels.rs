//! Well-known channel names.

/// Chat messages from the live platform. Also the default ingress channel.
pub const CHAT_CHANNEL: &str = "chat.events";

/// Gifts sent by viewers.
pub const GIFT_CHANNEL: &str = "gift.events";

/// Relay-originated notices (connection acknowledgement). Never on the bus.
pub const SYSTEM_CHANNEL: &str = "system";

/// Channel used by ingress publishes that do not name one.
pub const DEFAULT_CHANNEL: &str = CHAT_CHANNEL;

/// The channels a relay subscribes to when nothing else is configured.
pub fn default_subscriptions() -> Vec<String> {
    vec![CHAT_CHANNEL.to_owned(), GIFT_CHANNEL.to_owned()]
}

/// Route a producer event type (`"chat"`, `"gift"`, `"pin_product"`, ...) to its bus channel.
///
/// Only gifts have a dedicated channel; everything else rides on chat.
pub fn channel_for_event_type(event_type: &str) -> &'static str {
    match event_type {
        "gift" => GIFT_CHANNEL,
        _ => CHAT_CHANNEL,
    }
}
