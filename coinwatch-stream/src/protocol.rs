//! Wire types for the upstream streaming protocol.
//!
//! Outbound messages are JSON objects tagged by `action`; inbound records are
//! flat JSON objects tagged by `TYPE` ("5" = trade/price update, "500" =
//! control/error responses).

use serde::{Deserialize, Serialize};

/// Inbound message class for trade/price updates.
pub const TYPE_TICK: &str = "5";

/// Inbound message class for control/error responses.
pub const TYPE_ERROR: &str = "500";

/// Control message text signalling a rejected API key.
pub const MSG_INVALID_API_KEY: &str = "INVALID_API_KEY";

/// Control message text signalling a rejected subscription.
pub const MSG_INVALID_SUB: &str = "INVALID_SUB";

/// Channel prefix identifying the (interval, exchange-aggregate) tuple for
/// aggregated trade updates.
const CHANNEL_PREFIX: &str = "5~CCCAGG";

/// Subscription channel key: `5~CCCAGG~{BASE}~{QUOTE}`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Build the channel key for a base symbol against a quote currency.
    pub fn new(base: &str, quote: &str) -> Self {
        Self(format!("{CHANNEL_PREFIX}~{base}~{quote}"))
    }

    /// The base symbol encoded in this key, if well-formed.
    pub fn base(&self) -> Option<&str> {
        self.0.split('~').nth(2)
    }
}

impl AsRef<str> for ChannelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChannelKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    AuthenticationRequest {
        #[serde(rename = "apiKey")]
        api_key: String,
    },
    SubAdd {
        subs: Vec<ChannelKey>,
    },
    Heartbeat,
}

impl ClientMessage {
    /// Serialize to the JSON text frame sent over the socket.
    pub fn to_text(&self) -> String {
        // Serialization of these variants cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Raw inbound record. Fields absent on a given message deserialize to `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "TYPE")]
    pub message_type: Option<String>,
    #[serde(rename = "MESSAGE")]
    pub message: Option<String>,
    #[serde(rename = "PARAMETER")]
    pub parameter: Option<String>,
    #[serde(rename = "SUB")]
    pub sub: Option<String>,
    #[serde(rename = "FROMSYMBOL")]
    pub from_symbol: Option<String>,
    #[serde(rename = "PRICE")]
    pub price: Option<f64>,
    #[serde(rename = "VOLUME24HOUR")]
    pub volume_24h: Option<f64>,
    #[serde(rename = "CHANGEPCT24HOUR")]
    pub change_pct_24h: Option<f64>,
    #[serde(rename = "CHANGEPCTHOUR")]
    pub change_pct_1h: Option<f64>,
    #[serde(rename = "HIGH24HOUR")]
    pub high_24h: Option<f64>,
}

/// A price update extracted from a tick record.
#[derive(Debug, Clone, PartialEq)]
pub struct TickUpdate {
    pub symbol: String,
    pub price: f64,
    pub volume_24h: Option<f64>,
    pub change_pct_24h: Option<f64>,
    pub change_pct_1h: Option<f64>,
    pub high_24h: Option<f64>,
}

/// Classified inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Trade/price update for a monitored pair.
    Tick(TickUpdate),
    /// The API key was rejected; the connection attempt must be abandoned.
    AuthRejected,
    /// A single subscription was rejected and must be dropped from the
    /// active set. Carries the offending channel key when reported.
    InvalidSub(Option<ChannelKey>),
    /// Anything else (welcome banners, unknown classes, ticks without a
    /// symbol or price). Ignored.
    Other,
}

impl RawMessage {
    /// Classify this record into a [`ServerEvent`].
    pub fn classify(self) -> ServerEvent {
        let message_type = self.message_type.as_deref();

        if message_type == Some(TYPE_ERROR) && self.message.as_deref() == Some(MSG_INVALID_API_KEY)
        {
            return ServerEvent::AuthRejected;
        }

        if message_type == Some(TYPE_TICK) {
            // Ticks without a symbol or price carry nothing to apply.
            return match (self.from_symbol, self.price) {
                (Some(symbol), Some(price)) => ServerEvent::Tick(TickUpdate {
                    symbol,
                    price,
                    volume_24h: self.volume_24h,
                    change_pct_24h: self.change_pct_24h,
                    change_pct_1h: self.change_pct_1h,
                    high_24h: self.high_24h,
                }),
                _ => ServerEvent::Other,
            };
        }

        if message_type == Some(TYPE_ERROR) || self.message.as_deref() == Some(MSG_INVALID_SUB) {
            let channel = self.parameter.or(self.sub).map(ChannelKey::from);
            return ServerEvent::InvalidSub(channel);
        }

        ServerEvent::Other
    }
}

/// Parse and classify one inbound text frame. Unparseable frames are ignored.
pub fn parse_frame(text: &str) -> ServerEvent {
    match serde_json::from_str::<RawMessage>(text) {
        Ok(raw) => raw.classify(),
        Err(error) => {
            tracing::debug!(%error, "failed to parse inbound frame");
            ServerEvent::Other
        }
    }
}
