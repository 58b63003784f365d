//! Broker topology configuration.

use lapin::ExchangeKind;

/// Names for the exchange/queue/binding used by the top-up flow, plus an
/// optional dead-letter exchange for poison messages.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    pub exchange: String,
    pub exchange_kind: String,
    pub queue: String,
    pub routing_key: String,
    pub dead_letter_exchange: Option<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            exchange: "topup.exchange".to_string(),
            exchange_kind: "direct".to_string(),
            queue: "topup_queue".to_string(),
            routing_key: "topup.created".to_string(),
            dead_letter_exchange: None,
        }
    }
}

impl TopologyConfig {
    pub(crate) fn kind(&self) -> ExchangeKind {
        match self.exchange_kind.as_str() {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            other => ExchangeKind::Custom(other.to_string()),
        }
    }
}
