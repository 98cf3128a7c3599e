//! Channel Validation
//!
//! Pure checks applied to every channel name a downstream client asks for.
//! A channel is accepted only if it is non-empty, consists of
//! `[A-Za-z0-9_.-]` characters, and starts with one of the allow-listed
//! public topic prefixes.
//!
//! The allow-list is fixed at construction time. Deployments may extend it
//! through configuration, never through client input.

/// A channel name on the feed, e.g. `ticker.BTC-PERPETUAL.100ms`.
pub type Channel = String;

/// Public topic prefixes accepted out of the box.
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &[
    // Market data
    "ticker.",
    "incremental_ticker.",
    "book.",
    "trades.",
    "chart.trades.",
    "quote.",
    // Indices and volatility
    "deribit_price_index.",
    "deribit_price_ranking.",
    "deribit_price_statistics.",
    "deribit_volatility_index.",
    "estimated_expiration_price.",
    // Instrument state
    "instrument.state.",
    // Platform state (bare name and sub-channels)
    "platform_state",
    // Block RFQ
    "block_rfq.",
    // Options mark prices
    "markprice.options.",
];

/// Reasons a channel name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Channel name was empty.
    #[error("channel name is empty")]
    Empty,

    /// Channel name contains a character outside `[A-Za-z0-9_.-]`.
    #[error("channel {0:?} contains invalid characters")]
    InvalidSyntax(String),

    /// Channel does not start with an allow-listed prefix.
    #[error("channel {0:?} is not an allowed topic")]
    PrefixNotAllowed(String),
}

/// Syntax whitelist plus allow-listed topic prefixes.
///
/// # Example
///
/// ```rust
/// use deribit_stream_hub::domain::channel::ChannelPolicy;
///
/// let policy = ChannelPolicy::default();
/// assert!(policy.is_valid("ticker.BTC-PERPETUAL.100ms"));
/// assert!(!policy.is_valid("not a channel!"));
/// assert!(!policy.is_valid("user.orders.BTC-PERPETUAL.raw"));
/// ```
#[derive(Debug, Clone)]
pub struct ChannelPolicy {
    prefixes: Vec<String>,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_PREFIXES.iter().map(ToString::to_string))
    }
}

impl ChannelPolicy {
    /// Create a policy with exactly the given prefixes.
    #[must_use]
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        prefixes.dedup();
        Self { prefixes }
    }

    /// Create a policy with the default prefixes plus `extra`.
    #[must_use]
    pub fn with_extra_prefixes(extra: impl IntoIterator<Item = String>) -> Self {
        Self::new(
            DEFAULT_ALLOWED_PREFIXES
                .iter()
                .map(ToString::to_string)
                .chain(extra),
        )
    }

    /// Allow-listed prefixes.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Validate a channel name.
    ///
    /// # Errors
    ///
    /// Returns the first rule the name violates.
    pub fn validate(&self, channel: &str) -> Result<(), ChannelError> {
        if channel.is_empty() {
            return Err(ChannelError::Empty);
        }

        if !channel.bytes().all(is_channel_byte) {
            return Err(ChannelError::InvalidSyntax(channel.to_string()));
        }

        if !self.prefixes.iter().any(|p| channel.starts_with(p.as_str())) {
            return Err(ChannelError::PrefixNotAllowed(channel.to_string()));
        }

        Ok(())
    }

    /// Check a channel name without reporting the reason.
    #[must_use]
    pub fn is_valid(&self, channel: &str) -> bool {
        self.validate(channel).is_ok()
    }

    /// Keep the valid channels, preserving request order.
    #[must_use]
    pub fn filter_valid(&self, channels: &[String]) -> Vec<Channel> {
        channels
            .iter()
            .filter(|c| self.is_valid(c))
            .cloned()
            .collect()
    }
}

const fn is_channel_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("ticker.BTC-PERPETUAL.100ms" ; "ticker")]
    #[test_case("incremental_ticker.ETH-PERPETUAL" ; "incremental ticker")]
    #[test_case("book.BTC-PERPETUAL.none.10.100ms" ; "grouped book")]
    #[test_case("trades.BTC-PERPETUAL.raw" ; "trades")]
    #[test_case("chart.trades.BTC-PERPETUAL.1" ; "chart trades")]
    #[test_case("quote.BTC-PERPETUAL" ; "quote")]
    #[test_case("deribit_price_index.btc_usd" ; "price index")]
    #[test_case("deribit_volatility_index.btc_usd" ; "volatility index")]
    #[test_case("estimated_expiration_price.btc_usd" ; "expiration price")]
    #[test_case("instrument.state.option.BTC" ; "instrument state")]
    #[test_case("platform_state" ; "bare platform state")]
    #[test_case("platform_state.public_methods_state" ; "platform state sub channel")]
    #[test_case("block_rfq.trades.BTC" ; "block rfq")]
    #[test_case("markprice.options.btc_usd" ; "mark price")]
    fn accepts_public_channels(channel: &str) {
        assert_eq!(ChannelPolicy::default().validate(channel), Ok(()));
    }

    #[test_case("", ChannelError::Empty ; "empty")]
    #[test_case("not a channel!", ChannelError::InvalidSyntax("not a channel!".into()) ; "spaces and bang")]
    #[test_case("ticker.BTC/PERP", ChannelError::InvalidSyntax("ticker.BTC/PERP".into()) ; "slash")]
    #[test_case("ticker.BTC\u{e9}", ChannelError::InvalidSyntax("ticker.BTC\u{e9}".into()) ; "non ascii")]
    #[test_case("user.orders.any.raw", ChannelError::PrefixNotAllowed("user.orders.any.raw".into()) ; "private channel")]
    #[test_case("ticker", ChannelError::PrefixNotAllowed("ticker".into()) ; "prefix without dot")]
    #[test_case("chart.candles.x", ChannelError::PrefixNotAllowed("chart.candles.x".into()) ; "unknown chart topic")]
    fn rejects_invalid_channels(channel: &str, expected: ChannelError) {
        assert_eq!(ChannelPolicy::default().validate(channel), Err(expected));
    }

    #[test]
    fn filter_valid_preserves_order() {
        let policy = ChannelPolicy::default();
        let requested = vec![
            "not a channel!".to_string(),
            "trades.ETH-PERPETUAL.raw".to_string(),
            "ticker.BTC-PERPETUAL.100ms".to_string(),
        ];

        assert_eq!(
            policy.filter_valid(&requested),
            vec!["trades.ETH-PERPETUAL.raw", "ticker.BTC-PERPETUAL.100ms"]
        );
    }

    #[test]
    fn extra_prefixes_extend_defaults() {
        let policy = ChannelPolicy::with_extra_prefixes(vec!["perpetual.".to_string()]);

        assert!(policy.is_valid("perpetual.BTC-PERPETUAL.100ms"));
        assert!(policy.is_valid("ticker.BTC-PERPETUAL.100ms"));
        assert_eq!(policy.prefixes().len(), DEFAULT_ALLOWED_PREFIXES.len() + 1);
    }

    #[test]
    fn custom_policy_replaces_defaults() {
        let policy = ChannelPolicy::new(vec!["book.".to_string(), String::new()]);

        assert!(policy.is_valid("book.BTC-PERPETUAL.100ms"));
        assert!(!policy.is_valid("ticker.BTC-PERPETUAL.100ms"));
        assert_eq!(policy.prefixes(), ["book.".to_string()]);
    }

    #[test]
    fn syntax_is_checked_before_prefix() {
        let policy = ChannelPolicy::default();
        assert!(matches!(
            policy.validate("ticker.BTC PERPETUAL"),
            Err(ChannelError::InvalidSyntax(_))
        ));
    }
}
