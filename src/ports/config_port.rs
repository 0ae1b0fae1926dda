//! Configuration access port trait.

/// Raw key lookup. Typed parsing happens in the caller so that a bad
/// value is reported instead of replaced by a default.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
}

pub const STRATEGY_SECTION: &str = "strategy";

/// Section holding per-ticker strategy overrides, e.g. `[strategy.nvda]`.
pub fn ticker_section(ticker: &str) -> String {
    format!("{STRATEGY_SECTION}.{}", ticker.to_lowercase())
}

/// Reads `[strategy]` keys with a ticker's override section layered on
/// top: a key present in `[strategy.<ticker>]` wins. Other sections pass
/// through untouched.
pub struct TickerOverlay<'a> {
    base: &'a dyn ConfigPort,
    section: String,
}

impl<'a> TickerOverlay<'a> {
    pub fn new(base: &'a dyn ConfigPort, ticker: &str) -> Self {
        Self {
            base,
            section: ticker_section(ticker),
        }
    }

    /// Section to read `key` from: the override when it sets the key.
    fn resolve<'s>(&'s self, section: &'s str, key: &str) -> &'s str {
        if section == STRATEGY_SECTION && self.base.get_string(&self.section, key).is_some() {
            &self.section
        } else {
            section
        }
    }

    /// Override section name, used in validation messages.
    pub fn section_for(&self, key: &str) -> &str {
        self.resolve(STRATEGY_SECTION, key)
    }
}

impl ConfigPort for TickerOverlay<'_> {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.base.get_string(self.resolve(section, key), key)
    }
}
