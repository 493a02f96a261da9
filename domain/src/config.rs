use std::time::Duration;

/// Tunables of the portfolio engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single quote provider call
    pub quote_timeout: Duration,
    pub default_transaction_limit: usize,
    pub max_transaction_limit: usize,
    pub default_history_hours: i64,
    pub max_history_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quote_timeout: Duration::from_secs(10),
            default_transaction_limit: 50,
            max_transaction_limit: 1000,
            default_history_hours: 24,
            max_history_hours: 24 * 365,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_quote_timeout(mut self, quote_timeout: Duration) -> Self {
        self.quote_timeout = quote_timeout;
        self
    }

    /// Requested transaction page size, clamped to `[1, max_transaction_limit]`
    #[must_use]
    pub fn transaction_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_transaction_limit)
            .clamp(1, self.max_transaction_limit)
    }

    /// Requested trailing window in hours, clamped to `[1, max_history_hours]`
    #[must_use]
    pub fn history_window(&self, requested_hours: Option<i64>) -> chrono::Duration {
        let hours = requested_hours
            .unwrap_or(self.default_history_hours)
            .clamp(1, self.max_history_hours);
        chrono::Duration::hours(hours)
    }
}
