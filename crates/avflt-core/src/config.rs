//! Administrative configuration, following the same builder pattern used
//! for mount configuration elsewhere in this codebase.

/// Administrative controls the broker is constructed with. All of these are
/// also mutable at runtime through [`crate::context::BrokerContext`]; this
/// struct only provides convenient, validated defaults.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Global cache enable switch (`avflt_cache_enabled`).
    pub cache_enabled: bool,
    /// Reply deadline in milliseconds; 0 means wait indefinitely.
    pub reply_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            reply_timeout_ms: 0,
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    #[must_use]
    pub fn reply_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.reply_timeout_ms = timeout_ms;
        self
    }
}
