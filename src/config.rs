//! Runtime configuration

use std::time::Duration;

const DEFAULT_TEARDOWN_DELAY: Duration = Duration::from_millis(0);
const DEFAULT_INTAKE_CAPACITY: usize = 64;
const DEFAULT_SNAPSHOT_CAPACITY: usize = 16;

/// Tunables for a component's broadcaster and engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentConfig {
    /// How long an execution outlives its last subscriber
    pub teardown_delay: Duration,
    /// Buffer of the merged external message intake
    pub intake_capacity: usize,
    /// Buffer between the engine and the broadcaster
    pub snapshot_capacity: usize,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            teardown_delay: DEFAULT_TEARDOWN_DELAY,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
        }
    }
}

impl ComponentConfig {
    /// Read overrides from `COMPONENT_*` environment variables, falling back
    /// to defaults for anything unset or unparseable
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            teardown_delay: parse("COMPONENT_TEARDOWN_DELAY_MS")
                .map_or(defaults.teardown_delay, Duration::from_millis),
            intake_capacity: parse("COMPONENT_INTAKE_CAPACITY")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.intake_capacity),
            snapshot_capacity: parse("COMPONENT_SNAPSHOT_CAPACITY")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.snapshot_capacity),
        }
    }

    #[must_use]
    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = delay;
        self
    }

    #[must_use]
    pub fn with_intake_capacity(mut self, capacity: usize) -> Self {
        self.intake_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_snapshot_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_capacity = capacity.max(1);
        self
    }
}
