use embassy_time::Duration;

/// Default size of the circular receive region
pub const DEFAULT_RX_SIZE: usize = 256;

/// Default transmit ring size: two maximum-size link frames with framing overhead
pub const DEFAULT_TX_SIZE: usize = (270 + 16) * 2;

/// Default number of simultaneously scheduled events per channel
pub const DEFAULT_EVENT_COUNT: usize = 8;

/// Channel configuration
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Longest time the worker sleeps without a notification or a due event.
    /// Scheduled events fire within one ceiling of their due time even without I/O activity.
    pub service_ceiling: Duration,
    /// Smallest non-wrapping run the worker starts while servicing notifications.
    /// Smaller runs wait for scheduled events to append more data. `None` selects a quarter
    /// of the transmit ring.
    pub tx_min_chunk: Option<usize>,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            service_ceiling: Duration::from_millis(500),
            tx_min_chunk: None,
        }
    }

    pub(crate) const fn min_chunk(&self, tx_capacity: usize) -> usize {
        match self.tx_min_chunk {
            Some(value) => value,
            None => tx_capacity / 4,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_chunk() {
        let mut config = Config::default();
        assert_eq!(config.min_chunk(DEFAULT_TX_SIZE), 143);
        config.tx_min_chunk = Some(0);
        assert_eq!(config.min_chunk(DEFAULT_TX_SIZE), 0);
    }
}
