use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Block geometry and tunables for the redo-log-buffer subsystem.
///
/// Mirrors the shape of the buffer-pool `*Config` structs elsewhere in this
/// crate: one flat struct with a `Default` matching production defaults,
/// loadable from a config file via `serde`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedoConfig {
    /// Bytes per log block, including header and trailer.
    pub block_size: usize,
    /// Bytes of block header.
    pub block_header_size: usize,
    /// Bytes of block trailer.
    pub block_trailer_size: usize,

    /// Initial size in bytes of the shared redo ring buffer.
    pub buf_size: usize,

    /// Capacity of the `recent_written` link buffer, in lsn units.
    pub recent_written_size: usize,
    /// Capacity of the `recent_closed` link buffer, in lsn units.
    pub recent_closed_size: usize,

    /// Maximum number of bytes the writer thread copies to the file layer
    /// in one pass before re-checking for more work.
    pub write_max_size: usize,

    /// Base delay between spin-wait rounds before falling back to a sleep.
    pub spin_delay: Duration,
    /// Number of spin rounds attempted before sleeping.
    pub spin_rounds: u32,

    /// Number of shards in the no-log-mtr counter used by the logging
    /// enable/disable state machine.
    pub no_log_shard_count: usize,

    /// How long `enable()` waits for the no-log shard counters to drain
    /// before reporting `DrainTimeout`.
    pub enable_drain_timeout: Duration,
}

impl RedoConfig {
    /// Payload bytes carried per block: `block_size - header - trailer`.
    pub fn payload_per_block(&self) -> usize {
        self.block_size - self.block_header_size - self.block_trailer_size
    }
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            block_header_size: 12,
            block_trailer_size: 4,
            buf_size: 8 * 1024 * 1024,
            recent_written_size: 1024,
            recent_closed_size: 1024,
            write_max_size: 4 * 1024 * 1024,
            spin_delay: Duration::from_micros(20),
            spin_rounds: 32,
            no_log_shard_count: 128,
            enable_drain_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_is_consistent() {
        let cfg = RedoConfig::default();
        assert_eq!(cfg.payload_per_block(), 496);
        assert!(cfg.payload_per_block() < cfg.block_size);
    }
}
