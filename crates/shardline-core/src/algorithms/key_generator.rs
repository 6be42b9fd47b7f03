//! # Key Generators
//!
//! Distributed primary keys for INSERT statements that omit them.
//!
//! `SNOWFLAKE` keys are 64-bit: 41 bits of milliseconds since 2016-11-01,
//! 10 bits of worker id and a 12-bit per-millisecond sequence. All mutable
//! state sits behind one lock, so `next()` is serialized per instance and
//! keys from one instance are strictly increasing. Two instances with
//! different worker ids can never collide.
//!
//! `UUID` keys are random v4 UUIDs rendered as 32 hex characters.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::adapters::clock::SystemClock;
use crate::config::{KeyGeneratorConfig, SnowflakeConfig};
use crate::domain::{
    invariant_worker_id, ClockRegressionPolicy, GeneratedKey, ShardingError, SqlValue,
    SEQUENCE_MASK,
};
use crate::ports::outbound::TimeSource;

/// Produces one key per call.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Next key as a SQL value.
    fn generate_key(&self) -> Result<SqlValue, ShardingError>;

    /// Generator type tag.
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_millis: u64,
    sequence: u64,
    vibration_offset: u64,
}

impl SnowflakeState {
    fn vibrate(&mut self, max_offset: u64) -> u64 {
        self.vibration_offset = if self.vibration_offset >= max_offset {
            0
        } else {
            self.vibration_offset + 1
        };
        self.vibration_offset
    }
}

/// Time-ordered 64-bit key generator.
pub struct SnowflakeKeyGenerator {
    config: SnowflakeConfig,
    clock: Arc<dyn TimeSource>,
    state: Mutex<SnowflakeState>,
}

impl fmt::Debug for SnowflakeKeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeKeyGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SnowflakeKeyGenerator {
    /// Generator reading the system clock.
    pub fn new(config: SnowflakeConfig) -> Result<Self, ShardingError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Generator reading the given clock.
    pub fn with_clock(
        config: SnowflakeConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ShardingError> {
        invariant_worker_id(config.worker_id)?;
        if u64::from(config.max_vibration_offset) > SEQUENCE_MASK {
            return Err(ShardingError::ConfigError(format!(
                "max-vibration-offset {} exceeds {SEQUENCE_MASK}",
                config.max_vibration_offset
            )));
        }
        Ok(Self {
            config,
            clock,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    /// Configured worker id.
    pub fn worker_id(&self) -> u16 {
        self.config.worker_id
    }

    /// Next key.
    pub fn next(&self) -> Result<GeneratedKey, ShardingError> {
        let mut state = self.state.lock();
        let mut now = self.clock.now_millis();
        if now < state.last_millis {
            let wait = self.tolerable_regression(state.last_millis - now)?;
            // Other callers may take the lock while this one waits.
            MutexGuard::unlocked(&mut state, || std::thread::sleep(wait));
            now = self.clock.now_millis();
            if now < state.last_millis {
                return Err(ShardingError::ClockRegression {
                    offset_ms: state.last_millis - now,
                    tolerance_ms: self.config.max_tolerate_time_difference_milliseconds,
                });
            }
        }
        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                now = self.wait_until_after(state.last_millis);
            }
        } else {
            let start = state.vibrate(u64::from(self.config.max_vibration_offset));
            state.sequence = start;
        }
        state.last_millis = now;
        Ok(GeneratedKey::compose(
            now,
            self.config.worker_id,
            state.sequence,
        ))
    }

    /// How long to wait out a backwards clock step of `offset` ms.
    fn tolerable_regression(&self, offset: u64) -> Result<Duration, ShardingError> {
        let tolerance = self.config.max_tolerate_time_difference_milliseconds;
        if offset > tolerance || self.config.clock_regression_policy == ClockRegressionPolicy::Fail
        {
            warn!(
                offset_ms = offset,
                tolerance_ms = tolerance,
                "[shardline] clock moved backwards, refusing to generate key"
            );
            return Err(ShardingError::ClockRegression {
                offset_ms: offset,
                tolerance_ms: tolerance,
            });
        }
        debug!(offset_ms = offset, "[shardline] clock moved backwards, waiting");
        Ok(Duration::from_millis(offset))
    }

    /// Spins for the rest of the current millisecond once its sequence is
    /// used up; the lock stays held.
    fn wait_until_after(&self, last: u64) -> u64 {
        loop {
            let now = self.clock.now_millis();
            if now > last {
                return now;
            }
            std::thread::yield_now();
        }
    }
}

impl KeyGenerator for SnowflakeKeyGenerator {
    fn generate_key(&self) -> Result<SqlValue, ShardingError> {
        self.next().map(SqlValue::from)
    }

    fn kind(&self) -> &'static str {
        "SNOWFLAKE"
    }
}

/// Random 32-hex-character key generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeyGenerator;

impl UuidKeyGenerator {
    /// Next key.
    pub fn next(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

impl KeyGenerator for UuidKeyGenerator {
    fn generate_key(&self) -> Result<SqlValue, ShardingError> {
        Ok(SqlValue::Text(self.next()))
    }

    fn kind(&self) -> &'static str {
        "UUID"
    }
}

/// Build a configured generator.
pub fn build_key_generator(
    config: &KeyGeneratorConfig,
    clock: Arc<dyn TimeSource>,
) -> Result<Arc<dyn KeyGenerator>, ShardingError> {
    match config {
        KeyGeneratorConfig::Snowflake(snowflake) => Ok(Arc::new(
            SnowflakeKeyGenerator::with_clock(snowflake.clone(), clock)?,
        )),
        KeyGeneratorConfig::Uuid => Ok(Arc::new(UuidKeyGenerator)),
    }
}
