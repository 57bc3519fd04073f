//! Connection pool limits.

use std::time::Duration;

use sea_orm::ConnectOptions;

/// A single pool limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOption {
    /// Maximum open connections. Values `<= 0` keep the pool default.
    MaxOpenConns(i64),
    /// Idle connections the pool keeps.
    ///
    /// sqlx pools have no idle cap, so on `ConnectOptions` this sets
    /// `min_connections`: a floor of connections opened eagerly and kept
    /// even when unused, not a ceiling. `0` keeps no warm connections and
    /// leaves idle ones to `ConnMaxIdleTime`; negative values keep the pool
    /// default.
    MaxIdleConns(i64),
    /// Maximum lifetime of a connection. Zero keeps the pool default.
    ConnMaxLifetime(Duration),
    /// Maximum time a connection may sit idle. Zero keeps the pool default.
    ConnMaxIdleTime(Duration),
}

/// Pool settings the options apply to.
pub trait PoolSettings {
    fn set_max_open(&mut self, max: u32);

    fn set_max_idle(&mut self, max: u32);

    fn set_max_lifetime(&mut self, lifetime: Duration);

    fn set_max_idle_time(&mut self, idle: Duration);
}

/// The idle limit maps onto `min_connections`; see [`PoolOption::MaxIdleConns`].
impl PoolSettings for ConnectOptions {
    fn set_max_open(&mut self, max: u32) {
        self.max_connections(max);
    }

    fn set_max_idle(&mut self, max: u32) {
        self.min_connections(max);
    }

    fn set_max_lifetime(&mut self, lifetime: Duration) {
        self.max_lifetime(lifetime);
    }

    fn set_max_idle_time(&mut self, idle: Duration) {
        self.idle_timeout(idle);
    }
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl PoolOption {
    /// Apply this option to `pool` if its value is meaningful.
    pub fn apply<P: PoolSettings + ?Sized>(&self, pool: &mut P) {
        match *self {
            PoolOption::MaxOpenConns(max) if max > 0 => pool.set_max_open(clamp_u32(max)),
            PoolOption::MaxIdleConns(max) if max >= 0 => pool.set_max_idle(clamp_u32(max)),
            PoolOption::ConnMaxLifetime(lifetime) if !lifetime.is_zero() => {
                pool.set_max_lifetime(lifetime)
            }
            PoolOption::ConnMaxIdleTime(idle) if !idle.is_zero() => pool.set_max_idle_time(idle),
            _ => {}
        }
    }
}

/// Apply every option in order.
pub fn apply_pool_options<P: PoolSettings + ?Sized>(pool: &mut P, options: &[PoolOption]) {
    for option in options {
        option.apply(pool);
    }
}

/// Named pool presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolProfile {
    /// Conservative limits for typical services.
    #[default]
    Default,
    /// Larger pools with shorter refresh intervals.
    HighConcurrency,
}

impl PoolProfile {
    pub fn options(&self) -> [PoolOption; 4] {
        match self {
            PoolProfile::Default => [
                PoolOption::MaxOpenConns(25),
                PoolOption::MaxIdleConns(10),
                PoolOption::ConnMaxLifetime(Duration::from_secs(30 * 60)),
                PoolOption::ConnMaxIdleTime(Duration::from_secs(5 * 60)),
            ],
            PoolProfile::HighConcurrency => [
                PoolOption::MaxOpenConns(100),
                PoolOption::MaxIdleConns(50),
                PoolOption::ConnMaxLifetime(Duration::from_secs(5 * 60)),
                PoolOption::ConnMaxIdleTime(Duration::from_secs(60)),
            ],
        }
    }

    pub fn apply<P: PoolSettings + ?Sized>(&self, pool: &mut P) {
        apply_pool_options(pool, &self.options());
    }
}
