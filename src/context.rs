use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Format of `eventTime` / `creationDate` on every event.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Format of `requestExecutionDate` / `settlementDate`.
pub const EVENT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Trait for providing the current time.
/// Decouples event stamping from `Local::now()` so tests can pin dates.
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wall-clock time in the local zone, which is what the event API expects.
    fn local_now(&self) -> NaiveDateTime {
        self.now().with_timezone(&Local).naive_local()
    }
}

/// Trait for generating unique identifiers (transaction ids, event ids).
pub trait IdProvider: Send + Sync {
    fn new_id(&self) -> String;
}

/// Context holding the providers.
/// Passed down to the builder, the scenario loader and the dispatcher.
#[derive(Clone)]
pub struct RunContext {
    pub time: Arc<dyn TimeProvider>,
    pub id: Arc<dyn IdProvider>,
}

impl RunContext {
    pub fn new_system() -> Self {
        Self {
            time: Arc::new(SystemTimeProvider),
            id: Arc::new(RandomIdProvider),
        }
    }

    pub fn new_simulated(start_time_ms: i64) -> Self {
        Self {
            time: Arc::new(SimulatedTimeProvider::new(start_time_ms)),
            id: Arc::new(DeterministicIdProvider::new()),
        }
    }

    /// `eventTime` stamp for the current instant.
    pub fn event_time(&self) -> String {
        self.time.local_now().format(EVENT_TIME_FORMAT).to_string()
    }

    /// Execution / settlement date for the current instant.
    pub fn event_date(&self) -> String {
        self.time.local_now().format(EVENT_DATE_FORMAT).to_string()
    }
}

// --- Live Implementations ---

pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct RandomIdProvider;

impl IdProvider for RandomIdProvider {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

// --- Simulated Implementations ---

/// Fixed clock. Simulated time is interpreted as UTC for the local stamp
/// so fixtures do not depend on the machine's zone.
pub struct SimulatedTimeProvider {
    time_ms: i64,
}

impl SimulatedTimeProvider {
    pub fn new(time_ms: i64) -> Self {
        Self { time_ms }
    }
}

impl TimeProvider for SimulatedTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.time_ms)
            .single()
            .unwrap_or_default()
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now().naive_utc()
    }
}

pub struct DeterministicIdProvider {
    counter: AtomicU64,
}

impl DeterministicIdProvider {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for DeterministicIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdProvider for DeterministicIdProvider {
    fn new_id(&self) -> String {
        let num = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("00000000-0000-0000-0000-{:012x}", num)
    }
}
