//! Per-source circuit breaker.
//!
//! A source whose fetches keep failing even after retries gets cut off for a
//! cooldown period instead of being hammered on every lookup. The circuit
//! has three states:
//!
//! - **Closed**: normal operation, fetches are admitted.
//! - **Open**: the source keeps failing, fetches are skipped.
//! - **Probing**: cooldown elapsed, limited traffic admitted to test recovery.
//!
//! State is in-memory and resets on restart. One breaker instance tracks all
//! sources of a client; each source's circuit is independent.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::models::SourceId;

/// Consecutive exhausted failures before a circuit opens.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit blocks traffic before probing.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Probe successes needed to close a circuit again.
const DEFAULT_PROBE_SUCCESSES: u32 = 1;

/// Circuit state for one source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreakerState {
    /// Normal operation - fetches are admitted.
    Closed,
    /// The source keeps failing - fetches are skipped.
    Open,
    /// Testing recovery - fetches are admitted, watched closely.
    Probing,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::Probing => write!(f, "probing"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to block traffic before probing for recovery.
    pub cooldown: Duration,
    /// Probe successes needed to close the circuit again.
    pub probe_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            probe_successes: DEFAULT_PROBE_SUCCESSES,
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            opened_at: None,
        }
    }
}

/// Metrics snapshot for one source's circuit.
#[derive(Clone, Debug)]
pub struct BreakerMetrics {
    /// Source identifier.
    pub source: String,
    /// Current circuit state.
    pub state: BreakerState,
    /// Consecutive failures recorded.
    pub consecutive_failures: u32,
}

/// Per-source circuit breaker shared by all callers of one source client.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the circuit map, recovering from poison if necessary.
    ///
    /// Slightly wrong circuit state is better than panicking.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether a fetch for this source is currently admitted.
    ///
    /// An open circuit whose cooldown has elapsed transitions to probing and
    /// admits the caller.
    pub fn is_allowed(&self, source: &SourceId) -> bool {
        let (allowed, started_probing) = {
            let mut circuits = self.lock_circuits();
            let circuit = circuits
                .entry(source.to_string())
                .or_insert_with(Circuit::new);

            match circuit.state {
                BreakerState::Closed | BreakerState::Probing => (true, false),
                BreakerState::Open => {
                    let cooled_down = circuit
                        .opened_at
                        .map(|at| at.elapsed() >= self.config.cooldown)
                        .unwrap_or(true);
                    if cooled_down {
                        circuit.state = BreakerState::Probing;
                        circuit.probe_successes = 0;
                        (true, true)
                    } else {
                        (false, false)
                    }
                }
            }
        };

        if started_probing {
            info!("Circuit breaker: '{}' cooled down, probing", source);
        }
        allowed
    }

    /// Record a successful fetch for a source.
    pub fn record_success(&self, source: &SourceId) {
        let closed = {
            let mut circuits = self.lock_circuits();
            let circuit = circuits
                .entry(source.to_string())
                .or_insert_with(Circuit::new);

            circuit.consecutive_failures = 0;
            match circuit.state {
                BreakerState::Closed => false,
                BreakerState::Probing => {
                    circuit.probe_successes += 1;
                    if circuit.probe_successes >= self.config.probe_successes {
                        *circuit = Circuit::new();
                        true
                    } else {
                        false
                    }
                }
                // is_allowed transitions Open to Probing before any fetch
                // runs, so a success while Open means a racing caller was
                // admitted just before the circuit opened. Treat it as noise.
                BreakerState::Open => false,
            }
        };

        if closed {
            info!("Circuit breaker: '{}' recovered, circuit closed", source);
        }
    }

    /// Record an exhausted fetch failure for a source.
    ///
    /// Failures here are post-retry: one recorded failure already represents
    /// a full backoff cycle given up on.
    pub fn record_failure(&self, source: &SourceId) {
        let opened = {
            let mut circuits = self.lock_circuits();
            let circuit = circuits
                .entry(source.to_string())
                .or_insert_with(Circuit::new);

            circuit.consecutive_failures += 1;
            match circuit.state {
                BreakerState::Closed => {
                    if circuit.consecutive_failures >= self.config.failure_threshold {
                        circuit.state = BreakerState::Open;
                        circuit.opened_at = Some(Instant::now());
                        Some(circuit.consecutive_failures)
                    } else {
                        None
                    }
                }
                BreakerState::Probing => {
                    // A failed probe reopens immediately.
                    circuit.state = BreakerState::Open;
                    circuit.opened_at = Some(Instant::now());
                    circuit.probe_successes = 0;
                    Some(circuit.consecutive_failures)
                }
                BreakerState::Open => {
                    circuit.opened_at = Some(Instant::now());
                    None
                }
            }
        };

        match opened {
            Some(failures) => info!(
                "Circuit breaker: '{}' opened after {} consecutive failures",
                source, failures
            ),
            None => debug!("Circuit breaker: failure recorded for '{}'", source),
        }
    }

    /// Current state for a source.
    pub fn state(&self, source: &SourceId) -> BreakerState {
        self.lock_circuits()
            .get(source.as_ref())
            .map(|c| c.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Metrics for every tracked source.
    pub fn metrics(&self) -> Vec<BreakerMetrics> {
        self.lock_circuits()
            .iter()
            .map(|(source, circuit)| BreakerMetrics {
                source: source.clone(),
                state: circuit.state,
                consecutive_failures: circuit.consecutive_failures,
            })
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
