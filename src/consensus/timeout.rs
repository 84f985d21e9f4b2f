use std::time::Duration;

/// Abstracts wall-clock time so the round state machine can be driven
/// by a virtual clock in tests instead of real timers. Mirrors how
/// the validator schedule used to synchronize against `chrono::Utc`,
/// except the state machine never reads the clock directly: it only
/// asks for a timeout duration and is later told that duration elapsed.
pub trait Clock: Send + Sync {
  fn now(&self) -> std::time::Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> std::time::Instant {
    std::time::Instant::now()
  }
}

/// A clock a test can advance deterministically.
#[cfg(any(test, feature = "test-util"))]
pub struct VirtualClock {
  now: std::sync::Mutex<std::time::Instant>,
}

#[cfg(any(test, feature = "test-util"))]
impl VirtualClock {
  pub fn new() -> Self {
    Self { now: std::sync::Mutex::new(std::time::Instant::now()) }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap();
    *now += by;
  }
}

#[cfg(any(test, feature = "test-util"))]
impl Default for VirtualClock {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for VirtualClock {
  fn now(&self) -> std::time::Instant {
    *self.now.lock().unwrap()
  }
}

/// Computes the timeout for round `round`, given a base duration and
/// the engine's configured backoff factor: `base * factor^round`,
/// capped so a stuck round can't make the node wait forever.
pub fn round_timeout(base: Duration, round: u32, cap: Duration) -> Duration {
  let factor = 1.2f64;
  let scaled = base.as_secs_f64() * factor.powi(round as i32);
  Duration::from_secs_f64(scaled.min(cap.as_secs_f64()))
}

/// Per-step base durations a round's timeouts back off from. Propose
/// gets more slack than prevote/precommit since it also covers block
/// assembly and propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimeouts {
  pub propose: Duration,
  pub prevote: Duration,
  pub precommit: Duration,
}

impl Default for StepTimeouts {
  fn default() -> Self {
    Self {
      propose: Duration::from_millis(3000),
      prevote: Duration::from_millis(1000),
      precommit: Duration::from_millis(1000),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn timeout_grows_with_round_and_is_capped() {
    let base = Duration::from_secs(1);
    let cap = Duration::from_secs(10);
    let t0 = round_timeout(base, 0, cap);
    let t1 = round_timeout(base, 1, cap);
    let t10 = round_timeout(base, 10, cap);
    assert!(t1 > t0);
    assert_eq!(t10, cap);
  }
}
