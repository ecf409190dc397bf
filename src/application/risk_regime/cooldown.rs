//! Per-symbol and per-account cooldown tracking (spec.md §4.5 "Cooldowns").
//!
//! Deliberately in-process and per-task, like the other local caches in
//! §5's resource model — a missed cooldown after a process restart is
//! conservative (it just allows one extra signal), not unsafe.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::types::SignalSide;

#[derive(Default)]
pub struct CooldownTracker {
    /// last signal time per (symbol, side)
    per_symbol_side: Mutex<HashMap<(String, SignalSide), DateTime<Utc>>>,
    last_rotation: Mutex<Option<DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a signal of `side` just fired for `symbol`.
    pub fn record_signal(&self, symbol: &str, side: SignalSide) {
        self.per_symbol_side
            .lock()
            .expect("cooldown tracker mutex poisoned")
            .insert((symbol.to_string(), side), Utc::now());
    }

    /// True if a signal of `side` for `symbol` fired within `window`.
    pub fn is_cooling_down(&self, symbol: &str, side: SignalSide, window: Duration) -> bool {
        let guard = self.per_symbol_side.lock().expect("cooldown tracker mutex poisoned");
        match guard.get(&(symbol.to_string(), side)) {
            Some(last) => Utc::now() - *last < window,
            None => false,
        }
    }

    pub fn record_rotation(&self) {
        *self.last_rotation.lock().expect("cooldown tracker mutex poisoned") = Some(Utc::now());
    }

    pub fn rotation_cooling_down(&self, window: Duration) -> bool {
        match *self.last_rotation.lock().expect("cooldown tracker mutex poisoned") {
            Some(last) => Utc::now() - last < window,
            None => false,
        }
    }
}
