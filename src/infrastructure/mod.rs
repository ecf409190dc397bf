//! Adapters for the outside world: persistence (SQLite + Redis) and
//! observability (Prometheus + structured JSON). Everything here implements
//! a port declared in `domain::ports` or `application::*::store`; nothing
//! in `application` depends on this module directly.

pub mod notifier;
pub mod observability;
pub mod paper_gateway;
pub mod persistence;
