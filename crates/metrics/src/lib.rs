//! Metrics facade for gatekeeper.
//!
//! Crates record through the `metrics` macros re-exported here, using the names
//! in [`definitions`]. Nothing is exported until the binary installs a
//! recorder, so the calls are free when no exporter is configured.
//!
//! ```rust,ignore
//! use gatekeeper_metrics::{counter, correlation};
//!
//! counter!(correlation::OUTCOMES_TOTAL, "outcome" => "matched").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {definitions::*, recorder::init_metrics};

pub use metrics::{counter, gauge, histogram};
