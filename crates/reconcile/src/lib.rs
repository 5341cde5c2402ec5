//! Session-id correlation and the verification state machine.
//!
//! The [`Pipeline`] consumes tailed lines, the [`Correlator`] decides which
//! player record a session id belongs to, and the [`StateMachine`] runs the
//! one-time completion sinks when a record becomes complete.

pub mod connections;
pub mod correlator;
pub mod effects;
pub mod error;
pub mod lifecycle;
pub mod locks;
pub mod service;

use std::sync::Arc;

use {gatekeeper_config::GatekeeperConfig, gatekeeper_registry::PlayerRegistry};

pub use {
    connections::ConnectionTracker,
    correlator::{
        AbstentionEvent, AbstentionHandler, CorrelationOutcome, Correlator, CorrelatorSettings,
        SessionObservation,
    },
    effects::{
        AccessListSink, CompletionEvent, CompletionSink, HttpSink, LogSink, sinks_from_config,
    },
    error::{Error, Result},
    lifecycle::{Evaluation, StateMachine, VerificationState, derive_state},
    locks::KeyedLocks,
    service::Pipeline,
};

/// Wire the state machine, correlator and pipeline from configuration.
pub fn build_pipeline(
    config: &GatekeeperConfig,
    registry: Arc<dyn PlayerRegistry>,
) -> Result<Pipeline> {
    let sinks = sinks_from_config(&config.completion)?;
    let machine = Arc::new(StateMachine::new(Arc::clone(&registry), sinks));
    let correlator = Correlator::new(
        registry,
        machine,
        CorrelatorSettings::from(&config.correlation),
    );
    Ok(Pipeline::new(Arc::new(correlator), &config.connections))
}
