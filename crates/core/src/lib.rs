//! The cognitive orchestration core: messaging nexus, ethical governor,
//! reflex layer, judgment engine, five-layer consciousness stack, evolution
//! engine, mission control and the request controller that drives them.
//!
//! Everything is instantiated once by [`Controller::new`] and passed by
//! explicit reference — no hidden globals.

pub mod benchmark;
pub mod checkpoint;
mod commands;
pub mod controller;
pub mod cortex;
pub mod debounce;
pub mod ensemble;
pub mod error;
pub mod events;
pub mod evolution;
pub mod governor;
pub mod judgment;
pub mod mission;
pub mod nexus;
pub mod reflector;
pub mod reflex;
pub mod repair;
pub mod schema;
pub mod scorecard;
pub mod signals;
pub mod world;

pub use controller::{Controller, MAX_REACT_STEPS};
pub use cortex::{ConsciousnessStack, CortexContext, ReflexCandidate};
pub use error::CognitionError;
pub use events::{CoreEvent, OnEvent};
pub use evolution::{EvolutionEngine, Mutation, MutationKind, MutationStatus};
pub use governor::EthicalGovernor;
pub use judgment::{JudgmentEngine, JudgmentOutcome, JudgmentResult};
pub use mission::{Mission, MissionControl, MissionKind, MissionStatus};
pub use nexus::{
    MessagingNexus, ReplyCallback, PRIORITY_PROACTIVE, PRIORITY_STANDARD, PRIORITY_URGENT,
};
pub use reflector::Reflector;
pub use reflex::ReflexLayer;
pub use schema::{
    ActionCall, ActionRecord, AgentResponse, Budget, IntentKind, LiteResponse, Sentiment,
    TaskClass, ThoughtObject,
};
pub use signals::{CognitiveSignals, Signal};
pub use world::WorldModel;
