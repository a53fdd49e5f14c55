// Run lifecycle
//
// - Run: stages, run state and the pure transitions between them
// - Services: collaborators loaded once per process
// - Orchestrator: executes stages and persists every transition

pub mod orchestrator;
pub mod run;
pub mod services;

pub use orchestrator::Orchestrator;
pub use run::*;
pub use services::{Exclusive, Services};
