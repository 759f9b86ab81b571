pub mod coercion;
pub mod diagnostics;
pub mod orchestrator;
pub mod prepare;
