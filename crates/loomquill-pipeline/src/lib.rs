//! Generation Pipeline, Librarian Scheduler, and Active-Agent Registry
//! (spec §4.H-J): the orchestration layer tying the lower crates together
//! into one generation request's lifecycle.

pub mod active_agents;
pub mod generation;
pub mod librarian;

pub use active_agents::ActiveAgentRegistry;
pub use generation::{GenerateRequest, GenerationPipeline};
pub use librarian::{LibrarianScheduler, LibrarianStatus};
