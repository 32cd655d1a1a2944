//! Agent Registry & Runner, and the Event-Stream Adapter that drives the
//! writer/analyzer agents and emits NDJSON-shaped events.

pub mod definition;
pub mod runtime;
pub mod stream_adapter;

pub use definition::{AgentDefinition, AgentRegistry};
pub use runtime::{invoke_agent, InvocationContext, InvokeOptions, InvokeResult};
pub use stream_adapter::{run_agent_stream, RunCompletion, RunInput};
