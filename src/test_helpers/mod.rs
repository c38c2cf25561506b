// Test Helpers Module - Listener Testing Infrastructure
//
// Provides an in-memory SqlExecutor so listener lifecycles can be exercised
// without a SQL Server instance. Used by unit tests and by the integration
// suites under tests/.

pub mod scripted_executor;

pub use scripted_executor::{PollResponse, ScriptedExecutor};
