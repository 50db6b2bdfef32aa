//! Agent module: the dispatch loop and per-session workers.

pub mod agent_loop;
pub mod session_manager;

pub use agent_loop::Agent;
pub use session_manager::SessionManager;
