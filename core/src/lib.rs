//! Process-control core of the shellbridge daemon: the session registry,
//! the execution engine with its per-stream output pumps, and the
//! platform-conditional process killer.

mod error;
mod exec;
mod kill;
mod session;

pub use error::ExecError;
pub use exec::execute;
pub use kill::destroy_session;
pub use kill::kill_all;
pub use kill::kill_session;
pub use session::DEFAULT_SESSION_ID;
pub use session::ProcessHandle;
pub use session::SessionRegistry;
pub use session::TerminalSession;
