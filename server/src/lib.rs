//! Control-channel front end of the shellbridge daemon: the request
//! dispatcher loop and the stdio wiring used by the binary.

mod dispatcher;

pub use dispatcher::run;
pub use dispatcher::run_stdio;
