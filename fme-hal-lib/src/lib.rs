pub mod command;
pub mod port;
pub mod protocol;

pub use command::{catalog::Command, CommandSpec, Executor, RetryPolicy, SpecError};
pub use port::{Port, PortConfig};
pub use protocol::{AddressSelector, ErrorKind, Response, Transport};
