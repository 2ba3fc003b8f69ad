pub mod connection;
pub mod port;
pub mod proto;
pub mod util;

pub use connection::{Channel, CommandSink, Connection, Inbound, LinkEvent};
pub use port::{RecvError, SendError};
pub use proto::{Command, Frame, TelemetryEvent};
