pub mod link;
pub mod panel;

pub use link::Connection;
pub use panel::Panel;
