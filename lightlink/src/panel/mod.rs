//! Panel: the state synchronization and command composition engine.

pub mod compose;
pub mod dispatch;
pub mod mirror;
pub mod ota;
pub mod session;
pub mod settings;
pub mod view;

pub use mirror::{Mirror, MirrorSet, Range, StateMirror, Toggle};
pub use session::{Confirm, Confirmation, Intent, Outcome, Panel, Step};
pub use view::{View, ViewModel};
