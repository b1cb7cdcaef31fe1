pub mod error;
pub mod notify;
pub mod scheduling;

pub use error::SchedulingError;
pub use notify::{NotificationDispatcher, NotificationMode, ReplyAction};
pub use scheduling::*;
