pub mod action;
pub mod controller;
pub mod outcome;
pub mod platform;
pub mod poll;

pub use action::Action;
pub use controller::{MsdController, Strategy};
pub use outcome::{reply, Outcome, ResultSink, REPLY_VALUE};
pub use platform::platform_locator;
pub use poll::{poll_until, PollPolicy, MOUNT_WAIT_TIME};
