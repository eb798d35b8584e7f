/// Stack interface and its status types
pub mod traits;

pub use traits::{AckStatus, Downlink, JoinMode, RadioStack, StackLogLevel, MAX_DOWNLINK_SIZE};
