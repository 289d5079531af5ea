//! Signal container: channels, epochs, metadata and processing log.
pub mod channel;
pub mod processing;
pub mod selector;
pub mod signal;

pub use channel::{ChannelInfo, ChannelType};
pub use processing::{ProcessingLog, ProcessingStep};
pub use selector::{ChannelGroup, ChannelSelector};
pub use signal::{Epoch, Signal};
