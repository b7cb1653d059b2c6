//! Job progress over a server-push stream.
//!
//! [`FrameDecoder`] handles chunk reassembly and `data:` framing,
//! [`ProgressEvent`] the payload shape and [`ProgressReader`] the connection
//! lifecycle.

pub mod event;
pub mod frame;
pub mod reader;

pub use event::{ProgressCounters, ProgressEvent, ProgressStep};
pub use frame::FrameDecoder;
pub use reader::{CancelReceipt, JobHandle, ProgressReader, ProgressStream};
