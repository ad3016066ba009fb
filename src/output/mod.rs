//! Output side: routing synchronized frames to OMT senders

pub mod omt;
pub mod router;
pub mod sender;

pub use omt::LibOmtBackend;
pub use router::{OutputRouter, RouteOutcome, RoutedFrame};
pub use sender::{
    OmtFrameType, OmtMediaFrame, OmtQuality, SendFailure, SenderAdapter, SenderBackend,
    SenderOutlet, SenderStats,
};
