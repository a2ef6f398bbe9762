//! Media pipeline implementations.
//!
//! - [`webrtc_pipeline`]: the real engine (`webrtc` crate, VP8 from an IVF file).
//! - [`mock`]: a recording pipeline driven by tests.

pub mod mock;
pub mod webrtc_pipeline;

pub use mock::{MediaCall, MockBehaviour, MockPipeline};
pub use webrtc_pipeline::WebRtcPipeline;
