//! Camera frame preparation and preview annotation.

pub mod frame_prep;
pub mod preview;

pub use frame_prep::{prepare_frame, PreparedFrame, MAX_FRAME_DIMENSION};
pub use preview::render_preview;
