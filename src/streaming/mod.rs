pub mod frame_slot;
pub mod mjpeg;

pub use frame_slot::{now_millis, Frame, FrameSlot, FrameWaiter, SlotClosed};
pub use mjpeg::{capture_stream, slot_stream, CaptureSource, PartFormat, StreamStats, StreamStatsSnapshot};
