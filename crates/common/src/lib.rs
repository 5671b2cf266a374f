pub mod crowd;
pub mod frame_extractor;
