pub mod recording;
pub mod sample;

pub use recording::read_jsonl;
pub use sample::{Landmark, LandmarkId, LandmarkSample};
