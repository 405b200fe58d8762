pub mod landmark_filter;
pub mod one_euro;

pub use landmark_filter::{FilteredLandmark, FilteredLandmarks, LandmarkFilter};
pub use one_euro::{OneEuroParams, PointFilter, ScalarFilter};
