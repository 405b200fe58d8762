pub mod buffer;
pub mod config;
pub mod error;
pub mod filter;
pub mod landmark;
pub mod logging;
pub mod pipeline;
pub mod retarget;
pub mod rig;

pub use buffer::{LandmarkBuffer, LandmarkProducer, PushOutcome};
pub use config::Config;
pub use error::RigError;
pub use landmark::{Landmark, LandmarkId, LandmarkSample};
pub use pipeline::{Pipeline, PipelineState, TickReport};
pub use rig::{BoneId, Rig};
