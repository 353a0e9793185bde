pub mod annotate;
pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod ocr;
pub mod pipeline;
pub mod state;
pub mod upload;

pub use config::PlateServiceConfig;
pub use error::ApiError;
pub use pipeline::{ImagePipeline, PipelineOutcome};
pub use state::PlateServiceState;
pub use upload::UploadStore;
