//! Upload service: the admission-controlled, circuit-protected write path.

mod pipeline;

pub use pipeline::UploadPipeline;
