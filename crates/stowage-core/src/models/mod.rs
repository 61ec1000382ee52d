pub mod upload;

pub use upload::{ByteStream, StoredUpload, UploadRequest, UploadResult};
