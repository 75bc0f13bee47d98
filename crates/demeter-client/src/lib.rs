pub mod config;
pub mod fetcher;
pub mod notify;
pub mod s3;

pub use config::{DataStore, StorageConfig};
pub use fetcher::ReqwestFetcher;
pub use notify::{HttpWaker, OperatorNotifier, PlatformWaker, WebhookNotifier};
pub use s3::S3ObjectStore;
