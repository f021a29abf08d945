pub mod cache;
pub mod file_source;
pub mod reconciler;
pub mod schema;
pub mod source;

#[cfg(feature = "etcd")]
pub mod etcd;
