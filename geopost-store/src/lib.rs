//! Clients for the two external systems a post lives in: the blob store
//! holding its image and the search index holding its document.

pub mod blob;
pub mod elastic;
pub mod memory;
pub mod s3;
pub mod search;
