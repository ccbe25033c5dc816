//! Object storage backends for objshard.
//!
//! This crate defines the capability set every storage backend exposes and
//! the lazy listing stream that the sharding layer merges.
//!
//! # Object Model
//!
//! - [`ObjectInfo`] -- listing-time snapshot of one object (key, size, mtime)
//! - [`MultipartUpload`] / [`Part`] -- multipart upload handles
//! - [`Limits`] -- capability limits advertised by a backend
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`FileObjectStore`] -- local directory tree
//!
//! [`create_storage`] builds a backend from a kind name and an endpoint.
//!
//! # Design Rules
//!
//! 1. Listings are strictly ordered by key; `marker` means "after this key".
//! 2. Missing capabilities are reported as [`StoreError::NotSupported`].
//! 3. Deleting a missing key is not an error.
//! 4. A listing stream ends either cleanly or with exactly one error item.

pub mod error;
pub mod file;
pub mod memory;
pub mod object;
pub mod registry;
pub mod stream;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use file::FileObjectStore;
pub use memory::InMemoryObjectStore;
pub use object::{etag, Limits, MultipartUpload, ObjectInfo, Part};
pub use registry::{create_storage, Credentials, SUPPORTED_KINDS};
pub use stream::{ListItem, ObjectSender, ObjectStream};
pub use traits::ObjectStore;
