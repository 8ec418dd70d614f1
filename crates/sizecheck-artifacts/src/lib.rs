//! Remote test inputs: the artifact catalog and the fetch-and-extract pipeline.

pub mod catalog;
pub mod fetch;
pub mod release;
pub mod test_type;

pub use catalog::{ArtifactKind, ArtifactRecord, CatalogError, Target};
pub use fetch::{ArtifactFetcher, FetchError, FetcherConfig};
pub use release::{ReleaseAsset, ReleaseIndex};
pub use test_type::{TestType, TestTypeMask};
