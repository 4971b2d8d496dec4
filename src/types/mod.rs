// ABOUTME: Domain newtypes shared across the crate.
// ABOUTME: Image references, content digests and platform filters.

mod digest;
mod image_ref;
mod platform;

pub use digest::{Digest, ParseDigestError};
pub use image_ref::{DEFAULT_PROJECT, DEFAULT_REGISTRY, ImageRef, ParseRefError};
pub use platform::PlatformSet;
