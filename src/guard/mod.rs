//! Content guard: secondary vision check for disallowed image content.
//!
//! The guard asks a vision-capable model whether a generated image contains
//! an animal the user never asked for. It deliberately fails open: an
//! unavailable or confused validator must never block a user, so every
//! infrastructure problem maps to `Undetermined`.

pub mod client;
pub mod mock;

pub use client::VisionGuardClient;
pub use mock::MockContentGuard;

use async_trait::async_trait;

/// Tri-state validation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// A disallowed animal subject is present.
    Present,
    /// No disallowed content found.
    Absent,
    /// The validator could not answer; treated as a pass.
    Undetermined,
}

#[async_trait]
pub trait ContentGuard: Send + Sync {
    /// Inspect raw image bytes. The signature carries no error path:
    /// validation failures map to `Undetermined` inside the implementation.
    async fn check(&self, image_bytes: &[u8]) -> GuardVerdict;
}
