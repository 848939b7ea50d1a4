//! Debian packaging metadata: versions, changelogs, control paragraphs and
//! build results.
//!
//! - [`version`] - version parsing, ordering and the rebuild marker
//! - [`changelog`] - `debian/changelog` entries
//! - [`deb822`] - control-style paragraphs (`debian/control`, `.dsc`, `.changes`)
//! - [`changes`] - `.changes` build artifacts

pub mod changelog;
pub mod changes;
pub mod deb822;
pub mod version;

pub use changelog::{Changelog, ChangelogEntry};
pub use changes::ChangesArtifact;
pub use version::{RebuildMarker, Version};
