//! # Tagwatch Core
//!
//! Value types and the pure version-resolution engine for Tagwatch.
//!
//! This crate knows nothing about registries or networks: given a list of
//! tags and a per-image policy, it picks the newest allowed candidate. The
//! registry crate feeds it tag lists and manifest metadata.
//!
//! ## Quick Start
//!
//! ```rust
//! use tagwatch_core::{ImageTag, ImageTagList, UpdateStrategy, VersionConstraint};
//!
//! let tags = ImageTagList::new();
//! tags.add(ImageTag::new("1.0.0"));
//! tags.add(ImageTag::new("1.2.0"));
//!
//! let constraint = VersionConstraint::new(UpdateStrategy::SemVer).with_constraint("^1.0");
//! let newest = constraint.resolve("org/app", &tags)?;
//! assert_eq!(newest.unwrap().name, "1.2.0");
//! # Ok::<(), tagwatch_core::CoreError>(())
//! ```

mod calver;
mod error;
mod image;
mod options;
mod policy;
mod strategy;
mod tag;
mod version;


pub use calver::CalverLayout;
pub use error::CoreError;
pub use image::ContainerImage;
pub use options::{ManifestOptions, Platform};
pub use policy::ImagePolicy;
pub use strategy::{TagMatch, UpdateStrategy, VersionConstraint};
pub use tag::{ImageTag, ImageTagList};
pub use version::{SemVersion, VersionRange};
