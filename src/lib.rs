//! Build Debian source packages for several distributions and architectures,
//! each step inside a throwaway container.
//!
//! - **Sandbox sessions** - create/start/exec/kill/rm through a container runtime
//! - **Source packages** - build from a tree, copy, retarget with a rebuild suffix
//! - **Stages** - build, sign, lint, test and upload one target
//! - **Matrix** - route distributions to images and upload queues, run targets
//! - **Preflight checks** - host tool validation before anything runs
//!
//! # Architecture
//!
//! ```text
//! debpkg-builder (binary)
//!     │
//!     ├── matrix::plan ──> [BuildTarget]
//!     │
//!     └── matrix::Driver
//!             │  per distribution: work dir, copy_descriptor, retarget
//!             │
//!             └── stages::Pipeline
//!                     │  build -> sign -> lint -> test -> upload
//!                     │
//!                     └── sandbox::SandboxSession ──> ContainerRuntime (docker)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use debpkg_builder::config::Config;
//! use debpkg_builder::matrix::{plan, PlanRequest};
//!
//! let config = Config::load(None)?;
//! for target in plan(&PlanRequest::default(), &config.images)? {
//!     println!("{} {} on {}", target.distribution, target.arch, target.image);
//! }
//! ```

pub mod config;
pub mod debian;
pub mod error;
pub mod matrix;
pub mod preflight;
pub mod process;
pub mod sandbox;
pub mod source;
pub mod stages;

pub use config::Config;
pub use error::PipelineError;
pub use matrix::{plan, BuildTarget, Driver, PlanRequest};
pub use sandbox::{ContainerRuntime, DockerRuntime, SandboxSession};
pub use source::SourcePackage;
