//! Expanding a request into build targets, and running them.
//!
//! Routing is fixed per logical distribution:
//!
//! | requested          | image             | upload as         | server          | combined source | lint |
//! |--------------------|-------------------|-------------------|-----------------|-----------------|------|
//! | bullseye           | bullseye          | bullseye          | ftp-master      | yes             | no   |
//! | bullseye-security  | bullseye-security | bullseye-security | security-master | no              | no   |
//! | bookworm           | bookworm          | bookworm          | ftp-master      | yes             | no   |
//! | bookworm-security  | bookworm-security | bookworm-security | security-master | no              | no   |
//! | oldstable          | bullseye          | oldstable         | ftp-master      | no              | no   |
//! | stable             | bookworm          | stable            | ftp-master      | no              | no   |
//! | sid                | sid               | unstable          | ftp-master      | yes             | yes  |
//! | experimental       | experimental      | experimental      | ftp-master      | yes             | yes  |
//!
//! Distributions are processed in table order whatever order they were
//! requested in. `bullseye` and `bookworm` can be built but not uploaded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::{Config, ImageConfig};
use crate::debian::ChangesArtifact;
use crate::error::PipelineError;
use crate::sandbox::Sandboxes;
use crate::source::rewrite::{retarget, RetargetRequest};
use crate::source::{copy_descriptor, SourcePackage};
use crate::stages::{BuildSelection, Pipeline};

/// Architecture name of source-only targets.
pub const SOURCE_ARCH: &str = "source";

const FTP_MASTER: &str = "ftp-master";
const SECURITY_MASTER: &str = "security-master";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Distro {
    Debian,
    Linuxpenguins,
}

/// Logical distributions, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Distribution {
    Bullseye,
    BullseyeSecurity,
    Bookworm,
    BookwormSecurity,
    Oldstable,
    Stable,
    Sid,
    Experimental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Architecture {
    I386,
    Amd64,
}

impl Architecture {
    pub const DEFAULT: [Architecture; 2] = [Architecture::I386, Architecture::Amd64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::I386 => "i386",
            Architecture::Amd64 => "amd64",
        }
    }
}

/// How one logical distribution is built and uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub image_distribution: &'static str,
    pub upload_distribution: &'static str,
    pub server: &'static str,
    /// One source-only upload per distribution instead of uploading the
    /// first binary build.
    pub combined_source_upload: bool,
    pub lint: bool,
    pub upload_allowed: bool,
}

impl Distribution {
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Bullseye => "bullseye",
            Distribution::BullseyeSecurity => "bullseye-security",
            Distribution::Bookworm => "bookworm",
            Distribution::BookwormSecurity => "bookworm-security",
            Distribution::Oldstable => "oldstable",
            Distribution::Stable => "stable",
            Distribution::Sid => "sid",
            Distribution::Experimental => "experimental",
        }
    }

    pub fn route(&self) -> Route {
        let name = self.name();
        let security = name.ends_with("-security");
        let (image_distribution, upload_distribution) = match self {
            Distribution::Oldstable => ("bullseye", "oldstable"),
            Distribution::Stable => ("bookworm", "stable"),
            Distribution::Sid => ("sid", "unstable"),
            _ => (name, name),
        };
        Route {
            image_distribution,
            upload_distribution,
            server: if security { SECURITY_MASTER } else { FTP_MASTER },
            combined_source_upload: !security
                && !matches!(self, Distribution::Oldstable | Distribution::Stable),
            lint: matches!(self, Distribution::Sid | Distribution::Experimental),
            upload_allowed: !matches!(self, Distribution::Bullseye | Distribution::Bookworm),
        }
    }
}

/// One build in one sandbox image. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildTarget {
    /// Logical distribution as requested.
    pub distribution: String,
    pub image_distribution: String,
    pub upload_distribution: String,
    /// Architecture name, or `source` for the source-only target.
    pub arch: String,
    pub image: String,
    pub server: String,
    pub source: bool,
    pub arch_any: bool,
    pub arch_all: bool,
    pub lint: bool,
    pub authoritative_upload: bool,
}

impl BuildTarget {
    pub fn selection(&self) -> BuildSelection {
        BuildSelection {
            source: self.source,
            any: self.arch_any,
            all: self.arch_all,
        }
    }

    pub fn is_source_only(&self) -> bool {
        self.arch == SOURCE_ARCH
    }
}

/// What the caller asked for; empty lists take defaults.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub distros: Vec<Distro>,
    pub distributions: Vec<Distribution>,
    pub architectures: Vec<Architecture>,
    pub upload: bool,
}

/// Expand a request into targets, in build order.
pub fn plan(request: &PlanRequest, images: &ImageConfig) -> Result<Vec<BuildTarget>> {
    let mut distros: BTreeSet<Distro> = request.distros.iter().copied().collect();
    if distros.is_empty() {
        distros.insert(Distro::Debian);
    }
    if distros.contains(&Distro::Linuxpenguins) {
        tracing::warn!("distro 'linuxpenguins' has no build rules; nothing to do for it");
    }
    if !distros.contains(&Distro::Debian) {
        return Ok(Vec::new());
    }

    let mut distributions: BTreeSet<Distribution> =
        request.distributions.iter().copied().collect();
    if distributions.is_empty() {
        distributions.insert(Distribution::Sid);
    }

    let mut architectures: Vec<Architecture> = Vec::new();
    for arch in &request.architectures {
        if !architectures.contains(arch) {
            architectures.push(*arch);
        }
    }
    if architectures.is_empty() {
        architectures = Architecture::DEFAULT.to_vec();
    }

    if request.upload {
        if let Some(refused) = distributions.iter().find(|d| !d.route().upload_allowed) {
            return Err(PipelineError::DistributionRouting(format!(
                "cannot upload to {}; use {} instead",
                refused.name(),
                if *refused == Distribution::Bullseye {
                    "oldstable"
                } else {
                    "stable"
                }
            ))
            .into());
        }
    }

    let mut targets = Vec::new();
    for distribution in &distributions {
        let route = distribution.route();
        let target = |arch: &str, image: String, first: bool| BuildTarget {
            distribution: distribution.name().to_string(),
            image_distribution: route.image_distribution.to_string(),
            upload_distribution: route.upload_distribution.to_string(),
            arch: arch.to_string(),
            image,
            server: route.server.to_string(),
            source: first,
            arch_any: true,
            arch_all: first,
            lint: route.lint,
            authoritative_upload: first && !route.combined_source_upload,
        };

        for (idx, arch) in architectures.iter().enumerate() {
            targets.push(target(
                arch.as_str(),
                images.binary_image(arch.as_str(), route.image_distribution),
                idx == 0,
            ));
        }

        if route.combined_source_upload {
            targets.push(BuildTarget {
                arch: SOURCE_ARCH.to_string(),
                image: images.source_image(route.image_distribution),
                source: true,
                arch_any: false,
                arch_all: false,
                lint: false,
                authoritative_upload: true,
                ..target(SOURCE_ARCH, String::new(), false)
            });
        }
    }
    Ok(targets)
}

/// Rebuild settings shared by every distribution of a run.
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Overrides the configured suffix for every distribution.
    pub rebuild_suffix: Option<String>,
    pub bump_rebuild: bool,
    /// Produced artifacts are copied to `<dir>/<distribution>/<arch>/`.
    pub output_dir: Option<PathBuf>,
}

/// Runs planned targets, one distribution at a time.
pub struct Driver<'a, 'r> {
    config: &'a Config,
    sandboxes: &'a Sandboxes<'r>,
    pipeline: Pipeline<'a, 'r>,
    options: &'a DriverOptions,
}

impl<'a, 'r> Driver<'a, 'r> {
    pub fn new(
        config: &'a Config,
        sandboxes: &'a Sandboxes<'r>,
        pipeline: Pipeline<'a, 'r>,
        options: &'a DriverOptions,
    ) -> Self {
        Self {
            config,
            sandboxes,
            pipeline,
            options,
        }
    }

    /// Build every target; the first failing target ends the run.
    ///
    /// Returns the artifacts produced, copied to the output directory when
    /// one is set.
    pub fn run(&self, source: &SourcePackage, targets: &[BuildTarget]) -> Result<Vec<ChangesArtifact>> {
        let mut produced = Vec::new();
        for group in targets.chunk_by(|a, b| a.distribution == b.distribution) {
            let distribution = &group[0];
            tracing::info!(
                "{}: {} target(s) on {}",
                distribution.distribution,
                group.len(),
                distribution.image_distribution
            );
            let artifacts = self
                .run_distribution(source, group)
                .with_context(|| format!("distribution {}", distribution.distribution))?;
            produced.extend(artifacts);
        }
        Ok(produced)
    }

    fn run_distribution(
        &self,
        source: &SourcePackage,
        group: &[BuildTarget],
    ) -> Result<Vec<ChangesArtifact>> {
        let scratch = &self.sandboxes.settings().scratch;
        let work = tempfile::Builder::new()
            .prefix("debpkg-builder-")
            .tempdir_in(scratch)
            .with_context(|| format!("creating work directory in '{}'", scratch.display()))?;

        let copy = copy_descriptor(source, work.path())?;
        let package = match self.suffix_for(&group[0]) {
            Some(suffix) => {
                let first = &group[0];
                retarget(
                    self.sandboxes,
                    &self.config.images.source_image(&first.image_distribution),
                    work.path(),
                    &copy,
                    &RetargetRequest {
                        distribution: first.upload_distribution.clone(),
                        suffix: suffix.to_string(),
                        bump: self.options.bump_rebuild,
                    },
                    &self.config.maintainer,
                )?
            }
            None => copy,
        };

        let mut produced = Vec::new();
        for target in group {
            let Some(changes) = self.pipeline.run(target, &package, work.path())? else {
                continue;
            };
            let changes = match &self.options.output_dir {
                Some(dir) => self.export(&changes, dir, target)?,
                None => changes,
            };
            produced.push(changes);
        }

        work.close()
            .with_context(|| format!("removing work directory for {}", group[0].distribution))?;
        Ok(produced)
    }

    fn suffix_for(&self, target: &BuildTarget) -> Option<&str> {
        self.options
            .rebuild_suffix
            .as_deref()
            .or_else(|| {
                self.config
                    .rebuild_suffixes
                    .get(&target.distribution)
                    .map(String::as_str)
            })
            .filter(|suffix| !suffix.is_empty())
    }

    fn export(
        &self,
        changes: &ChangesArtifact,
        dir: &Path,
        target: &BuildTarget,
    ) -> Result<ChangesArtifact> {
        let dest = dir.join(&target.distribution).join(&target.arch);
        let path = changes.copy_to(&dest)?;
        tracing::info!("copied {} to '{}'", target.arch, dest.display());
        ChangesArtifact::load(&path)
    }
}
