//! Builder configuration.
//!
//! Loaded from TOML; every key is optional and falls back to the defaults
//! below. Lookup order: explicit path, `$DEBPKG_BUILDER_CONFIG`, then
//! `<config dir>/debpkg-builder/config.toml`. A missing file at the implicit
//! locations is not an error.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "DEBPKG_BUILDER_CONFIG";

const DEFAULT_RUNTIME: &str = "docker";
const DEFAULT_SCRATCH: &str = "/tmp";
const DEFAULT_BINARY_IMAGE: &str = "brianmay/debian-{arch}:{distribution}";
const DEFAULT_SOURCE_IMAGE: &str = "brianmay/debian-source:{distribution}";
const DEFAULT_WORKING_TREE_IMAGE: &str = "brianmay/debian-amd64:sid";
const DEFAULT_MAINTAINER: &str = "Brian May <bam@debian.org>";
const DEFAULT_BUGS: &str = "mailto:Brian May <brian@linuxpenguins.xyz>";
const DEFAULT_GNUPG_HOME_ENV: &str = "GNUPGHOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Container runtime binary (`docker`, `podman`).
    pub runtime: String,
    /// Host directory shared with every sandbox at the same path.
    pub scratch: PathBuf,
    /// Value for `--userns=` on create, if any.
    pub userns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub binary: String,
    pub source: String,
    pub working_tree: String,
}

impl ImageConfig {
    /// Image for building `arch` binaries against `distribution`.
    pub fn binary_image(&self, arch: &str, distribution: &str) -> String {
        self.binary
            .replace("{arch}", arch)
            .replace("{distribution}", distribution)
    }

    /// Image for source-only work against `distribution`.
    pub fn source_image(&self, distribution: &str) -> String {
        self.source.replace("{distribution}", distribution)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainerConfig {
    /// Author of generated changelog entries.
    pub identity: String,
    /// Value written to `Bugs:` in every control paragraph.
    pub bugs: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub images: ImageConfig,
    pub maintainer: MaintainerConfig,
    /// Environment variable naming the GnuPG home to forward for signing.
    pub gnupg_home_env: String,
    /// Version suffix per logical distribution (`stable = "~bpo12"`).
    pub rebuild_suffixes: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig {
                runtime: DEFAULT_RUNTIME.to_string(),
                scratch: PathBuf::from(DEFAULT_SCRATCH),
                userns: None,
            },
            images: ImageConfig {
                binary: DEFAULT_BINARY_IMAGE.to_string(),
                source: DEFAULT_SOURCE_IMAGE.to_string(),
                working_tree: DEFAULT_WORKING_TREE_IMAGE.to_string(),
            },
            maintainer: MaintainerConfig {
                identity: DEFAULT_MAINTAINER.to_string(),
                bugs: DEFAULT_BUGS.to_string(),
            },
            gnupg_home_env: DEFAULT_GNUPG_HOME_ENV.to_string(),
            rebuild_suffixes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    sandbox: Option<SandboxToml>,
    images: Option<ImagesToml>,
    maintainer: Option<MaintainerToml>,
    signing: Option<SigningToml>,
    rebuild: Option<RebuildToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SandboxToml {
    runtime: Option<String>,
    scratch: Option<PathBuf>,
    userns: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImagesToml {
    binary: Option<String>,
    source: Option<String>,
    working_tree: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaintainerToml {
    identity: Option<String>,
    bugs: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SigningToml {
    gnupg_home_env: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RebuildToml {
    suffixes: Option<BTreeMap<String, String>>,
}

impl Config {
    /// Resolve and load the configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        match dirs::config_dir() {
            Some(dir) => {
                let path = dir.join("debpkg-builder").join("config.toml");
                if path.is_file() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config '{}'", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let parsed: ConfigToml = toml::from_str(text)?;
        let mut config = Self::default();

        if let Some(sandbox) = parsed.sandbox {
            if let Some(runtime) = sandbox.runtime {
                config.sandbox.runtime = non_empty("sandbox.runtime", runtime)?;
            }
            if let Some(scratch) = sandbox.scratch {
                if !scratch.is_absolute() {
                    bail!(
                        "sandbox.scratch must be an absolute path, got '{}'",
                        scratch.display()
                    );
                }
                config.sandbox.scratch = scratch;
            }
            config.sandbox.userns = sandbox.userns.filter(|v| !v.trim().is_empty());
        }

        if let Some(images) = parsed.images {
            if let Some(binary) = images.binary {
                config.images.binary = non_empty("images.binary", binary)?;
            }
            if let Some(source) = images.source {
                config.images.source = non_empty("images.source", source)?;
            }
            if let Some(working_tree) = images.working_tree {
                config.images.working_tree = non_empty("images.working_tree", working_tree)?;
            }
        }

        if let Some(maintainer) = parsed.maintainer {
            if let Some(identity) = maintainer.identity {
                config.maintainer.identity = non_empty("maintainer.identity", identity)?;
            }
            if let Some(bugs) = maintainer.bugs {
                config.maintainer.bugs = non_empty("maintainer.bugs", bugs)?;
            }
        }

        if let Some(gnupg_home_env) = parsed.signing.and_then(|s| s.gnupg_home_env) {
            config.gnupg_home_env = non_empty("signing.gnupg_home_env", gnupg_home_env)?;
        }

        if let Some(suffixes) = parsed.rebuild.and_then(|r| r.suffixes) {
            config.rebuild_suffixes = suffixes;
        }

        Ok(config)
    }

    /// GnuPG home to forward into signing sandboxes.
    pub fn gnupg_home(&self) -> Option<PathBuf> {
        env::var_os(&self.gnupg_home_env)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".gnupg")))
    }
}

fn non_empty(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{field} must not be empty");
    }
    Ok(trimmed.to_string())
}
