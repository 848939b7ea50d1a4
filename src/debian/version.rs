//! Debian version strings: `[epoch:]upstream[-revision]`.
//!
//! Ordering follows Debian policy 5.6.12: epochs compare numerically, then
//! upstream and revision are compared as alternating non-digit / digit runs.
//! In non-digit runs `~` sorts before everything (end of string included),
//! letters sort before all other characters. Digit runs compare as integers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::PipelineError;

/// `<prefix>~<tag>+<counter>`, the marker left by a previous rebuild.
static REBUILD_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)(~.*)\+(\d+)$").expect("rebuild marker regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub epoch: u32,
    pub upstream: String,
    pub revision: Option<String>,
}

impl Version {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let invalid = |reason: &str| PipelineError::VersionParse {
            version: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty version"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (epoch, rest) = match trimmed.split_once(':') {
            Some((epoch, rest)) => {
                let epoch = epoch
                    .parse::<u32>()
                    .map_err(|_| invalid("epoch is not a number"))?;
                (epoch, rest)
            }
            None => (0, trimmed),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((upstream, revision)) => {
                if revision.is_empty() {
                    return Err(invalid("empty revision"));
                }
                (upstream, Some(revision.to_string()))
            }
            None => (rest, None),
        };

        if upstream.is_empty() {
            return Err(invalid("empty upstream version"));
        }
        if !upstream.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid("upstream version must start with a digit"));
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || ".+~-:".contains(c);
        if !upstream.chars().all(allowed) {
            return Err(invalid("illegal character in upstream version"));
        }
        if let Some(revision) = &revision {
            if !revision
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || ".+~".contains(c))
            {
                return Err(invalid("illegal character in revision"));
            }
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision,
        })
    }

    /// The version as it appears in file names: no epoch.
    pub fn without_epoch(&self) -> String {
        match &self.revision {
            Some(revision) => format!("{}-{}", self.upstream, revision),
            None => self.upstream.clone(),
        }
    }
}

impl FromStr for Version {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.without_epoch())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_fragment(&self.upstream, &other.upstream))
            .then_with(|| {
                compare_fragment(
                    self.revision.as_deref().unwrap_or("0"),
                    other.revision.as_deref().unwrap_or("0"),
                )
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn char_order(c: Option<char>) -> i32 {
    match c {
        None => 0,
        Some('~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// Compare one upstream or revision component.
pub fn compare_fragment(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    while a.peek().is_some() || b.peek().is_some() {
        // Non-digit prefix, character by character.
        loop {
            let ca = a.peek().copied().filter(|c| !c.is_ascii_digit());
            let cb = b.peek().copied().filter(|c| !c.is_ascii_digit());
            if ca.is_none() && cb.is_none() {
                break;
            }
            match char_order(ca).cmp(&char_order(cb)) {
                Ordering::Equal => {
                    if ca.is_some() {
                        a.next();
                    }
                    if cb.is_some() {
                        b.next();
                    }
                }
                unequal => return unequal,
            }
        }

        // Digit run, as an integer. Leading zeros are irrelevant.
        let mut da = String::new();
        while let Some(c) = a.next_if(char::is_ascii_digit) {
            da.push(c);
        }
        let mut db = String::new();
        while let Some(c) = b.next_if(char::is_ascii_digit) {
            db.push(c);
        }
        let da = da.trim_start_matches('0');
        let db = db.trim_start_matches('0');
        match da.len().cmp(&db.len()).then_with(|| da.cmp(db)) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
    }

    Ordering::Equal
}

/// A version that carries a rebuild marker, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildMarker {
    /// Everything before the last `~tag+N` suffix.
    pub prefix: String,
    /// The `~tag` part, tilde included.
    pub tag: String,
    pub counter: u64,
}

impl RebuildMarker {
    pub fn detect(version: &str) -> Option<Self> {
        let caps = REBUILD_MARKER.captures(version)?;
        let counter = caps[3].parse().ok()?;
        Some(Self {
            prefix: caps[1].to_string(),
            tag: caps[2].to_string(),
            counter,
        })
    }

    /// Reassemble with `suffix` in place of the old tag.
    pub fn with_suffix(&self, suffix: &str, counter: u64) -> String {
        format!("{}{}+{}", self.prefix, suffix, counter)
    }
}
