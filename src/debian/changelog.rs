//! `debian/changelog` reading and writing.
//!
//! Only the header and trailer of each entry are interpreted. Entries that
//! are not modified are written back exactly as they were read.

use std::sync::LazyLock;

use regex::Regex;

use super::version::Version;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w[-+0-9a-z.]*) \(([^() \t]+)\)((?:\s+[-+0-9a-zA-Z.]+)+);(.*)$")
        .expect("changelog header regex")
});

static TRAILER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ -- (.*<[^>]*>)( {1,2})(\S.*)$").expect("changelog trailer regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub package: String,
    pub version: String,
    /// Space separated, as in the header (usually a single distribution).
    pub distributions: String,
    /// Everything after the `;`, e.g. ` urgency=medium`.
    pub metadata: String,
    /// Lines between header and trailer, blank lines included.
    pub changes: Vec<String>,
    pub author: String,
    pub date: String,
    /// Separator between author and date in the trailer.
    trailer_gap: String,
    /// Original text, dropped once the entry is modified.
    raw: Option<String>,
}

impl ChangelogEntry {
    pub fn new(
        package: &str,
        version: &str,
        distributions: &str,
        urgency: &str,
        author: &str,
        date: &str,
    ) -> Self {
        Self {
            package: package.to_string(),
            version: version.to_string(),
            distributions: distributions.to_string(),
            metadata: format!(" urgency={urgency}"),
            changes: Vec::new(),
            author: author.to_string(),
            date: date.to_string(),
            trailer_gap: "  ".to_string(),
            raw: None,
        }
    }

    pub fn parsed_version(&self) -> Result<Version, crate::error::PipelineError> {
        Version::parse(&self.version)
    }

    pub fn set_version(&mut self, version: &str) {
        self.version = version.to_string();
        self.raw = None;
    }

    pub fn set_distributions(&mut self, distributions: &str) {
        self.distributions = distributions.to_string();
        self.raw = None;
    }

    pub fn add_change(&mut self, line: &str) {
        self.changes.push(line.to_string());
        self.raw = None;
    }

    fn render(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut out = format!(
            "{} ({}) {};{}\n",
            self.package, self.version, self.distributions, self.metadata
        );
        for line in &self.changes {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&format!(
            " -- {}{}{}\n",
            self.author, self.trailer_gap, self.date
        ));
        out
    }
}

/// A parsed changelog; always holds at least one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changelog {
    entries: Vec<ChangelogEntry>,
    /// Blank lines between entries, preserved per entry (index = entry after).
    separators: Vec<String>,
    /// Text after the last recognised entry (old-format notes, vim modelines).
    tail: String,
}

impl Changelog {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut changelog = Changelog {
            entries: Vec::new(),
            separators: Vec::new(),
            tail: String::new(),
        };
        let mut pending_gap = String::new();
        let mut lines = text.split_inclusive('\n').enumerate();

        while let Some((lineno, line)) = lines.next() {
            let stripped = line.trim_end_matches(['\n', '\r']);
            if stripped.trim().is_empty() {
                pending_gap.push_str(line);
                continue;
            }

            let Some(caps) = HEADER.captures(stripped) else {
                if changelog.entries.is_empty() {
                    return Err(format!(
                        "line {}: expected changelog header, found '{stripped}'",
                        lineno + 1
                    ));
                }
                changelog.tail = pending_gap.clone() + line;
                for (_, rest) in lines.by_ref() {
                    changelog.tail.push_str(rest);
                }
                pending_gap.clear();
                break;
            };

            let mut raw = line.to_string();
            let mut changes = Vec::new();
            let mut trailer = None;
            for (_, body_line) in lines.by_ref() {
                raw.push_str(body_line);
                let body = body_line.trim_end_matches(['\n', '\r']);
                if body.starts_with(" -- ") {
                    trailer = Some(body.to_string());
                    break;
                }
                changes.push(body.to_string());
            }
            let trailer = trailer.ok_or_else(|| {
                format!(
                    "entry starting at line {} has no ' -- ' trailer",
                    lineno + 1
                )
            })?;
            let trailer_caps = TRAILER
                .captures(&trailer)
                .ok_or_else(|| format!("malformed trailer '{trailer}'"))?;

            changelog.separators.push(std::mem::take(&mut pending_gap));
            changelog.entries.push(ChangelogEntry {
                package: caps[1].to_string(),
                version: caps[2].to_string(),
                distributions: caps[3].trim().to_string(),
                metadata: caps[4].to_string(),
                changes,
                author: trailer_caps[1].to_string(),
                date: trailer_caps[3].to_string(),
                trailer_gap: trailer_caps[2].to_string(),
                raw: Some(raw),
            });
        }
        changelog.tail.insert_str(0, &pending_gap);

        if changelog.entries.is_empty() {
            return Err("changelog has no entries".to_string());
        }
        Ok(changelog)
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[ChangelogEntry] {
        &self.entries
    }

    pub fn top(&self) -> &ChangelogEntry {
        &self.entries[0]
    }

    pub fn top_mut(&mut self) -> &mut ChangelogEntry {
        &mut self.entries[0]
    }

    pub fn package(&self) -> &str {
        &self.top().package
    }

    /// Insert a new entry above the current top one.
    pub fn push_front(&mut self, entry: ChangelogEntry) {
        self.entries.insert(0, entry);
        if self.separators.is_empty() {
            self.separators.push(String::new());
        } else {
            self.separators[0] = "\n".to_string();
        }
        self.separators.insert(0, String::new());
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if let Some(gap) = self.separators.get(idx) {
                out.push_str(gap);
            }
            out.push_str(&entry.render());
        }
        out.push_str(&self.tail);
        out
    }
}
