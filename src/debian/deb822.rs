//! RFC 822 style control paragraphs (`debian/control`, `.dsc`, `.changes`).
//!
//! Field values are kept exactly as written, continuation lines included,
//! so a paragraph that is read and dumped again is byte-identical apart from
//! the fields that were explicitly set.

use std::fmt::Write as _;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    /// `(name, raw value)`; the raw value is everything after the colon,
    /// leading space and continuation lines included, without the final newline.
    fields: Vec<(String, String)>,
}

impl Paragraph {
    /// Field value with surrounding whitespace removed.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
    }

    /// Continuation lines of a multi-line field, leading space stripped.
    pub fn lines(&self, name: &str) -> Vec<&str> {
        let Some((_, raw)) = self
            .fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        else {
            return Vec::new();
        };
        raw.lines()
            .skip(1)
            .map(|line| line.strip_prefix(' ').unwrap_or(line))
            .collect()
    }

    /// Set a single-line field, replacing it in place or appending it.
    pub fn set(&mut self, name: &str, value: &str) {
        let raw = format!(" {value}");
        match self
            .fields
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = raw,
            None => self.fields.push((name.to_string(), raw)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn dump_into(&self, out: &mut String) {
        for (key, value) in &self.fields {
            let _ = writeln!(out, "{key}:{value}");
        }
    }
}

/// Parse all paragraphs in `text`. Comment lines (`#`) are dropped.
pub fn parse(text: &str) -> Result<Vec<Paragraph>, String> {
    let mut paragraphs = Vec::new();
    let mut current = Paragraph::default();

    for (lineno, line) in strip_signature(text).lines().enumerate() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            let Some((_, value)) = current.fields.last_mut() else {
                return Err(format!(
                    "line {}: continuation line without a field",
                    lineno + 1
                ));
            };
            value.push('\n');
            value.push_str(line);
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(format!("line {}: expected 'Field: value'", lineno + 1));
        };
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(format!("line {}: invalid field name '{key}'", lineno + 1));
        }
        current.fields.push((key.to_string(), value.to_string()));
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs)
}

/// Dump paragraphs separated by blank lines.
pub fn dump(paragraphs: &[Paragraph]) -> String {
    let mut out = String::new();
    for (idx, paragraph) in paragraphs.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        paragraph.dump_into(&mut out);
    }
    out
}

/// Remove an OpenPGP clear-sign wrapper, leaving the signed text.
fn strip_signature(text: &str) -> String {
    if !text.starts_with("-----BEGIN PGP SIGNED MESSAGE-----") {
        return text.to_string();
    }

    let mut body = String::new();
    let mut in_armor_headers = true;
    for line in text.lines().skip(1) {
        if in_armor_headers {
            if line.trim().is_empty() {
                in_armor_headers = false;
            }
            continue;
        }
        if line.starts_with("-----BEGIN PGP SIGNATURE-----") {
            break;
        }
        // Dash-escaped lines.
        let line = line.strip_prefix("- ").unwrap_or(line);
        body.push_str(line);
        body.push('\n');
    }
    body
}
