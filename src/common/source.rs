//! Source lines
//!
//! A [`SourceLine`] is one line of assembly with its metadata split off:
//! indentation, `//` comments, and `@tag` / `@tag=value` annotations found
//! inside the comments. Tags steer the optimizer (forced orderings, loop
//! placement, spill markers) and are carried through to the output.
//!
//! ```text
//!     ldr x1, [x0], #8    // @id=first @pre load the next element
//!     ^^^^^^^^^^^^^^^^       ^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^^^^^^
//!     text                   tags              comment
//! ```

use std::collections::BTreeMap;
use std::fmt;

/// Value attached to a source tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagValue {
    Flag(bool),
    Int(i64),
    Str(String),
}

impl TagValue {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "true" => TagValue::Flag(true),
            "false" => TagValue::Flag(false),
            _ => match raw.parse::<i64>() {
                Ok(n) => TagValue::Int(n),
                Err(_) => TagValue::Str(raw.to_string()),
            },
        }
    }

    /// Interpret the tag as a boolean; `None` if it is not a flag
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            TagValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// Interpret the tag as an identifier (strings and integers both qualify)
    pub fn as_ident(&self) -> Option<String> {
        match self {
            TagValue::Str(s) => Some(s.clone()),
            TagValue::Int(n) => Some(n.to_string()),
            TagValue::Flag(_) => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Flag(b) => write!(f, "{}", b),
            TagValue::Int(n) => write!(f, "{}", n),
            TagValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// A single line of assembly source together with its metadata
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SourceLine {
    /// Instruction text with comments and surrounding whitespace removed
    pub text: String,
    /// Free-form comments (tags already extracted)
    pub comments: Vec<String>,
    /// Tags found in comments
    pub tags: BTreeMap<String, TagValue>,
    /// 1-based line number in the originating file; 0 for synthesized lines
    pub line_no: usize,
    /// Byte offset of `text` within the originating file
    pub offset: usize,
}

impl SourceLine {
    /// Create a source line from raw text, splitting off comments and tags
    pub fn new(raw: &str) -> Self {
        Self::with_location(raw, 0, 0)
    }

    /// Create a source line, recording where in the input file it came from
    pub fn with_location(raw: &str, line_no: usize, line_offset: usize) -> Self {
        let indentation = raw.len() - raw.trim_start().len();
        let mut parts = raw.split("//");
        let text = parts.next().unwrap_or("").trim().to_string();

        let mut tags = BTreeMap::new();
        let mut comments = Vec::new();
        for comment in parts {
            let rest = extract_tags(comment, &mut tags);
            let rest = rest.trim();
            if !rest.is_empty() {
                comments.push(rest.to_string());
            }
        }

        SourceLine {
            text,
            comments,
            tags,
            line_no,
            offset: line_offset + indentation,
        }
    }

    /// Split a whole file into source lines, dropping lines without instruction text
    pub fn parse_all(src: &str) -> Vec<SourceLine> {
        let mut lines = Vec::new();
        let mut offset = 0;
        for (idx, raw) in src.split('\n').enumerate() {
            let line = SourceLine::with_location(raw.trim_end_matches('\r'), idx + 1, offset);
            offset += raw.len() + 1;
            if !line.text.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Replace the instruction text, keeping all metadata
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        SourceLine {
            text: text.into(),
            ..self.clone()
        }
    }

    pub fn tag(&self, name: &str) -> Option<&TagValue> {
        self.tags.get(name)
    }

    /// True if the tag is present and set
    pub fn has_flag(&self, name: &str) -> bool {
        self.tags.get(name).and_then(TagValue::as_flag).unwrap_or(false)
    }

    /// Tri-state lookup for flags such as `@pre` / `@pre=false`
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.tags.get(name).and_then(TagValue::as_flag)
    }

    pub fn set_tag(&mut self, name: &str, value: TagValue) -> &mut Self {
        self.tags.insert(name.to_string(), value);
        self
    }

    pub fn add_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.comments.push(comment.into());
        self
    }

    /// Render the line, optionally keeping tags
    pub fn render(&self, keep_tags: bool) -> String {
        let mut meta: Vec<String> = Vec::new();
        if keep_tags {
            for (name, value) in &self.tags {
                match value {
                    TagValue::Flag(true) => meta.push(format!("@{}", name)),
                    other => meta.push(format!("@{}={}", name, other)),
                }
            }
        }
        meta.extend(self.comments.iter().cloned());

        if meta.is_empty() {
            self.text.clone()
        } else if self.text.is_empty() {
            format!("// {}", meta.join(" "))
        } else {
            format!("{:<32} // {}", self.text, meta.join(" "))
        }
    }
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(true))
    }
}

/// Pull `@tag` and `@tag=value` tokens out of a comment, returning what remains
fn extract_tags(comment: &str, tags: &mut BTreeMap<String, TagValue>) -> String {
    let mut rest = Vec::new();
    for word in comment.split_whitespace() {
        let Some(body) = word.strip_prefix('@') else {
            rest.push(word);
            continue;
        };
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_name {
            rest.push(word);
            continue;
        }
        let value = match value {
            Some(v) if !v.is_empty() => TagValue::parse(v),
            Some(_) => {
                rest.push(word);
                continue;
            }
            None => TagValue::Flag(true),
        };
        tags.insert(name.to_string(), value);
    }
    rest.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_comments_and_tags() {
        let line = SourceLine::new("   add x1, x2, x3 // @id=a keep this @pre");
        assert_eq!(line.text, "add x1, x2, x3");
        assert_eq!(line.comments, vec!["keep this".to_string()]);
        assert_eq!(line.tag("id"), Some(&TagValue::Str("a".to_string())));
        assert!(line.has_flag("pre"));
        assert_eq!(line.offset, 3);
    }

    #[test]
    fn test_tag_values() {
        let line = SourceLine::new("nop // @core=false @n=3");
        assert_eq!(line.flag("core"), Some(false));
        assert_eq!(line.tag("n"), Some(&TagValue::Int(3)));
        assert_eq!(line.flag("post"), None);
    }

    #[test]
    fn test_parse_all_skips_blank_lines() {
        let src = "add x1, x2, x3\n\n  // just a comment\nmul x4, x1, x1\n";
        let lines = SourceLine::parse_all(src);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line_no, 1);
        assert_eq!(lines[1].line_no, 4);
        assert_eq!(&src[lines[1].offset..lines[1].offset + 3], "mul");
    }

    #[test]
    fn test_render_round_trip() {
        let line = SourceLine::new("str x1, [sp, #16] // @is_spill");
        let again = SourceLine::new(&line.render(true));
        assert_eq!(again.text, line.text);
        assert_eq!(again.tags, line.tags);
        assert_eq!(line.render(false), "str x1, [sp, #16]");
    }
}
