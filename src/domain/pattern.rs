//! Rule pattern templates.
//!
//! A pattern such as `{client}-{year}-{region}` is a sequence of literal text
//! and `{dimension_name}` placeholders. Rendering substitutes each placeholder
//! and keeps literal text verbatim, so rendering the same inputs twice always
//! yields byte-identical output.

use std::collections::BTreeMap;

use super::error::DomainError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePattern {
    segments: Vec<Segment>,
}

impl RulePattern {
    pub fn parse(source: &str) -> Result<Self, DomainError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices();

        while let Some((position, ch)) = chars.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(DomainError::pattern(position, "nested `{`")),
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(DomainError::pattern(position, "unclosed placeholder"));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(DomainError::pattern(position, "empty placeholder"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                '}' => return Err(DomainError::pattern(position, "unmatched `}`")),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment
                && !names.contains(&name.as_str())
            {
                names.push(name.as_str());
            }
        }
        names
    }

    /// Render the pattern, failing with the first placeholder that has no value.
    pub fn render(&self, values: &BTreeMap<String, String>) -> Result<String, String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match values.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_literals_and_placeholders() {
        let pattern = RulePattern::parse("{client}-{year}_x").expect("valid pattern");
        assert_eq!(
            pattern.segments(),
            &[
                Segment::Placeholder("client".to_string()),
                Segment::Literal("-".to_string()),
                Segment::Placeholder("year".to_string()),
                Segment::Literal("_x".to_string()),
            ]
        );
        assert_eq!(pattern.placeholders(), vec!["client", "year"]);
    }

    #[test]
    fn reordered_pattern_reorders_tokens() {
        let inputs = values(&[("client", "ACME"), ("year", "2024"), ("region", "US")]);
        let before = RulePattern::parse("{client}-{year}-{region}").expect("valid");
        let after = RulePattern::parse("{region}-{client}-{year}").expect("valid");

        assert_eq!(before.render(&inputs).as_deref(), Ok("ACME-2024-US"));
        assert_eq!(after.render(&inputs).as_deref(), Ok("US-ACME-2024"));
    }

    #[test]
    fn render_reports_missing_placeholder() {
        let pattern = RulePattern::parse("{client}-{region}").expect("valid");
        let err = pattern.render(&values(&[("client", "ACME")])).unwrap_err();
        assert_eq!(err, "region");
    }

    #[test]
    fn repeated_placeholder_listed_once() {
        let pattern = RulePattern::parse("{a}/{b}/{a}").expect("valid");
        assert_eq!(pattern.placeholders(), vec!["a", "b"]);
        assert_eq!(
            pattern.render(&values(&[("a", "1"), ("b", "2")])).as_deref(),
            Ok("1/2/1")
        );
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(matches!(
            RulePattern::parse("{client"),
            Err(DomainError::Pattern { position: 0, .. })
        ));
        assert!(RulePattern::parse("a}").is_err());
        assert!(RulePattern::parse("{}").is_err());
        assert!(RulePattern::parse("{a{b}}").is_err());
    }

    #[test]
    fn literal_only_pattern() {
        let pattern = RulePattern::parse("static").expect("valid");
        assert!(pattern.placeholders().is_empty());
        assert_eq!(pattern.render(&BTreeMap::new()).as_deref(), Ok("static"));
    }
}
