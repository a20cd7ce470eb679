//! jail.conf templates
//!
//! A template is literal text with `{{ field }}` placeholders. Literal bytes
//! are copied verbatim so a render can be compared byte-for-byte with what
//! is on disk.

use crate::error::{Error, Result};
use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::space0,
    combinator::recognize,
    sequence::{delimited, pair},
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Template shipped with the binary
pub const BUILTIN_TEMPLATE: &str = include_str!("../templates/jail.conf.tmpl");

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed jail.conf template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while !rest.is_empty() {
            match rest.find("{{") {
                None => {
                    segments.push(Segment::Literal(rest.to_string()));
                    break;
                }
                Some(0) => {
                    let (remaining, field) = placeholder(rest).map_err(|_| {
                        let consumed = &source[..source.len() - rest.len()];
                        Error::TemplateParse(format!(
                            "malformed placeholder on line {}",
                            consumed.matches('\n').count() + 1
                        ))
                    })?;
                    segments.push(Segment::Field(field.to_string()));
                    rest = remaining;
                }
                Some(pos) => {
                    segments.push(Segment::Literal(rest[..pos].to_string()));
                    rest = &rest[pos..];
                }
            }
        }

        Ok(Self { segments })
    }

    /// The built-in VNET template
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_TEMPLATE)
    }

    /// Load a template file, or the built-in template when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let source = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                Self::parse(&source)
            }
            None => Self::builtin(),
        }
    }

    /// Field names referenced by the template
    pub fn fields(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Check that the context provides every referenced field
    pub fn check(&self, ctx: &RenderContext) -> Result<()> {
        for field in self.fields() {
            if ctx.get(field).is_none() {
                return Err(Error::TemplateField {
                    field: field.to_string(),
                    jail: ctx.subject().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Render the template against a context
    pub fn render(&self, ctx: &RenderContext) -> Result<Vec<u8>> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = ctx.get(name).ok_or_else(|| Error::TemplateField {
                        field: name.clone(),
                        jail: ctx.subject().to_string(),
                    })?;
                    if value.contains(['\n', '\r', '\0']) {
                        return Err(Error::Render(format!(
                            "field '{}' of jail '{}' contains a line break or NUL",
                            name,
                            ctx.subject()
                        )));
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(out.into_bytes())
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn placeholder(input: &str) -> IResult<&str, &str> {
    delimited(pair(tag("{{"), space0), identifier, pair(space0, tag("}}"))).parse(input)
}

/// Check whether a string can be used as a template field name
pub fn is_identifier(s: &str) -> bool {
    matches!(identifier(s), Ok(("", _)))
}

/// Field values a template is rendered against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    /// Jail the values belong to, for error messages
    subject: String,
    values: BTreeMap<String, String>,
}

impl RenderContext {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(|s| s.as_str())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        let mut ctx = RenderContext::new("web1");
        ctx.insert("name", "web1");
        ctx.insert("slot", "3");
        ctx
    }

    #[test]
    fn test_render_substitutes_fields() {
        let tmpl = Template::parse("{{ name }} { $if = {{slot}}; }\n").unwrap();
        assert_eq!(tmpl.render(&ctx()).unwrap(), b"web1 { $if = 3; }\n");
    }

    #[test]
    fn test_literals_are_verbatim() {
        let source = "  a {\n\tb = \"${x}\";  \n}\n\n";
        let tmpl = Template::parse(source).unwrap();
        assert_eq!(tmpl.render(&ctx()).unwrap(), source.as_bytes());
    }

    #[test]
    fn test_fields_listed() {
        let tmpl = Template::parse("{{ name }}-{{ slot }}-{{ name }}").unwrap();
        assert_eq!(tmpl.fields().into_iter().collect::<Vec<_>>(), vec!["name", "slot"]);
    }

    #[test]
    fn test_missing_field() {
        let tmpl = Template::parse("{{ name }} {{ version }}").unwrap();
        let ctx = ctx();
        match tmpl.check(&ctx).unwrap_err() {
            Error::TemplateField { field, jail } => {
                assert_eq!(field, "version");
                assert_eq!(jail, "web1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(tmpl.render(&ctx), Err(Error::TemplateField { .. })));
    }

    #[test]
    fn test_malformed_placeholder() {
        let err = Template::parse("a\nb {{ name \n").unwrap_err();
        match err {
            Error::TemplateParse(msg) => assert!(msg.contains("line 2")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(Template::parse("{{ 1abc }}").is_err());
        assert!(Template::parse("{{}}").is_err());
    }

    #[test]
    fn test_line_break_in_value_is_render_error() {
        let tmpl = Template::parse("{{ name }}").unwrap();
        let mut ctx = RenderContext::new("web1");
        ctx.insert("name", "web1\npersist;");
        assert!(matches!(tmpl.render(&ctx), Err(Error::Render(_))));
    }

    #[test]
    fn test_builtin_template_parses() {
        let tmpl = Template::builtin().unwrap();
        let fields = tmpl.fields();
        for field in ["name", "root", "jail_iface", "host_iface", "ip_addr", "gateway", "bridge"] {
            assert!(fields.contains(field), "builtin template lacks {}", field);
        }
        assert!(!fields.contains("version"));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("devfs_ruleset"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jail.conf.tmpl");
        fs::write(&path, "{{ name }} {}\n").unwrap();

        let tmpl = Template::load(Some(&path)).unwrap();
        assert_eq!(tmpl.render(&ctx()).unwrap(), b"web1 {}\n");
        assert!(matches!(
            Template::load(Some(&dir.path().join("absent"))),
            Err(Error::ConfigRead { .. })
        ));
    }
}
