//! A parsed template: resolved parameters plus the ordered sequence of
//! literal spans and parameter references.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::placeholder::model::{ParamName, ParamResolved};
use crate::placeholder::{parse_param_unresolved, resolve_param, scan_placeholders};
use crate::profile::{infer_profile, Profile};
use crate::source::{Source, SourceSpan};
use crate::SubstitutionMap;

/// One element of the render sequence. Literal spans never overlap, are
/// never empty, and never sit adjacent to each other.
#[derive(Debug, Clone)]
pub enum Segment {
    Text(SourceSpan),
    Param(ParamName),
}

#[derive(Debug, Clone)]
pub struct Template {
    pub source: Arc<Source>,
    pub profile: Arc<Profile>,
    pub params: BTreeMap<ParamName, ParamResolved>,
    pub sequence: Vec<Segment>,
}

impl Template {
    /// Parse every placeholder in `source` and build the render sequence.
    /// Each parameter must be defined at exactly one site.
    pub fn from_source(source: Arc<Source>, profile: Arc<Profile>) -> Result<Template> {
        let placeholders = scan_placeholders(&source)?;

        let mut params: BTreeMap<ParamName, ParamResolved> = BTreeMap::new();
        let mut sequence = Vec::new();
        let mut cursor = 0usize;

        for ph in placeholders {
            let resolved = resolve_param(parse_param_unresolved(&ph)?)?;

            if let Some(existing) = params.get(&resolved.name) {
                let (l1, c1) = existing.placeholder.line_col();
                let (l2, c2) = resolved.placeholder.line_col();
                return Err(Error::Parse {
                    message: format!(
                        "parameter '{}' defined more than once (first at {l1}:{c1}, again at {l2}:{c2})",
                        resolved.name
                    ),
                    origin: source.origin_label(),
                    line: l2,
                    column: c2,
                });
            }

            if ph.span_outer.start > cursor {
                sequence.push(Segment::Text(SourceSpan {
                    start: cursor,
                    end: ph.span_outer.start,
                }));
            }
            sequence.push(Segment::Param(resolved.name.clone()));
            cursor = ph.span_outer.end;
            params.insert(resolved.name.clone(), resolved);
        }

        if cursor < source.len() {
            sequence.push(Segment::Text(SourceSpan {
                start: cursor,
                end: source.len(),
            }));
        }

        Ok(Template {
            source,
            profile,
            params,
            sequence,
        })
    }

    /// Load from a file, inferring the profile from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Template> {
        let path = path.as_ref();
        let source = Source::from_file(path)?;
        let profile = infer_profile(path);
        Template::from_source(source, profile)
    }

    /// The substitution map that renders every parameter at its default.
    pub fn defaults(&self) -> SubstitutionMap {
        self.params
            .iter()
            .map(|(name, param)| (name.clone(), param.default.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::model::ValueLiteral;
    use crate::profile::get_profile;

    fn template(text: &str) -> Result<Template> {
        let src = Source::from_string(text)?;
        Template::from_source(src, get_profile("yaml").unwrap())
    }

    #[test]
    fn sequence_alternates_text_and_params() {
        let t = template("a: {{TL x = 1}}\nb: {{TL y = 2}}\n").unwrap();
        assert_eq!(t.params.len(), 2);
        let shape: Vec<&str> = t
            .sequence
            .iter()
            .map(|s| match s {
                Segment::Text(_) => "text",
                Segment::Param(_) => "param",
            })
            .collect();
        assert_eq!(shape, vec!["text", "param", "text", "param", "text"]);
    }

    #[test]
    fn text_spans_are_never_empty_or_adjacent() {
        let t = template("{{TL x = 1}}{{TL y = 2}}").unwrap();
        let mut last_was_text = false;
        for seg in &t.sequence {
            match seg {
                Segment::Text(span) => {
                    assert!(span.len() > 0);
                    assert!(!last_was_text, "adjacent text spans must be coalesced");
                    last_was_text = true;
                }
                Segment::Param(_) => last_was_text = false,
            }
        }
    }

    #[test]
    fn duplicate_parameter_definition_reports_both_sites() {
        let err = template("a: {{TL x = 1}}\nb: {{TL x = 2}}\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("defined more than once"), "{msg}");
        assert!(msg.contains("1:4"), "{msg}");
        assert!(msg.contains("2:4"), "{msg}");
    }

    #[test]
    fn defaults_cover_every_parameter() {
        let t = template("n: {{TL n = 7}}  s: {{TL s = \"v\"}}\n").unwrap();
        let defaults = t.defaults();
        assert_eq!(defaults.len(), 2);
        assert_eq!(
            defaults[&ParamName::new("n").unwrap()],
            ValueLiteral::Int(7)
        );
    }
}
