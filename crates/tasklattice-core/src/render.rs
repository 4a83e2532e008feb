//! Profile-aware rendering: `Template × SubstitutionMap → String`.
//!
//! The renderer is pure text production; newline policy is applied later by
//! the materializer. Notable situations (typed scalar lost inside quotes,
//! YAML risky bareword auto-quoted, unquoted XML attribute) are collected
//! as warnings and logged via `tracing`.

use crate::errors::{Error, Result};
use crate::placeholder::model::{
    ParamName, ParamResolved, Placeholder, QuoteStyle, ValueLiteral,
};
use crate::profile::{
    escape_json, escape_properties_like, escape_toml_basic, escape_xml_attr, escape_xml_text,
    escape_yaml_double, escape_yaml_single, EscapePolicy, Profile, ProfileKind,
};
use crate::template::{Segment, Template};
use crate::SubstitutionMap;

/// A notable-but-non-fatal rendering situation.
#[derive(Debug, Clone)]
pub struct RenderWarning {
    pub param: ParamName,
    pub message: String,
}

/// Render result with collected warnings.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub warnings: Vec<RenderWarning>,
}

/// Capability surface for turning a parsed template into rendered text.
pub trait Renderer {
    fn render_template(&self, tpt: &Template, subs: &SubstitutionMap) -> Result<String>;
}

/// Default renderer that delegates to [`render`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TlRenderer;

impl Renderer for TlRenderer {
    fn render_template(&self, tpt: &Template, subs: &SubstitutionMap) -> Result<String> {
        render(tpt, subs)
    }
}

pub fn render(tpt: &Template, subs: &SubstitutionMap) -> Result<String> {
    render_report(tpt, subs).map(|r| r.text)
}

pub fn render_report(tpt: &Template, subs: &SubstitutionMap) -> Result<Rendered> {
    validate_subs(tpt, subs)?;

    let mut out = String::with_capacity(tpt.source.len());
    let mut warnings = Vec::new();

    for segment in &tpt.sequence {
        match segment {
            Segment::Text(span) => out.push_str(tpt.source.slice(*span)),
            Segment::Param(name) => {
                let param = &tpt.params[name];
                let value = subs.get(name).unwrap_or(&param.default);
                out.push_str(&render_literal(param, value, &tpt.profile, &mut warnings));
            }
        }
    }

    for w in &warnings {
        tracing::warn!(param = %w.param, "{}", w.message);
    }

    Ok(Rendered {
        text: out,
        warnings,
    })
}

/// Every key must be declared; every value must satisfy the parameter's
/// effective type and domain.
fn validate_subs(tpt: &Template, subs: &SubstitutionMap) -> Result<()> {
    for (name, value) in subs {
        let Some(param) = tpt.params.get(name) else {
            return Err(Error::invalid_input(format!(
                "parameter name not found in template: {name}"
            )));
        };
        if !param.effective_type.matches(value) {
            return Err(Error::type_error(
                name.as_str(),
                format!(
                    "substituted a {} where {} was expected",
                    value.type_name(),
                    param.effective_type
                ),
            ));
        }
        if let Some(domain) = &param.domain {
            if !domain.contains(value) {
                return Err(Error::domain_error(
                    name.as_str(),
                    format!("value {value} is outside the declared domain"),
                ));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XmlContext {
    Attr,
    Text,
}

fn render_literal(
    param: &ParamResolved,
    value: &ValueLiteral,
    profile: &Profile,
    warnings: &mut Vec<RenderWarning>,
) -> String {
    let ph = &param.placeholder;
    let occ_quote = ph.quote.map(|q| q.style);
    let is_quoted = occ_quote.is_some();

    let xml_ctx = if profile.kind == ProfileKind::Xml {
        let ctx = resolve_xml_context(ph);
        if ctx == XmlContext::Attr && !is_quoted && profile.xml_attributes_must_remain_quoted {
            warnings.push(RenderWarning {
                param: param.name.clone(),
                message: format!(
                    "XML attribute for parameter '{}' is unquoted in the template; escaping is applied but the XML may be invalid",
                    param.name
                ),
            });
        }
        Some(ctx)
    } else {
        None
    };

    match value {
        ValueLiteral::Bool(b) => {
            let text = if *b { &profile.bool_true } else { &profile.bool_false };
            warn_typed_scalar_lost(param, profile, is_quoted, warnings);
            emit_scalar_like(text, is_quoted, profile, occ_quote, xml_ctx)
        }
        ValueLiteral::Int(i) => {
            warn_typed_scalar_lost(param, profile, is_quoted, warnings);
            emit_scalar_like(&i.to_string(), is_quoted, profile, occ_quote, xml_ctx)
        }
        ValueLiteral::Float(f) => {
            warn_typed_scalar_lost(param, profile, is_quoted, warnings);
            emit_scalar_like(&format_float(*f, profile), is_quoted, profile, occ_quote, xml_ctx)
        }
        ValueLiteral::Str(s) => {
            // YAML: risky unquoted barewords get auto-quoted.
            if !is_quoted {
                if let Some(needs_quotes) = profile.yaml_string_needs_quotes {
                    if needs_quotes(s) {
                        warnings.push(RenderWarning {
                            param: param.name.clone(),
                            message: format!(
                                "YAML string for parameter '{}' looked risky unquoted; auto-quoting",
                                param.name
                            ),
                        });
                        return emit_string(
                            s,
                            profile,
                            Some(profile.preferred_string_quote_style),
                            xml_ctx,
                            true,
                        );
                    }
                }
            }

            // JSON/TOML: strings must be quoted even at unquoted sites.
            if !is_quoted && profile.strings_must_be_quoted {
                return emit_string(
                    s,
                    profile,
                    Some(profile.preferred_string_quote_style),
                    xml_ctx,
                    true,
                );
            }

            emit_string(s, profile, occ_quote, xml_ctx, false)
        }
    }
}

fn warn_typed_scalar_lost(
    param: &ParamResolved,
    profile: &Profile,
    is_quoted: bool,
    warnings: &mut Vec<RenderWarning>,
) {
    if is_quoted && profile.kind == ProfileKind::Typed && profile.warn_on_quoted_nonstring {
        warnings.push(RenderWarning {
            param: param.name.clone(),
            message: format!(
                "parameter '{}' is a non-string inside quotes; emitting a string (typed scalar lost)",
                param.name
            ),
        });
    }
}

/// Emit a token that originated as a non-string value. Quoted occurrences
/// and stringly formats treat it as a string; typed formats keep it bare.
fn emit_scalar_like(
    text: &str,
    is_quoted: bool,
    profile: &Profile,
    occ_quote: Option<QuoteStyle>,
    xml_ctx: Option<XmlContext>,
) -> String {
    let is_string = is_quoted || profile.kind == ProfileKind::Stringly;
    if !is_string && profile.kind == ProfileKind::Typed {
        return text.to_string();
    }
    emit_string(text, profile, occ_quote, xml_ctx, false)
}

/// Escape (and possibly wrap) string content for this profile.
///
/// `add_quotes` forces wrapping with the given style even though the
/// occurrence site is unquoted (auto-quote paths).
fn emit_string(
    s: &str,
    profile: &Profile,
    quote: Option<QuoteStyle>,
    xml_ctx: Option<XmlContext>,
    add_quotes: bool,
) -> String {
    // XML: content escaping only; attribute quotes come from the template.
    if let Some(ctx) = xml_ctx {
        return match ctx {
            XmlContext::Attr => escape_xml_attr(s, quote == Some(QuoteStyle::Single)),
            XmlContext::Text => escape_xml_text(s),
        };
    }

    match profile.escape_policy {
        // Properties-like formats: quotes are literal characters.
        EscapePolicy::Properties | EscapePolicy::Dotenv => {
            let content = escape_properties_like(s, &profile.properties_escape_set);
            if add_quotes && profile.strings_must_be_quoted {
                wrap_with_quotes(&content, profile.preferred_string_quote_style)
            } else {
                content
            }
        }
        EscapePolicy::Json => {
            let content = escape_json(s, profile.ensure_ascii);
            if add_quotes {
                wrap_with_quotes(&content, QuoteStyle::Double)
            } else {
                content
            }
        }
        EscapePolicy::Toml => {
            let content = escape_toml_basic(s);
            if add_quotes {
                wrap_with_quotes(&content, profile.preferred_string_quote_style)
            } else {
                content
            }
        }
        EscapePolicy::Yaml => {
            let style = quote.unwrap_or(profile.preferred_string_quote_style);
            let content = match style {
                QuoteStyle::Single => escape_yaml_single(s),
                QuoteStyle::Double => escape_yaml_double(s),
            };
            if add_quotes {
                wrap_with_quotes(&content, style)
            } else {
                content
            }
        }
        EscapePolicy::Xml => s.to_string(),
    }
}

fn wrap_with_quotes(content: &str, style: QuoteStyle) -> String {
    let q = style.ch();
    format!("{q}{content}{q}")
}

fn format_float(value: f64, profile: &Profile) -> String {
    let mut text = format_general(value, profile.float_precision.unwrap_or(6));
    if profile.strip_trailing_zeros
        && !text.contains(['e', 'E'])
        && text.contains('.')
    {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    text
}

/// General (`%g`) float formatting: `precision` significant digits,
/// scientific notation when the decimal exponent is below -4 or at least
/// `precision`, trailing zeros removed, exponent spelled `e+NN`/`e-NN`.
fn format_general(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return value.to_string().to_ascii_lowercase();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let p = precision.max(1);
    let sci = format!("{:.*e}", p - 1, value);
    let (mantissa, exp_str) = sci.split_once('e').expect("e-format output has an exponent");
    let exp: i32 = exp_str.parse().expect("e-format exponent is numeric");

    if exp < -4 || exp >= p as i32 {
        let mantissa = trim_fraction_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        trim_fraction_zeros(&format!("{value:.decimals$}"))
    }
}

fn trim_fraction_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

/// Best-effort local scan deciding whether a placeholder sits in an XML
/// attribute or a text node: nearest `<` vs `>` to the left, then an `=`
/// between the tag start and the opening quote with no intervening `>`.
fn resolve_xml_context(ph: &Placeholder) -> XmlContext {
    let text = ph.source.text();
    let start = ph.span_outer.start;

    let left_lt = text[..start].rfind('<');
    let left_gt = text[..start].rfind('>');
    match (left_lt, left_gt) {
        (Some(lt), gt) if gt.map_or(true, |g| lt > g) => {
            let qpos = ph.quote.map(|q| q.left_index).unwrap_or(start);
            if let Some(eq_rel) = text[lt..qpos].rfind('=') {
                let eq = lt + eq_rel;
                if !text[eq..qpos].contains('>') {
                    return XmlContext::Attr;
                }
            }
            XmlContext::Text
        }
        _ => XmlContext::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::model::ParamName;
    use crate::profile::{clone_profile, get_profile};
    use crate::source::Source;
    use crate::template::Template;
    use std::collections::BTreeMap;

    fn tpt(text: &str, profile: &str) -> Template {
        let src = Source::from_string(text).unwrap();
        Template::from_source(src, get_profile(profile).unwrap()).unwrap()
    }

    fn subs(pairs: &[(&str, ValueLiteral)]) -> SubstitutionMap {
        pairs
            .iter()
            .map(|(k, v)| (ParamName::new(*k).unwrap(), v.clone()))
            .collect::<BTreeMap<_, _>>()
    }

    #[test]
    fn json_typed_scalar_stays_bare() {
        let t = tpt("{\"n\": {{TL n = 1, type: int, domain: [0, 10]}}}", "json");
        let out = render(&t, &subs(&[("n", ValueLiteral::Int(3))])).unwrap();
        assert_eq!(out, "{\"n\": 3}");
    }

    #[test]
    fn json_rejects_wrong_value_type() {
        let t = tpt("{\"n\": {{TL n = 1, type: int, domain: [0, 10]}}}", "json");
        let err = render(&t, &subs(&[("n", ValueLiteral::Str("3".into()))])).unwrap_err();
        assert!(matches!(err, Error::Type { .. }), "{err}");
    }

    #[test]
    fn domain_violation_names_parameter() {
        let t = tpt("{\"n\": {{TL n = 1, type: int, domain: [0, 10]}}}", "json");
        let err = render(&t, &subs(&[("n", ValueLiteral::Int(11))])).unwrap_err();
        assert!(matches!(err, Error::Domain { .. }), "{err}");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let t = tpt("v: {{TL v = 1}}", "yaml");
        let err = render(&t, &subs(&[("w", ValueLiteral::Int(1))])).unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[test]
    fn empty_subs_renders_defaults() {
        let t = tpt("a: {{TL a = 2}} b: {{TL b = \"x\"}}", "yaml");
        let out = render(&t, &SubstitutionMap::new()).unwrap();
        assert_eq!(out, "a: 2 b: x");
    }

    #[test]
    fn yaml_risky_bareword_is_auto_quoted_with_warning() {
        let t = tpt("k: {{TL k = \"yes\"}}\n", "yaml");
        let r = render_report(&t, &SubstitutionMap::new()).unwrap();
        assert_eq!(r.text, "k: \"yes\"\n");
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].message.contains("auto-quoting"));
    }

    #[test]
    fn yaml_safe_string_stays_bare() {
        let t = tpt("k: {{TL k = \"plain\"}}\n", "yaml");
        let r = render_report(&t, &SubstitutionMap::new()).unwrap();
        assert_eq!(r.text, "k: plain\n");
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn json_string_at_unquoted_site_gains_quotes() {
        let t = tpt("{\"s\": {{TL s = \"hi\"}}}", "json");
        let out = render(&t, &SubstitutionMap::new()).unwrap();
        assert_eq!(out, "{\"s\": \"hi\"}");
    }

    #[test]
    fn quoted_site_keeps_template_quotes_and_escapes_content() {
        let t = tpt("{\"s\": \"{{TL s = \"hi\"}}\"}", "json");
        let out = render(&t, &subs(&[("s", ValueLiteral::Str("a\"b".into()))])).unwrap();
        assert_eq!(out, "{\"s\": \"a\\\"b\"}");
    }

    #[test]
    fn quoted_typed_scalar_warns_typed_scalar_lost() {
        let t = tpt("{\"n\": \"{{TL n = 1}}\"}", "json");
        let r = render_report(&t, &subs(&[("n", ValueLiteral::Int(3))])).unwrap();
        assert_eq!(r.text, "{\"n\": \"3\"}");
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].message.contains("typed scalar lost"));
    }

    #[test]
    fn stringly_formats_render_verbatim_quotes() {
        let t = tpt("key = \"{{TL v = \"a\"}}\"\n", "ini");
        let out = render(&t, &subs(&[("v", ValueLiteral::Str("x\ny".into()))])).unwrap();
        assert_eq!(out, "key = \"x\\ny\"\n");
    }

    #[test]
    fn stringly_numbers_render_as_plain_text() {
        let t = tpt("port = {{TL port = 8080}}\n", "dotenv");
        let out = render(&t, &SubstitutionMap::new()).unwrap();
        assert_eq!(out, "port = 8080\n");
    }

    #[test]
    fn bool_uses_profile_spelling() {
        let t = tpt("flag: {{TL flag = true}}\n", "yaml");
        assert_eq!(render(&t, &SubstitutionMap::new()).unwrap(), "flag: true\n");

        clone_profile("yaml_pybools", "yaml", |p| {
            p.bool_true = "True".into();
            p.bool_false = "False".into();
        })
        .unwrap();
        let src = Source::from_string("flag: {{TL flag = true}}\n").unwrap();
        let t = Template::from_source(src, get_profile("yaml_pybools").unwrap()).unwrap();
        assert_eq!(render(&t, &SubstitutionMap::new()).unwrap(), "flag: True\n");
    }

    #[test]
    fn float_general_format_defaults_to_six_significant_digits() {
        let p = get_profile("yaml").unwrap();
        assert_eq!(format_float(3.14159265358979, &p), "3.14159");
        assert_eq!(format_float(100000000.0, &p), "1e+08");
        assert_eq!(format_float(0.000001234, &p), "1.234e-06");
        assert_eq!(format_float(-1234567.0, &p), "-1.23457e+06");
        assert_eq!(format_float(123456.0, &p), "123456");
        assert_eq!(format_float(0.25, &p), "0.25");
        assert_eq!(format_float(1.0, &p), "1");
        assert_eq!(format_float(0.1, &p), "0.1");

        let t = tpt("pi: {{TL pi = 3.14159265358979, type: float}}\n", "yaml");
        assert_eq!(render(&t, &SubstitutionMap::new()).unwrap(), "pi: 3.14159\n");
    }

    #[test]
    fn float_precision_sets_significant_digits() {
        let p = get_profile("yaml").unwrap();
        let mut three = (*p).clone();
        three.float_precision = Some(3);
        assert_eq!(format_float(3.14159265358979, &three), "3.14");
        assert_eq!(format_float(1234.5, &three), "1.23e+03");
        assert_eq!(format_float(0.25, &three), "0.25");
    }

    #[test]
    fn float_formatting_strips_zeros_when_configured() {
        clone_profile("yaml_fixed3", "yaml", |p| {
            p.float_precision = Some(3);
            p.strip_trailing_zeros = true;
        })
        .unwrap();
        let src = Source::from_string("x: {{TL x = 0.25, type: float}}\n").unwrap();
        let t = Template::from_source(src, get_profile("yaml_fixed3").unwrap()).unwrap();
        assert_eq!(render(&t, &SubstitutionMap::new()).unwrap(), "x: 0.25\n");
    }

    #[test]
    fn xml_attribute_site_escapes_attr_content() {
        let t = tpt("<cfg name=\"{{TL name = \"a\"}}\"/>", "xml");
        let out = render(&t, &subs(&[("name", ValueLiteral::Str("a<b\"c".into()))])).unwrap();
        assert_eq!(out, "<cfg name=\"a&lt;b&quot;c\"/>");
    }

    #[test]
    fn xml_text_site_escapes_text_content() {
        let t = tpt("<v>{{TL v = \"a\"}}</v>", "xml");
        let out = render(&t, &subs(&[("v", ValueLiteral::Str("a&b<c".into()))])).unwrap();
        assert_eq!(out, "<v>a&amp;b&lt;c</v>");
    }

    #[test]
    fn rendering_defaults_is_deterministic() {
        let t = tpt("a: {{TL a = 1}} b: {{TL b = \"s\"}}\n", "yaml");
        let one = render(&t, &t.defaults()).unwrap();
        let two = render(&t, &t.defaults()).unwrap();
        assert_eq!(one, two);
    }
}
