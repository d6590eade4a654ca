use crate::plan::reference::Reference;
use crate::shared::serde_ext::parse_via_string;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Placeholder(Reference),
}

/// Text with `{{inputs.x}}` / `{{steps.y.field}}` placeholders. Placeholders are
/// parsed up front so plan building can check every reference they contain.
/// `{{{{` and `}}}}` stand for literal `{{` and `}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = raw;

        loop {
            match (rest.find("{{"), rest.find("}}")) {
                (Some(open), close) if close.map_or(true, |close| open < close) => {
                    text.push_str(&rest[..open]);
                    let after_open = &rest[open + 2..];
                    if let Some(escaped) = after_open.strip_prefix("{{") {
                        text.push_str("{{");
                        rest = escaped;
                        continue;
                    }
                    let Some(close_offset) = after_open.find("}}") else {
                        return Err("unclosed placeholder in template".to_string());
                    };
                    let token = after_open[..close_offset].trim();
                    if token.is_empty() {
                        return Err("empty placeholder in template".to_string());
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Placeholder(Reference::parse(token)?));
                    rest = &after_open[close_offset + 2..];
                }
                (_, Some(close)) => {
                    text.push_str(&rest[..close]);
                    let Some(escaped) = rest[close + 2..].strip_prefix("}}") else {
                        return Err("unmatched `}}` in template".to_string());
                    };
                    text.push_str("}}");
                    rest = escaped;
                }
                _ => {
                    text.push_str(rest);
                    break;
                }
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self {
            source: raw.to_string(),
            segments,
        })
    }

    /// Escapes braces so `text` parses back as a placeholder-free template.
    pub fn escape(text: &str) -> String {
        text.replace("{{", "{{{{").replace("}}", "}}}}")
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(reference) => Some(reference),
            Segment::Text(_) => None,
        })
    }

    /// `Some` when the template has no placeholders at all.
    pub fn literal_text(&self) -> Option<String> {
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(part) => text.push_str(part),
                Segment::Placeholder(_) => return None,
            }
        }
        Some(text)
    }

    /// `Some` when the whole template is exactly one placeholder, in which case
    /// the referenced value can be passed through without flattening it to text.
    pub fn as_single_reference(&self) -> Option<&Reference> {
        match self.segments.as_slice() {
            [Segment::Placeholder(reference)] => Some(reference),
            _ => None,
        }
    }

    pub fn render<E, F>(&self, mut resolve: F) -> Result<String, E>
    where
        F: FnMut(&Reference) -> Result<Value, E>,
    {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Placeholder(reference) => {
                    rendered.push_str(&value_to_text(&resolve(reference)?));
                }
            }
        }
        Ok(rendered)
    }
}

/// Strings render verbatim; everything else renders as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Template {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "template", Self::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_text_and_json_placeholders() {
        let template =
            Template::parse("report_{{inputs.repo}}.md for {{steps.count}}").expect("template");
        assert_eq!(template.references().count(), 2);
        let rendered: Result<String, String> = template.render(|reference| {
            Ok(match reference.to_string().as_str() {
                "inputs.repo" => json!("securityexample"),
                _ => json!({"total": 3}),
            })
        });
        assert_eq!(
            rendered.expect("rendered"),
            r#"report_securityexample.md for {"total":3}"#
        );
    }

    #[test]
    fn single_placeholder_is_detected() {
        let template = Template::parse("{{ steps.get_ticket }}").expect("template");
        assert_eq!(
            template.as_single_reference().map(ToString::to_string),
            Some("steps.get_ticket".to_string())
        );
        let mixed = Template::parse("id {{steps.get_ticket}}").expect("template");
        assert!(mixed.as_single_reference().is_none());
    }

    #[test]
    fn rejects_broken_placeholders() {
        assert!(Template::parse("{{inputs.a").is_err());
        assert!(Template::parse("{{ }}").is_err());
        assert!(Template::parse("{{tone}}").is_err());
        assert!(Template::parse("trailing }}").is_err());
        assert!(Template::parse("a }} {{inputs.x}}").is_err());
        assert!(Template::parse("{{inputs.x}} }} b {{inputs.y}}").is_err());
    }

    #[test]
    fn doubled_braces_are_literal() {
        let template =
            Template::parse("{{{{#each items}}}} {{inputs.name}} }}}}").expect("template");
        assert_eq!(template.references().count(), 1);
        let rendered: Result<String, String> = template.render(|_| Ok(json!("ada")));
        assert_eq!(rendered.expect("rendered"), "{{#each items}} ada }}");

        let raw = "{{{literal}}}";
        let escaped = Template::parse(&Template::escape(raw)).expect("escaped");
        assert_eq!(escaped.literal_text().as_deref(), Some(raw));
    }
}
