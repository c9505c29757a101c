//! Multi-fragment stream responses
//!
//! Each fragment names the region it targets and what to do with it, so a
//! single response can update several parts of a preview.

use pest::Parser;
use pest_derive::Parser;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::PreviewError;

pub const STREAM_MIME: &str = "text/vnd.turbo-stream.html";

#[derive(Parser)]
#[grammar = "preview/stream.pest"]
struct StreamParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentAction {
    Replace,
    Update,
    Append,
    Prepend,
    Remove,
}

impl FragmentAction {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "replace" => Some(FragmentAction::Replace),
            "update" => Some(FragmentAction::Update),
            "append" => Some(FragmentAction::Append),
            "prepend" => Some(FragmentAction::Prepend),
            "remove" => Some(FragmentAction::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub action: FragmentAction,
    pub target: String,
    pub content: String,
}

/// Whether a response content type is the stream format.
pub fn is_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(STREAM_MIME))
        .unwrap_or(false)
}

pub fn parse_stream(body: &str) -> Result<Vec<Fragment>, PreviewError> {
    let mut pairs = StreamParser::parse(Rule::stream, body)
        .map_err(|e| PreviewError::Stream(e.variant.message().to_string()))?;
    let Some(root) = pairs.next() else {
        return Ok(Vec::new());
    };

    let mut fragments = Vec::new();
    for pair in root.into_inner() {
        if pair.as_rule() != Rule::fragment {
            continue;
        }

        let mut attrs: HashMap<String, String> = HashMap::new();
        let mut content = String::new();

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::attribute => {
                    let mut kv = part.into_inner();
                    if let (Some(name), Some(value)) = (kv.next(), kv.next()) {
                        attrs.insert(name.as_str().to_string(), value.as_str().to_string());
                    }
                }
                Rule::content => content = part.as_str().to_string(),
                _ => {}
            }
        }

        let action = attrs
            .get("action")
            .ok_or_else(|| PreviewError::Stream("fragment without action".to_string()))?;
        let action = FragmentAction::parse(action)
            .ok_or_else(|| PreviewError::Stream(format!("unsupported action '{}'", action)))?;
        let target = attrs
            .remove("target")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PreviewError::Stream("fragment without target".to_string()))?;

        fragments.push(Fragment {
            action,
            target,
            content,
        });
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_multiple_fragments() {
        let body = r#"
            <turbo-stream action="replace" target="step-1-title"><template><h2>Ask</h2></template></turbo-stream>
            <turbo-stream action="append" target="step-1-options">
              <template><li>Yes</li></template>
            </turbo-stream>
        "#;

        let fragments = parse_stream(body).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].action, FragmentAction::Replace);
        assert_eq!(fragments[0].target, "step-1-title");
        assert_eq!(fragments[0].content, "<h2>Ask</h2>");
        assert_eq!(fragments[1].action, FragmentAction::Append);
        assert_eq!(fragments[1].content, "<li>Yes</li>");
    }

    #[test]
    fn test_remove_needs_no_template() {
        let fragments =
            parse_stream(r#"<turbo-stream action="remove" target="old"></turbo-stream>"#).unwrap();
        assert_eq!(fragments[0].action, FragmentAction::Remove);
        assert_eq!(fragments[0].content, "");
    }

    #[test]
    fn test_attribute_order_does_not_matter() {
        let fragments = parse_stream(
            r#"<turbo-stream target="t" action="update"><template>x</template></turbo-stream>"#,
        )
        .unwrap();
        assert_eq!(fragments[0].action, FragmentAction::Update);
        assert_eq!(fragments[0].target, "t");
    }

    #[test]
    fn test_rejects_unknown_action_and_missing_target() {
        let unknown = r#"<turbo-stream action="explode" target="t"></turbo-stream>"#;
        assert!(parse_stream(unknown).is_err());
        assert!(parse_stream(r#"<turbo-stream action="replace"></turbo-stream>"#).is_err());
        assert!(parse_stream("<div>not a stream</div>").is_err());
    }

    #[test]
    fn test_empty_body_is_no_fragments() {
        assert!(parse_stream("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_content_type_detection() {
        assert!(is_stream_content_type("text/vnd.turbo-stream.html; charset=utf-8"));
        assert!(!is_stream_content_type("text/html; charset=utf-8"));
    }
}
