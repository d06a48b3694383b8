//! Tolerant extraction of the JSON object embedded in model output.

use dossier_core::{AIResponse, Error, Result};

/// The substring from the first `{` to the last `}`, if any.
///
/// Models wrap their JSON in prose or code fences; this keeps whatever
/// object sits in the middle.
pub fn extract_json(text: &str) -> Option<&str> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    (last > first).then(|| &text[first..=last])
}

/// Parse model output into a response. The raw text is not attached.
pub fn parse_ai_response(text: &str) -> Result<AIResponse> {
    if text.trim().is_empty() {
        return Err(Error::Parse("empty response".to_string()));
    }
    let json = extract_json(text)
        .ok_or_else(|| Error::Parse("no JSON object found in response".to_string()))?;
    serde_json::from_str(json).map_err(|e| Error::Parse(format!("json unmarshal: {}", e)))
}

/// Deterministic completeness score used when the model gives none.
///
/// 0.4 for a summary, 0.4 for at least one entity, 0.2 for reasoning.
pub fn assess_confidence(response: &AIResponse) -> f64 {
    let mut score: f64 = 0.0;
    if !response.summary.trim().is_empty() {
        score += 0.4;
    }
    if !response.entities.is_empty() {
        score += 0.4;
    }
    if !response.reasoning.trim().is_empty() {
        score += 0.2;
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::Entities;

    #[test]
    fn test_extract_from_code_fence() {
        let text = "Sure!\n```json\n{\"summary\": \"x\", \"entities\": {}}\n```\nDone.";
        assert_eq!(
            extract_json(text),
            Some("{\"summary\": \"x\", \"entities\": {}}")
        );
    }

    #[test]
    fn test_extract_none_without_object() {
        assert_eq!(extract_json("no braces here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_ai_response("  "), Err(Error::Parse(m)) if m == "empty response"));
        assert!(
            matches!(parse_ai_response("nothing"), Err(Error::Parse(m)) if m.contains("no JSON object"))
        );
        assert!(parse_ai_response("{ not json }").is_err());
    }

    #[test]
    fn test_parse_wrapped_response() {
        let text = r#"Here you go: {"version":"v1","summary":"Updated README","entities":{"people":["Alice"],"projects":["deploy-svc"],"technologies":["Docker"]},"confidence":0.92,"context_update":true,"reasoning":"deploy"} thanks"#;
        let resp = parse_ai_response(text).unwrap();
        assert_eq!(resp.version, "v1");
        assert_eq!(resp.entities.people, vec!["Alice"]);
        assert_eq!(resp.confidence, Some(0.92));
        assert!(resp.context_update);
        assert!(resp.raw.is_empty());
    }

    #[test]
    fn test_assess_confidence() {
        let mut resp = AIResponse::default();
        assert_eq!(assess_confidence(&resp), 0.0);

        resp.summary = "did a thing".to_string();
        assert!((assess_confidence(&resp) - 0.4).abs() < 1e-9);

        resp.entities = Entities {
            technologies: vec!["Rust".to_string()],
            ..Default::default()
        };
        assert!((assess_confidence(&resp) - 0.8).abs() < 1e-9);

        resp.reasoning = "because".to_string();
        assert!((assess_confidence(&resp) - 1.0).abs() < 1e-9);
    }
}
