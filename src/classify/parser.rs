//! Extraction of label arrays from free-form model output.
//!
//! Models are asked for a bare JSON array but sometimes wrap it in prose or a
//! code fence. The whole text is tried first, then every balanced `[...]`
//! span in order of appearance.

use thiserror::Error;

use crate::records::{InputTextSet, LabeledItem, LabeledResult};

const PREVIEW_CHARS: usize = 200;

/// How a label array failed to line up with the inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Mismatch {
    #[error("expected {expected} labels, one per input text, but received {actual}")]
    Length { expected: usize, actual: usize },

    #[error("label {} is for {actual:?} but input text {} is {expected:?}", .index + 1, .index + 1)]
    Text {
        index: usize,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("The model response could not be parsed as a JSON label array")]
    Unparsable { preview: String },

    #[error("The model response does not match the input texts: {0}")]
    Mismatch(Mismatch),
}

/// Parse labels from raw model output without checking them against inputs.
pub fn parse_labels(response: &str) -> Result<Vec<LabeledItem>, ResponseError> {
    if let Ok(items) = serde_json::from_str::<Vec<LabeledItem>>(response.trim()) {
        return Ok(items);
    }

    for candidate in balanced_arrays(response) {
        if let Ok(items) = serde_json::from_str::<Vec<LabeledItem>>(candidate) {
            tracing::debug!(
                "Recovered {} labels from a {}-char span of a {}-char response",
                items.len(),
                candidate.len(),
                response.len()
            );
            return Ok(items);
        }
    }

    Err(ResponseError::Unparsable {
        preview: response.chars().take(PREVIEW_CHARS).collect(),
    })
}

/// Check that labels map one-to-one onto the inputs, in order.
///
/// Texts are compared after trimming; the result carries the input's own text.
pub fn validate_mapping(
    items: Vec<LabeledItem>,
    inputs: &InputTextSet,
) -> Result<LabeledResult, ResponseError> {
    if items.len() != inputs.len() {
        return Err(ResponseError::Mismatch(Mismatch::Length {
            expected: inputs.len(),
            actual: items.len(),
        }));
    }

    let mut labeled = Vec::with_capacity(items.len());
    for (index, (item, input)) in items.into_iter().zip(inputs.texts()).enumerate() {
        if item.text.trim() != input.trim() {
            return Err(ResponseError::Mismatch(Mismatch::Text {
                index,
                expected: input.clone(),
                actual: item.text,
            }));
        }
        labeled.push(LabeledItem::new(input.clone(), item.category.trim()));
    }

    Ok(LabeledResult::new(labeled))
}

/// Parse and validate in one step.
pub fn parse_response(
    response: &str,
    inputs: &InputTextSet,
) -> Result<LabeledResult, ResponseError> {
    validate_mapping(parse_labels(response)?, inputs)
}

/// Every balanced `[...]` span, by start position. Brackets inside JSON
/// string literals are ignored.
fn balanced_arrays(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|(_, c)| *c == '[')
        .filter_map(move |(start, _)| {
            balanced_len(&text[start..]).map(|len| &text[start..start + len])
        })
}

/// Length of the balanced span opening at the start of `s`.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_A: &str = r#"[{"text":"Great service!","category":"Positive"},{"text":"Where is my order?","category":"Question"}]"#;

    fn inputs(texts: &[&str]) -> InputTextSet {
        InputTextSet::new(texts.iter().map(|t| t.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_whole_text_parse() {
        let result = parse_response(SCENARIO_A, &inputs(&["Great service!", "Where is my order?"]))
            .unwrap();
        assert_eq!(
            result.items(),
            [
                LabeledItem::new("Great service!", "Positive"),
                LabeledItem::new("Where is my order?", "Question"),
            ]
        );
    }

    #[test]
    fn test_array_embedded_in_prose() {
        let response = format!("Here is the result: {} Let me know if you need more.", SCENARIO_A);
        let result =
            parse_response(&response, &inputs(&["Great service!", "Where is my order?"])).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.items()[1].category, "Question");
    }

    #[test]
    fn test_code_fence_and_leading_brackets() {
        let response = format!(
            "Sure [as requested]:\n```json\n{}\n```",
            r#"[{"text": "a [draft] note", "category": "Other"}]"#
        );
        let labels = parse_labels(&response).unwrap();
        assert_eq!(labels, vec![LabeledItem::new("a [draft] note", "Other")]);
    }

    #[test]
    fn test_brackets_inside_strings() {
        let response = r#"Result: [{"text": "odd ] text \" with [ stuff", "category": "X"}] done"#;
        let labels = parse_labels(response).unwrap();
        assert_eq!(labels[0].text, "odd ] text \" with [ stuff");
    }

    #[test]
    fn test_unparsable() {
        for response in ["I could not classify these.", "[not json]", "[{\"text\": 1}", ""] {
            assert!(
                matches!(parse_labels(response), Err(ResponseError::Unparsable { .. })),
                "response {:?}",
                response
            );
        }
    }

    #[test]
    fn test_length_mismatch() {
        let err = parse_response(SCENARIO_A, &inputs(&["Great service!"])).unwrap_err();
        assert_eq!(
            err,
            ResponseError::Mismatch(Mismatch::Length {
                expected: 1,
                actual: 2
            })
        );
        assert!(err
            .to_string()
            .ends_with("expected 1 labels, one per input text, but received 2"));
    }

    #[test]
    fn test_text_mismatch() {
        let err = parse_response(SCENARIO_A, &inputs(&["Where is my order?", "Great service!"]))
            .unwrap_err();
        assert!(matches!(
            err,
            ResponseError::Mismatch(Mismatch::Text { index: 0, .. })
        ));
        assert_eq!(
            err.to_string(),
            "The model response does not match the input texts: label 1 is for \"Great service!\" but input text 1 is \"Where is my order?\""
        );
    }

    #[test]
    fn test_single_input_single_label() {
        let result = parse_response(
            r#"[{"text": " Hello ", "category": " Greeting "}]"#,
            &inputs(&["Hello"]),
        )
        .unwrap();
        assert_eq!(result.items(), [LabeledItem::new("Hello", "Greeting")]);
    }
}
