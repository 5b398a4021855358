//! Prompt templates for extraction, judging and correction.
//!
//! Placeholders are `{name}` tokens substituted in a single pass by
//! [`render`], so substituted text is never re-scanned.

/// Model-guided extraction for items whose category targets a single part.
pub const EXTRACTION_SINGLE_PROMPT: &str = r#"
You are isolating the part of a response that a requirement applies to.

[Instruction given to the model]
{instruction}

[Model response]
{response}

[What to extract]
{directive}

Copy the ONE part of the response described above, verbatim.
Return a JSON list holding exactly one string, for example ["..."].
If the description covers the entire response, return exactly: ALL
Return only the list or ALL, with no other text.
"#;

/// Model-guided extraction for items that may target several parts.
pub const EXTRACTION_MULTI_PROMPT: &str = r#"
You are isolating the parts of a response that a requirement applies to.

[Instruction given to the model]
{instruction}

[Model response]
{response}

[What to extract]
{directive}

Copy EVERY part of the response matching the description above, verbatim,
in the order they appear. Return a JSON list of strings, one element per
part, for example ["first", "second"].
If the description covers the entire response, return exactly: ALL
Return only the list or ALL, with no other text.
"#;

/// Programmatic extraction: the model writes a step pipeline instead of
/// copying text. The response is shown with line breaks removed.
pub const PROGRAM_EXTRACTION_PROMPT: &str = r#"
You are writing an extraction program that isolates {target} of a response.

[Instruction given to the model]
{instruction}

[Model response, line breaks removed]
{response}

[What to extract]
{directive}

A program is a JSON list of steps. It starts from a list holding the raw
response (WITH its original line breaks) and applies each step in order:
  {"op": "lines"}                          split every element into lines
  {"op": "split", "separator": "<text>"}   split every element on a separator
  {"op": "regex", "pattern": "<re>", "group": <n>}
                                           replace elements with all matches of
                                           the pattern (capture group n, default 0)
  {"op": "trim"}                           trim whitespace
  {"op": "drop_empty"}                     remove empty elements
  {"op": "strip_numbering"}                remove leading "1.", "-", "*" markers
  {"op": "take", "count": <n>}             keep the first n elements
  {"op": "skip", "count": <n>}             drop the first n elements

Return only the JSON list of steps.
"#;

/// Semantic judgment of one requirement.
pub const JUDGE_PROMPT: &str = r#"
You are checking whether a response satisfies one requirement.

[Instruction given to the model]
{instruction}

[Response under review]
{response}
{focus}
[Requirement]
{question}

Judge only this requirement. Explain briefly, then finish with a final line
that is exactly one of:
Verdict: YES
Verdict: NO
"#;

/// Correction prompt for items that failed the previous round.
pub const CORRECTION_PROMPT: &str = r#"
[Original Question]
{question}

[Unmet Requirements from Previous Round]
{failures}

[Previous Answer]
{previous_answer}

Your previous answer did not meet the requirements listed above. Write a new
answer to the original question that satisfies all of its requirements,
including the unmet ones. Reply with the new answer only.
"#;

/// Substitute `{name}` placeholders in one pass. Unknown placeholders are
/// left as-is.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template.trim();

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });

        match substituted {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn extraction_prompt(single: bool, instruction: &str, response: &str, directive: &str) -> String {
    let template = if single { EXTRACTION_SINGLE_PROMPT } else { EXTRACTION_MULTI_PROMPT };
    render(
        template,
        &[("instruction", instruction), ("response", response), ("directive", directive)],
    )
}

pub fn program_prompt(single: bool, instruction: &str, response: &str, directive: &str) -> String {
    let flattened = response.replace(['\r', '\n'], "");
    let target = if single { "the single part" } else { "every matching part" };
    render(
        PROGRAM_EXTRACTION_PROMPT,
        &[
            ("target", target),
            ("instruction", instruction),
            ("response", &flattened),
            ("directive", directive),
        ],
    )
}

/// Judge prompt over the full response. When the requirement targets an
/// extracted part, that part is shown in its own section.
pub fn judge_prompt(instruction: &str, response: &str, fragment: Option<&str>, question: &str) -> String {
    let focus = fragment
        .map(|part| format!("\n[Part of the response the requirement applies to]\n{part}\n"))
        .unwrap_or_default();
    render(
        JUDGE_PROMPT,
        &[
            ("instruction", instruction),
            ("response", response),
            ("focus", &focus),
            ("question", question),
        ],
    )
}

/// Build a correction prompt from an item's failing constraints.
pub fn correction_prompt<'a>(
    original_question: &str,
    failures: impl IntoIterator<Item = (&'a str, &'a str)>,
    previous_answer: &str,
) -> String {
    let failures = failures
        .into_iter()
        .map(|(question, explanation)| format!("- {question}\n  Reason: {explanation}"))
        .collect::<Vec<_>>()
        .join("\n");

    render(
        CORRECTION_PROMPT,
        &[
            ("question", original_question),
            ("failures", &failures),
            ("previous_answer", previous_answer),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_pass() {
        let out = render("a {x} b {y}", &[("x", "{y}"), ("y", "2")]);
        assert_eq!(out, "a {y} b 2");
    }

    #[test]
    fn test_render_leaves_unknown_and_json_braces() {
        let out = render(r#"{"op": "lines"} {name}"#, &[("name", "n")]);
        assert_eq!(out, r#"{"op": "lines"} n"#);
    }

    #[test]
    fn test_extraction_template_selection() {
        let single = extraction_prompt(true, "i", "r", "d");
        assert!(single.contains("ONE part"));
        let multi = extraction_prompt(false, "i", "r", "d");
        assert!(multi.contains("EVERY part"));
    }

    #[test]
    fn test_program_prompt_strips_line_breaks() {
        let prompt = program_prompt(false, "inst", "line one\nline two", "the lines");
        assert!(prompt.contains("line oneline two"));
        assert!(prompt.contains(r#"{"op": "lines"}"#));
    }

    #[test]
    fn test_judge_prompt_asks_for_verdict_token() {
        let prompt = judge_prompt("Write a poem", "Roses are red", None, "Is it a poem?");
        assert!(prompt.contains("Is it a poem?"));
        assert!(prompt.contains("Verdict: YES"));
        assert!(prompt.contains("[Response under review]\nRoses are red\n\n[Requirement]"));
        assert!(!prompt.contains("[Part of the response"));
    }

    #[test]
    fn test_judge_prompt_shows_fragment_beside_full_response() {
        let prompt = judge_prompt("Write a titled poem", "Title: Rain\nDrops fall", Some("Title: Rain"), "Is the title short?");
        assert!(prompt.contains("[Response under review]\nTitle: Rain\nDrops fall"));
        assert!(prompt.contains("[Part of the response the requirement applies to]\nTitle: Rain\n"));
    }

    #[test]
    fn test_correction_prompt_sections() {
        let prompt = correction_prompt(
            "List three fruits",
            [("Are three items listed?", "Item count 2, expected [3,3]")],
            "apple, pear",
        );
        assert!(prompt.starts_with("[Original Question]\nList three fruits"));
        assert!(prompt.contains("- Are three items listed?\n  Reason: Item count 2"));
        assert!(prompt.contains("[Previous Answer]\napple, pear"));
    }
}
