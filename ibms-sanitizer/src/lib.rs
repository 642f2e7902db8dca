//! Cleans model output before it reaches the officer.
//!
//! Reasoning models wrap their scratch work in `<think>` … `</think>`, echo an
//! `A:` answer label, and sometimes close with a canned "Okay, I'm done"
//! line. [`sanitize`] removes all of that. It is called on the accumulated
//! text after every streamed fragment, so it tolerates an unterminated
//! reasoning block and a marker cut off at the end of the text.

use std::sync::OnceLock;

use regex::Regex;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

fn closed_think_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid regex"))
}

// Any `<think>` left after closed blocks are removed has no closing marker.
fn open_think_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*$").expect("valid regex"))
}

fn answer_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:A:\s*)+").expect("valid regex"))
}

fn closing_filler_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:^|\n)[ \t]*(?:Okay,[^\n]*?(?:done|ready|complete|wrap it up|finalize|all set)[.\s]*)+$",
        )
        .expect("valid regex")
    })
}

/// Drop a trailing fragment that could still grow into `<think>`.
fn strip_partial_marker(text: &str) -> &str {
    for len in (1..THINK_OPEN.len()).rev() {
        if text.ends_with(&THINK_OPEN[..len]) {
            return &text[..text.len() - len];
        }
    }
    text
}

fn sanitize_once(text: &str) -> String {
    let text = closed_think_regex().replace_all(text, "");
    let text = open_think_regex().replace(&text, "");
    let text = strip_partial_marker(&text).trim();
    let text = answer_label_regex().replace(text, "");
    let text = closing_filler_regex().replace(&text, "");
    text.trim().to_string()
}

/// Visible text of a (possibly partial) model response.
///
/// Idempotent: passes are repeated until the text stops changing, so
/// `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(text: &str) -> String {
    let mut current = sanitize_once(text);
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[&str] = &[
        "",
        "   ",
        "Plain answer.",
        "<think>plan</think>\n\nThere are 42 travelers.",
        "<think>a</think>x<think>b</think>y",
        "Intro <think>still reasoning",
        "Intro <thi",
        "A: A:\nThe count is 5.",
        "  A: padded label",
        "There are 3 alerts.\nOkay, I think that's all. Let me wrap it up.",
        "Result: 7.\nOkay, done. Okay, ready.",
        "x <th Okay, done.",
        "<thi<think>a</think>nk>b</think> tail",
        "Okay, done.",
        "Okay, the count is 5.",
    ];

    #[test]
    fn idempotent_over_corpus() {
        for input in CORPUS {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn removes_closed_reasoning_blocks() {
        assert_eq!(
            sanitize("<think>plan</think>\n\nThere are 42 travelers."),
            "There are 42 travelers."
        );
        assert_eq!(sanitize("<think>a</think>x<think>b</think>y"), "xy");
    }

    #[test]
    fn strips_unterminated_reasoning_to_end() {
        assert_eq!(sanitize("Intro <think>still reasoning"), "Intro");
        assert_eq!(sanitize("<think>only thoughts"), "");
    }

    #[test]
    fn strips_truncated_marker_at_end() {
        assert_eq!(sanitize("Intro <thi"), "Intro");
        assert_eq!(sanitize("Intro <"), "Intro");
        assert_eq!(sanitize("a < b"), "a < b");
    }

    #[test]
    fn no_prefix_leaks_reasoning() {
        let full = "Hello <think>secret plan</think>The answer is 4.";
        for end in 0..=full.len() {
            if !full.is_char_boundary(end) {
                continue;
            }
            let shown = sanitize(&full[..end]);
            assert!(!shown.contains("secret"), "prefix {end}: {shown:?}");
            assert!(!shown.contains('<'), "prefix {end}: {shown:?}");
        }
        assert_eq!(sanitize(full), "Hello The answer is 4.");
    }

    #[test]
    fn strips_answer_labels() {
        assert_eq!(sanitize("A: A:\nThe count is 5."), "The count is 5.");
        assert_eq!(sanitize("  A: padded label"), "padded label");
    }

    #[test]
    fn strips_trailing_filler() {
        assert_eq!(
            sanitize("There are 3 alerts.\nOkay, I think that's all. Let me wrap it up."),
            "There are 3 alerts."
        );
        assert_eq!(sanitize("Result: 7.\nOkay, done. Okay, ready."), "Result: 7.");
    }

    #[test]
    fn keeps_filler_words_mid_text() {
        let text = "Okay, the review is complete for Lahore.\nFurther checks pending.";
        assert_eq!(sanitize(text), text);
    }
}
