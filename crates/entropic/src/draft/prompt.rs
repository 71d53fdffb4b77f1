//! Prompt templates for the draft cycle.
//!
//! Every template opens with a fixed instruction line so that prompts from
//! different stages are distinguishable by prefix.

use super::Draft;
use super::sampling::ContextBundle;
use super::synthesis::Claims;
use crate::store::Passage;
use std::fmt::Write;

pub(crate) const FRAMEWORK_INSTRUCTION: &str =
    "Before anyone answers, lay out a solution framework for the question below.";

pub(crate) const CANDIDATE_INSTRUCTION: &str =
    "Answer the question below. Follow the solution framework and ground the answer in the context provided.";

pub(crate) const SYNTHESIS_INSTRUCTION: &str =
    "Several candidate answers to the same question follow. Produce the single best final answer.";

const FRAMEWORK_SECTIONS: &str = "\
Organize the framework into these five sections:
1. Problem analysis: what is being asked and what a complete answer needs.
2. Key considerations: facts and constraints from the context that matter.
3. Solution steps: the order in which to work through the answer.
4. Potential challenges: ambiguities, gaps or conflicting information.
5. Evaluation criteria: how to judge whether an answer is correct and complete.
Do not answer the question itself.";

fn section(out: &mut String, title: &str, body: &str) {
    let body = body.trim();
    let _ = write!(
        out,
        "\n\n=== {title} ===\n{}",
        if body.is_empty() { "(none)" } else { body }
    );
}

/// Render passages as a numbered list of original texts.
pub fn render_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] {}", i + 1, p.original.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn framework_prompt(query: &str, context: &str, passages: &[Passage]) -> String {
    let mut out = format!("{FRAMEWORK_INSTRUCTION}\n{FRAMEWORK_SECTIONS}");
    section(&mut out, "CONTEXT", context);
    section(&mut out, "RETRIEVED PASSAGES", &render_passages(passages));
    section(&mut out, "QUESTION", query);
    out
}

pub fn candidate_prompt(
    query: &str,
    framework: &str,
    context: &str,
    bundle: &ContextBundle,
) -> String {
    let mut out = CANDIDATE_INSTRUCTION.to_string();
    section(&mut out, "SOLUTION FRAMEWORK", framework);
    section(&mut out, "CONTEXT", context);
    section(
        &mut out,
        &format!("CONTEXT SAMPLE {}", bundle.id),
        &bundle.render(),
    );
    section(&mut out, "QUESTION", query);
    out
}

fn render_drafts(drafts: &[Draft], weights: Option<&[f64]>) -> String {
    drafts
        .iter()
        .enumerate()
        .map(|(i, d)| match weights.and_then(|w| w.get(i)) {
            Some(w) => format!("--- Draft {} (weight {w:.2}) ---\n{}", i + 1, d.text.trim()),
            None => format!("--- Draft {} ---\n{}", i + 1, d.text.trim()),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn hierarchical_prompt(query: &str, framework: &str, drafts: &[Draft]) -> String {
    let mut out = format!(
        "{SYNTHESIS_INSTRUCTION}\nFirst list the sub-topics the drafts share, one per \
         line. Then take each sub-topic in turn and give its consolidated answer, \
         resolving contradictions in favour of the best-supported claims. Finish with \
         one coherent answer that covers every sub-topic and every point the framework \
         asks for."
    );
    section(&mut out, "SOLUTION FRAMEWORK", framework);
    section(&mut out, "DRAFTS", &render_drafts(drafts, None));
    section(&mut out, "QUESTION", query);
    out
}

pub fn weighted_prompt(query: &str, framework: &str, drafts: &[Draft], weights: &[f64]) -> String {
    let mut out = format!(
        "{SYNTHESIS_INSTRUCTION}\nEach draft carries a weight reflecting its relevance to \
         the question. Prefer content from higher-weighted drafts when they disagree."
    );
    section(&mut out, "SOLUTION FRAMEWORK", framework);
    section(&mut out, "DRAFTS", &render_drafts(drafts, Some(weights)));
    section(&mut out, "QUESTION", query);
    out
}

pub fn consensus_prompt(
    query: &str,
    framework: &str,
    drafts: &[Draft],
    claims: &Claims,
) -> String {
    let mut out = format!(
        "{SYNTHESIS_INSTRUCTION}\nState only the agreed claims listed below; add nothing \
         that is not among them. Then add a section headed \"Disagreements:\" that \
         lists every disputed claim, marked as unconfirmed, with the draft it came from. \
         If there are no disputed claims, write \"Disagreements: none\"."
    );
    let agreed = claims
        .agreed
        .iter()
        .map(|claim| format!("- {claim}"))
        .collect::<Vec<_>>()
        .join("\n");
    let disputed = claims
        .disputed
        .iter()
        .map(|(draft, claim)| format!("- (Draft {}) {claim}", draft + 1))
        .collect::<Vec<_>>()
        .join("\n");
    section(&mut out, "SOLUTION FRAMEWORK", framework);
    section(&mut out, "AGREED CLAIMS", &agreed);
    section(&mut out, "DISPUTED CLAIMS", &disputed);
    section(&mut out, "DRAFTS", &render_drafts(drafts, None));
    section(&mut out, "QUESTION", query);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::synthesis::sort_claims;

    fn passage(text: &str) -> Passage {
        Passage {
            id: "it-1".into(),
            original: text.into(),
            summary: text.into(),
            similarity: 0.9,
        }
    }

    #[test]
    fn framework_prompt_names_all_sections() {
        let prompt = framework_prompt("Why?", "prior context", &[passage("a fact")]);
        assert!(prompt.starts_with(FRAMEWORK_INSTRUCTION));
        for heading in [
            "Problem analysis",
            "Key considerations",
            "Solution steps",
            "Potential challenges",
            "Evaluation criteria",
        ] {
            assert!(prompt.contains(heading), "missing {heading}");
        }
        assert!(prompt.contains("[1] a fact"));
        assert!(prompt.ends_with("Why?"));
    }

    #[test]
    fn empty_sections_render_placeholder() {
        let prompt = framework_prompt("q", "", &[]);
        assert!(prompt.contains("=== CONTEXT ===\n(none)"));
    }

    #[test]
    fn candidate_prompt_carries_bundle() {
        let bundle = ContextBundle {
            id: "diversity-2".into(),
            passages: vec![passage("sampled")],
        };
        let prompt = candidate_prompt("q", "framework", "ctx", &bundle);
        assert!(prompt.starts_with(CANDIDATE_INSTRUCTION));
        assert!(prompt.contains("CONTEXT SAMPLE diversity-2"));
        assert!(prompt.contains("sampled"));
    }

    fn draft(id: usize, text: &str) -> Draft {
        Draft {
            id,
            sample_id: format!("s-{id}"),
            text: text.into(),
        }
    }

    fn section_body<'a>(prompt: &'a str, title: &str) -> &'a str {
        let heading = format!("=== {title} ===\n");
        let start = prompt.find(&heading).map_or(prompt.len(), |i| i + heading.len());
        let rest = prompt.get(start..).unwrap_or_default();
        rest.split("\n\n=== ").next().unwrap_or_default()
    }

    #[test]
    fn consensus_prompt_restricts_to_agreed_and_flags_the_rest() {
        let drafts = vec![
            draft(0, "Paris is the capital. It sits on the Seine."),
            draft(1, "Paris is the capital. The Eiffel Tower is there."),
        ];
        let claims = sort_claims(&drafts, 0.5);
        let prompt = consensus_prompt("q", "f", &drafts, &claims);

        assert!(prompt.starts_with(SYNTHESIS_INSTRUCTION));
        assert!(prompt.contains("State only the agreed claims"));
        assert!(prompt.contains("Disagreements:"));
        assert_eq!(section_body(&prompt, "AGREED CLAIMS"), "- Paris is the capital");
        let disputed = section_body(&prompt, "DISPUTED CLAIMS");
        assert!(disputed.contains("- (Draft 1) It sits on the Seine"));
        assert!(disputed.contains("- (Draft 2) The Eiffel Tower is there"));
        assert!(!disputed.contains("Paris is the capital"));
    }

    #[test]
    fn consensus_prompt_without_disputes_says_none() {
        let drafts = vec![draft(0, "Water boils."), draft(1, "Water boils.")];
        let prompt = consensus_prompt("q", "f", &drafts, &sort_claims(&drafts, 0.5));
        assert_eq!(section_body(&prompt, "DISPUTED CLAIMS"), "(none)");
    }

    #[test]
    fn hierarchical_prompt_decomposes_into_sub_topics() {
        let drafts = vec![draft(0, "one"), draft(1, "two")];
        let prompt = hierarchical_prompt("q", "f", &drafts);
        assert!(prompt.contains("list the sub-topics the drafts share"));
        assert!(prompt.contains("each sub-topic in turn"));
        assert!(prompt.contains("--- Draft 2 ---\ntwo"));
    }

    #[test]
    fn weighted_prompt_lists_weights() {
        let drafts = vec![
            Draft {
                id: 0,
                sample_id: "s-0".into(),
                text: "one".into(),
            },
            Draft {
                id: 1,
                sample_id: "s-1".into(),
                text: "two".into(),
            },
        ];
        let prompt = weighted_prompt("q", "f", &drafts, &[0.75, 0.25]);
        assert!(prompt.starts_with(SYNTHESIS_INSTRUCTION));
        assert!(prompt.contains("Draft 1 (weight 0.75)"));
        assert!(prompt.contains("Draft 2 (weight 0.25)"));
    }
}
