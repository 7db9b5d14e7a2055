use crate::output::print_json;
use pipe_core::classifier;

pub fn run(text: &str, json: bool) -> anyhow::Result<()> {
    let classification = classifier::explain(text);

    if json {
        return print_json(&classification);
    }

    println!(
        "{} (confidence {:.2})",
        classification.kind, classification.confidence
    );
    if !classification.actionable_matches.is_empty() {
        println!(
            "  actionable:    {}",
            classification.actionable_matches.join(", ")
        );
    }
    if !classification.informational_matches.is_empty() {
        println!(
            "  informational: {}",
            classification.informational_matches.join(", ")
        );
    }
    Ok(())
}
