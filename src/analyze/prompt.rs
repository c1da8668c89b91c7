/// Body text is cut to this many characters before it is sent to a model.
pub const MAX_BODY_CHARS: usize = 4_000;

pub const SYSTEM_PROMPT: &str = "You are a news analyst. Answer with a single JSON object and nothing else.";

/// Build the user prompt asking for the structured analysis fields.
pub fn analysis_prompt(title: &str, body: &str, language: &str) -> String {
    let body: String = body.chars().take(MAX_BODY_CHARS).collect();
    format!(
        "Analyze the following news article.\n\n\
         Title: {title}\n\
         Body: {body}\n\n\
         Return JSON with exactly these fields:\n\
         {{\n  \
           \"summary_local\": \"3-line summary in {language}\",\n  \
           \"summary_en\": \"3-line summary in English\",\n  \
           \"sentiment_label\": \"positive | negative | neutral\",\n  \
           \"sentiment_score\": 0.0,\n  \
           \"topics\": [\"topic\"],\n  \
           \"key_entities\": [\"entity\"],\n  \
           \"business_impact\": \"high | medium | low\"\n\
         }}\n\
         sentiment_score is a number between 0.0 and 1.0."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_field_and_truncates_body() {
        let long = "x".repeat(MAX_BODY_CHARS + 500);
        let p = analysis_prompt("Title", &long, "Japanese");
        for f in [
            "summary_local",
            "summary_en",
            "sentiment_label",
            "sentiment_score",
            "topics",
            "key_entities",
            "business_impact",
        ] {
            assert!(p.contains(f), "missing {f}");
        }
        assert!(p.contains("in Japanese"));
        assert!(!p.contains(&"x".repeat(MAX_BODY_CHARS + 1)));
    }
}
