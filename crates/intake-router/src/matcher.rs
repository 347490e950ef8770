//! Intent scoring.
//!
//! Scores normalized evidence against the compiled marker grammar and turns
//! the two best scores into an intent and a confidence.

use intake_core::Intent;

use crate::grammar::{CompiledIntent, MarkerGrammar};

/// What the engine saw in one input, already normalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    /// Normalized text (flattened payload for structured input)
    pub text: String,
    /// Normalized subject line of a communication
    pub subject: Option<String>,
    /// Canonical structured keys
    pub keys: Vec<String>,
    /// Canonical discriminator values
    pub discriminators: Vec<String>,
}

/// Score of one intent, with the markers that contributed
#[derive(Debug, Clone, PartialEq)]
pub struct IntentScore {
    pub intent: Intent,
    pub score: f64,
    pub matched: Vec<String>,
}

/// Decided intent
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub intent: Intent,
    pub confidence: f64,
    /// Scores of every known intent, in grammar order
    pub scores: Vec<IntentScore>,
}

/// Score every intent of the grammar
pub fn score(evidence: &Evidence, grammar: &MarkerGrammar) -> Vec<IntentScore> {
    grammar
        .intents
        .iter()
        .map(|compiled| score_intent(evidence, compiled, grammar))
        .collect()
}

fn score_intent(evidence: &Evidence, compiled: &CompiledIntent, grammar: &MarkerGrammar) -> IntentScore {
    let mut total = 0.0;
    let mut matched = Vec::new();

    for value in &evidence.discriminators {
        if compiled.discriminators.contains(value) {
            total += grammar.discriminator_weight;
            matched.push(format!("discriminator:{}", value));
            break;
        }
    }

    for phrase in &compiled.phrases {
        let in_subject = evidence
            .subject
            .as_deref()
            .map_or(false, |s| phrase.regex.is_match(s));
        if in_subject {
            total += phrase.weight * grammar.subject_multiplier;
            matched.push(format!("subject:{}", phrase.original));
        } else if phrase.regex.is_match(&evidence.text) {
            total += phrase.weight;
            matched.push(format!("phrase:{}", phrase.original));
        }
    }

    for pattern in &compiled.patterns {
        if pattern.regex.is_match(&evidence.text) {
            total += pattern.weight;
            matched.push(format!("pattern:{}", pattern.original));
        }
    }

    for (key, weight) in &compiled.keys {
        if evidence.keys.iter().any(|k| k == key) {
            total += weight;
            matched.push(format!("key:{}", key));
        }
    }

    IntentScore {
        intent: compiled.intent,
        score: total,
        matched,
    }
}

/// Confidence of the top score against the runner-up.
///
/// Saturates with the absolute score and shrinks with a close runner-up.
/// Rounded to four decimals so repeated runs compare equal.
pub fn confidence(top: f64, runner_up: f64, saturation: f64) -> f64 {
    if top <= 0.0 {
        return 0.0;
    }
    let strength = 1.0 - (-top / saturation).exp();
    let margin = top / (top + runner_up.max(0.0));
    ((strength * margin) * 10_000.0).round() / 10_000.0
}

/// Pick the intent. Below `min_confidence`, or on an exact tie for the top
/// score, the intent is UNKNOWN; the computed confidence is kept either way.
pub fn decide(evidence: &Evidence, grammar: &MarkerGrammar, min_confidence: f64) -> Decision {
    let scores = score(evidence, grammar);

    let mut ranked: Vec<&IntentScore> = scores.iter().collect();
    // Stable sort keeps grammar order among equal scores
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let top = ranked.first().map_or(0.0, |s| s.score);
    let runner_up = ranked.get(1).map_or(0.0, |s| s.score);
    let confidence = confidence(top, runner_up, grammar.saturation);

    let tied = top > 0.0 && top == runner_up;
    let intent = match ranked.first() {
        Some(best) if !tied && top > 0.0 && confidence >= min_confidence => best.intent,
        _ => Intent::Unknown,
    };

    Decision {
        intent,
        confidence,
        scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    fn text(raw: &str) -> Evidence {
        Evidence {
            text: normalize(raw),
            ..Default::default()
        }
    }

    #[test]
    fn test_confidence_shape() {
        assert_eq!(confidence(0.0, 0.0, 1.5), 0.0);
        assert!(confidence(6.0, 0.0, 1.5) > 0.95);
        assert!(confidence(2.0, 2.0, 1.5) < 0.5);
        assert!(confidence(4.0, 1.0, 1.5) < confidence(4.0, 0.0, 1.5));
    }

    #[test]
    fn test_discriminator_dominates() {
        let grammar = MarkerGrammar::builtin();
        let evidence = Evidence {
            discriminators: vec!["invoice".into()],
            keys: vec!["vendor".into(), "total".into()],
            ..Default::default()
        };
        let decision = decide(&evidence, &grammar, 0.6);
        assert_eq!(decision.intent, Intent::Invoice);
        assert!(decision.confidence > 0.9);
    }

    #[test]
    fn test_subject_phrases_weigh_more() {
        let grammar = MarkerGrammar::builtin();
        let plain = decide(&text("rfq"), &grammar, 0.6);
        let mut in_subject = text("rfq");
        in_subject.subject = Some("rfq".into());
        let boosted = decide(&in_subject, &grammar, 0.6);
        assert!(boosted.confidence > plain.confidence);
    }

    #[test]
    fn test_no_markers_is_unknown() {
        let grammar = MarkerGrammar::builtin();
        let decision = decide(&text("see you at lunch tomorrow"), &grammar, 0.6);
        assert_eq!(decision.intent, Intent::Unknown);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_exact_tie_is_unknown() {
        let grammar = MarkerGrammar::builtin();
        let evidence = Evidence {
            keys: vec!["invoice_number".into(), "rfq_number".into()],
            ..Default::default()
        };
        let decision = decide(&evidence, &grammar, 0.0);
        assert_eq!(decision.intent, Intent::Unknown);
    }

    #[test]
    fn test_threshold_applies() {
        let grammar = MarkerGrammar::builtin();
        let weak = text("the pricing changed");
        assert_eq!(decide(&weak, &grammar, 0.6).intent, Intent::Unknown);
        assert_eq!(decide(&weak, &grammar, 0.1).intent, Intent::Rfq);
    }
}
