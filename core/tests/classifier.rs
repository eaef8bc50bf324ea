//! Priority classifier tests: tier order, case folding, configured keyword sets.

use ticketdesk_core::{
    complaint::Priority,
    priority_classifier::{KeywordSets, PriorityClassifier},
};

/// The urgent tier wins whenever any urgent keyword appears.
#[test]
fn urgent_keyword_classifies_critical() {
    let classifier = PriorityClassifier::default();
    assert_eq!(classifier.classify("Emergency", "water everywhere"), Priority::Critical);
    assert_eq!(classifier.classify("Meter", "needs IMMEDIATE attention"), Priority::Critical);
}

/// High-tier keywords only apply when no urgent keyword matched.
#[test]
fn first_matching_tier_wins() {
    let classifier = PriorityClassifier::default();
    assert_eq!(classifier.classify("Fix ASAP", "please"), Priority::High);
    assert_eq!(
        classifier.classify("Fix asap", "this is urgent"),
        Priority::Critical,
        "urgent must beat high regardless of position"
    );
}

/// No keyword hit means medium; the classifier never produces low.
#[test]
fn no_match_is_medium_never_low() {
    let classifier = PriorityClassifier::default();
    for (title, description) in [("Hello", "just a question"), ("", ""), ("Minor", "cosmetic typo")] {
        let p = classifier.classify(title, description);
        assert_eq!(p, Priority::Medium, "'{title} {description}' classified as {p}");
    }
}

/// Matching is plain substring search, so keywords inside words count.
#[test]
fn substring_matches_count() {
    let classifier = PriorityClassifier::default();
    assert_eq!(classifier.classify("Service", "done quickly please"), Priority::High);
    assert_eq!(classifier.classify("Unimportant", "nothing"), Priority::High);
}

/// With "urgent" removed from the urgent set, "nothing urgent ... asap" lands on high.
#[test]
fn custom_sets_replace_the_defaults() {
    let classifier = PriorityClassifier::new(["emergency"], ["asap"]);
    assert_eq!(
        classifier.classify("Need help soon", "nothing urgent but asap"),
        Priority::High
    );
    // Under the default sets the same text is critical.
    assert_eq!(
        PriorityClassifier::default().classify("Need help soon", "nothing urgent but asap"),
        Priority::Critical
    );
}

/// Blank keywords are dropped instead of matching everything.
#[test]
fn blank_keywords_are_ignored() {
    let sets = KeywordSets {
        urgent: vec!["".into(), "  ".into()],
        high: vec!["Refund".into()],
    };
    let classifier = PriorityClassifier::from_keywords(&sets);
    assert_eq!(classifier.classify("Billing", "wrong amount"), Priority::Medium);
    assert_eq!(classifier.classify("Billing", "want a refund"), Priority::High);
}

/// The shipped keyword file matches the built-in defaults.
#[test]
fn shipped_keyword_file_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../data/classifier/priority_keywords.json");
    let content = std::fs::read_to_string(path).unwrap();
    let sets: KeywordSets = serde_json::from_str(&content).unwrap();
    assert_eq!(sets, KeywordSets::default());
}
