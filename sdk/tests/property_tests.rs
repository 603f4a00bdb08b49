use proptest::prelude::*;
use sdk::context::FrozenContext;
use sdk::errors::{EngineError, EngineErrorExt};
use sdk::types::Turn;

proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        // Hints are static strings and never echo the payload back
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Taxonomy(error_str.clone()),
            EngineError::Context(error_str.clone()),
            EngineError::LLMProvider(error_str.clone()),
            EngineError::Persistence(error_str.clone()),
            EngineError::Serialization(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            if error_str.len() > 8 {
                prop_assert!(!hint.contains(error_str.as_str()));
            }
        }
    }
}

proptest! {
    #[test]
    fn test_context_hash_deterministic(
        texts in proptest::collection::vec("\\PC{0,40}", 0..8),
        language in "[a-z]{2}"
    ) {
        let turns: Vec<Turn> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| if i % 2 == 0 { Turn::user(t.clone()) } else { Turn::assistant(t.clone()) })
            .collect();

        let a = FrozenContext::new(turns.clone(), language.clone());
        let b = FrozenContext::new(turns, language);
        prop_assert_eq!(a.content_hash(), b.content_hash());
        prop_assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_context_json_reload_preserves_hash(
        texts in proptest::collection::vec("[a-zA-Z .,!?]{0,40}", 0..6)
    ) {
        let turns: Vec<Turn> = texts.into_iter().map(Turn::user).collect();
        let ctx = FrozenContext::new(turns, "en");
        let json = serde_json::to_string(&ctx).unwrap();
        let back = FrozenContext::from_json(&json).unwrap();
        prop_assert_eq!(ctx.content_hash(), back.content_hash());
    }
}
