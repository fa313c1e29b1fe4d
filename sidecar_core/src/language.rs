//! Closed language enumeration shared by every translation engine.
//!
//! Grounded on `NllbEngine.LANGUAGE_MAPPING`: a fixed ISO 639-1 -> model
//! BCP-47 table built once and never mutated. Decode filters (the set of
//! token ids a generation step may legally end on) are always *derived*
//! from this table, never hard-coded elsewhere, per the "language-tag
//! filter derived, not hard-coded" requirement.

use std::collections::HashMap;

use crate::errors::EngineError;

/// Maps client-facing ISO 639-1 (or BCP-47-with-region, e.g. `zh-tw`)
/// codes to the model's internal language tag.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    mapping: HashMap<String, String>,
}

impl LanguageRegistry {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self { mapping }
    }

    /// The NLLB-200 mapping table, carried over unchanged from the
    /// original engine so client-visible language codes don't regress.
    pub fn nllb200() -> Self {
        let pairs: &[(&str, &str)] = &[
            ("en", "eng_Latn"),
            ("ja", "jpn_Jpan"),
            ("zh", "zho_Hans"),
            ("zh-cn", "zho_Hans"),
            ("zh-tw", "zho_Hant"),
            ("ko", "kor_Hang"),
            ("es", "spa_Latn"),
            ("fr", "fra_Latn"),
            ("de", "deu_Latn"),
            ("ru", "rus_Cyrl"),
            ("ar", "arb_Arab"),
        ];
        Self::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Resolve a client-facing code to the model-internal tag.
    pub fn resolve(&self, lang_code: &str) -> Result<&str, EngineError> {
        if lang_code.is_empty() {
            return Err(EngineError::UnsupportedLanguage(lang_code.to_string()));
        }
        let normalized = lang_code.to_ascii_lowercase();
        self.mapping
            .get(&normalized)
            .map(String::as_str)
            .ok_or_else(|| EngineError::UnsupportedLanguage(lang_code.to_string()))
    }

    /// The closed set of client-facing codes this engine accepts.
    pub fn supported_languages(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.mapping.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// The closed set of model-internal tags, used to derive the
    /// generation decode filter (forced-BOS candidates) instead of a
    /// hard-coded list.
    pub fn model_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.mapping.values().map(String::as_str).collect();
        tags.sort_unstable();
        tags.dedup();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_codes_case_insensitively() {
        let registry = LanguageRegistry::nllb200();
        assert_eq!(registry.resolve("EN").unwrap(), "eng_Latn");
        assert_eq!(registry.resolve("ja").unwrap(), "jpn_Jpan");
    }

    #[test]
    fn rejects_unknown_codes() {
        let registry = LanguageRegistry::nllb200();
        assert!(matches!(
            registry.resolve("xx"),
            Err(EngineError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn supported_languages_is_closed_and_sorted() {
        let registry = LanguageRegistry::nllb200();
        let langs = registry.supported_languages();
        assert_eq!(langs.len(), 11);
        assert!(langs.windows(2).all(|w| w[0] <= w[1]));
    }
}
