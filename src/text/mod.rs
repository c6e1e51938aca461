use anyhow::Result;
use tracing::warn;
use zhconv::{zhconv, Variant};

/// Converts text between character scripts.
pub trait ScriptNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> Result<String>;
}

/// Traditional → simplified Chinese.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplifiedChineseNormalizer;

impl ScriptNormalizer for SimplifiedChineseNormalizer {
    fn normalize(&self, text: &str) -> Result<String> {
        Ok(zhconv(text, Variant::ZhHans))
    }
}

/// Normalizes `text`, keeping it unchanged when conversion fails.
pub fn normalize_or_original(normalizer: &dyn ScriptNormalizer, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    match normalizer.normalize(text) {
        Ok(converted) => converted,
        Err(e) => {
            warn!("Script normalization failed, keeping original text: {}", e);
            text.to_string()
        }
    }
}

/// Whether a language code names Chinese (`zh`, `zh-cn`, `zh-TW`, ...).
pub fn is_chinese(language: &str) -> bool {
    let language = language.trim().to_ascii_lowercase();
    language == "zh" || language.starts_with("zh-") || language.starts_with("zh_")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenNormalizer;

    impl ScriptNormalizer for BrokenNormalizer {
        fn normalize(&self, text: &str) -> Result<String> {
            Err(anyhow::anyhow!("cannot convert {}", text))
        }
    }

    #[test]
    fn converts_traditional_to_simplified() {
        let normalizer = SimplifiedChineseNormalizer;
        assert_eq!(normalize_or_original(&normalizer, "漢語會議記錄"), "汉语会议记录");
    }

    #[test]
    fn leaves_non_chinese_text_alone() {
        let normalizer = SimplifiedChineseNormalizer;
        assert_eq!(normalize_or_original(&normalizer, "hello world"), "hello world");
    }

    #[test]
    fn failure_keeps_original_text() {
        assert_eq!(normalize_or_original(&BrokenNormalizer, "會議"), "會議");
    }

    #[test]
    fn recognizes_chinese_codes() {
        assert!(is_chinese("zh"));
        assert!(is_chinese("zh-cn"));
        assert!(is_chinese("ZH-TW"));
        assert!(!is_chinese("en"));
        assert!(!is_chinese("zu"));
    }
}
