// tests/classify_scenarios.rs
use std::sync::Arc;

use complaint_miner::language::detect;
use complaint_miner::{Category, Classifier, Language, Lexicon};

/// Mixed corpus: real-looking complaints, praise, noise and degenerate input.
const CORPUS: &[&str] = &[
    "系统经常崩溃,数据库连接失败",
    "Love the new UI, looks great!",
    "",
    "   ",
    "!!!???",
    "WeChat bug 崩溃",
    "App crashes every time I open settings, not great",
    "希望增加夜间模式，现在的界面太亮了",
    "客服一直不回复，退款申请三天没有处理",
    "battery drain is terrible since the last update",
    "Not bad, not bad at all. Quick fix for the typo would be nice",
    "数据丢失!!! 完全不能用",
    "🙂🙂🙂",
];

#[test]
fn classification_is_deterministic() {
    let c = Classifier::with_builtin_lexicon();
    for text in CORPUS {
        let lang = detect(text);
        assert_eq!(c.classify(text, lang).unwrap(), c.classify(text, lang).unwrap());
    }
}

#[test]
fn outputs_stay_in_bounds() {
    let c = Classifier::with_builtin_lexicon();
    for text in CORPUS {
        for lang in [Language::En, Language::Zh] {
            let out = c.classify(text, lang).unwrap();
            assert!((1..=5).contains(&out.difficulty_level), "{text:?}");
            assert!((-1.0..=1.0).contains(&out.sentiment_score), "{text:?}");
            assert!(out.keywords.len() <= 10);
        }
    }
}

#[test]
fn zh_database_crash_scenario() {
    let c = Classifier::with_builtin_lexicon();
    let text = "系统经常崩溃,数据库连接失败";
    assert_eq!(detect(text), Language::Zh);
    let out = c.classify(text, Language::Zh).unwrap();
    assert_eq!(out.category, Category::Technical);
    assert_eq!(out.difficulty_level, 5);
    assert!(out.sentiment_score < 0.0);
    assert!(out.keywords.contains(&"数据库".to_string()));
}

#[test]
fn en_praise_scenario() {
    let c = Classifier::with_builtin_lexicon();
    let text = "Love the new UI, looks great!";
    assert_eq!(detect(text), Language::En);
    let out = c.classify(text, Language::En).unwrap();
    assert!(out.sentiment_score > 0.0);
    assert_eq!(out.category, Category::Usability);
    assert!(out.difficulty_level <= 2);
}

#[test]
fn no_signal_means_neutral_default() {
    let c = Classifier::with_builtin_lexicon();
    let out = c.classify("the quick brown fox", Language::En).unwrap();
    assert_eq!(out.difficulty_level, 2);
    assert_eq!(out.sentiment_score, 0.0);
    assert_eq!(out.category, Category::Other);
}

#[test]
fn custom_lexicon_changes_outcome() {
    let lx = Lexicon::from_toml_str(
        r#"
[category.service]
en = ["waiting"]

[difficulty.4]
en = ["waiting"]

[sentiment.negative]
en = ["waiting"]
"#,
    )
    .unwrap();
    let c = Classifier::new(Arc::new(lx));
    let out = c.classify("still waiting for an answer", Language::En).unwrap();
    assert_eq!(out.category, Category::Service);
    assert_eq!(out.difficulty_level, 4);
    assert_eq!(out.sentiment_score, -1.0);
    assert_eq!(out.keywords, vec!["waiting".to_string()]);
}
