// tests/dom_extraction.rs
use complaint_miner::acquire::browser::{detect_block, extract_posts, parse_count};
use complaint_miner::acquire::normalize_text;
use complaint_miner::{Classifier, Language};

const FIXTURE: &str = include_str!("fixtures/search_page.html");

#[test]
fn fixture_page_yields_keyed_posts() {
    let posts = extract_posts(FIXTURE);
    assert_eq!(posts.len(), 2, "promoted card without permalink is skipped");

    let zh = &posts[0];
    assert_eq!(zh.source_id, "1899000000000000001");
    assert_eq!(zh.author_id, "techuser88");
    assert_eq!(zh.engagement.replies, 12);
    assert_eq!(zh.engagement.reposts, 1_100);
    assert_eq!(zh.engagement.likes, 4_500);

    let en = &posts[1];
    assert_eq!(en.author_id, "anna_k");
    assert_eq!(en.engagement.replies, 0);
    assert_eq!(en.engagement.likes, 27);
    assert_eq!(
        normalize_text(&en.text),
        "WeChat login is #broken again & support won't answer"
    );
}

#[test]
fn fixture_is_not_a_block_page() {
    assert!(detect_block(FIXTURE).is_none());
}

#[test]
fn scraped_posts_classify() {
    let c = Classifier::with_builtin_lexicon();
    let posts = extract_posts(FIXTURE);
    let zh = c.classify_post(posts[0].clone()).unwrap();
    assert_eq!(zh.language, Language::Zh);
    assert_eq!(zh.difficulty_level, 5);
    assert!(zh.is_complaint());
}

#[test]
fn display_counts() {
    assert_eq!(parse_count(" 12 "), 12);
    assert_eq!(parse_count("4.5K"), 4_500);
    assert_eq!(parse_count("0.5M"), 500_000);
}
