// tests/filter_scoring.rs
// Hand-picked scoring scenarios pinning the gate behavior end to end.

use offer_relay::{OfferFilter, ScoreTable};

fn default_filter(include: &[&str], exclude: &[&str], min_score: i32) -> OfferFilter {
    OfferFilter::new(
        include.iter().map(|s| s.to_string()).collect(),
        exclude.iter().map(|s| s.to_string()).collect(),
        min_score,
        ScoreTable::default(),
    )
}

#[test]
fn exclude_keyword_always_wins() {
    let f = default_filter(&["скидка", "акция"], &["розыгрыш", "реклама"], 1);
    let cases = [
        "РОЗЫГРЫШ призов! скидка 90%",
        "реклама: товар за 100 руб",
        "скидка и розыгрыш в одном посте",
    ];
    for text in cases {
        let r = f.evaluate(text);
        assert!(!r.is_interesting, "{text}");
        assert_eq!(r.score, 0, "{text}");
        assert_eq!(r.reasons, vec!["exclude_keyword".to_string()], "{text}");
    }
}

#[test]
fn empty_text_scenario() {
    let f = default_filter(&[], &[], 0);
    let r = f.evaluate("");
    assert!(!r.is_interesting);
    assert_eq!(r.score, 0);
    assert_eq!(r.reasons, vec!["empty_text".to_string()]);
}

#[test]
fn price_and_discount_scenario_from_real_post() {
    let f = default_filter(&[], &[], 2);
    let r = f.evaluate("Товар 990 руб, скидка 30%");
    assert!(r.is_interesting);
    assert_eq!(r.score, 3);
    assert_eq!(
        r.reasons,
        vec!["mid_price:990".to_string(), "discount:30".to_string()]
    );
}

#[test]
fn interesting_tracks_the_threshold_exactly() {
    // score decomposition: include +1, low price +1, discount<=30 +1
    let text = "sale: кроссовки 400 руб, скидка 25%";
    for (min_score, expect) in [(3, true), (4, false)] {
        let f = default_filter(&["sale"], &[], min_score);
        let r = f.evaluate(text);
        assert_eq!(r.score, 3);
        assert_eq!(r.is_interesting, expect, "min_score={min_score}");
    }
}

#[test]
fn score_is_zero_without_any_signal() {
    let f = default_filter(&["ноутбук"], &[], 1);
    let r = f.evaluate("просто пост без цен и ключевых слов");
    assert!(!r.is_interesting);
    assert_eq!(r.score, 0);
    assert!(r.reasons.is_empty());
}

#[test]
fn evaluation_is_deterministic() {
    let f = default_filter(&["скидка"], &[], 1);
    let text = "скидка -45% на всё, от 1200 руб";
    assert_eq!(f.evaluate(text), f.evaluate(text));
}
