//! Pure normalization of scraped text: price strings to numeric values,
//! shade names to base-color categories, and the primary-color ordering rule.
//!
//! Everything here is total: malformed input degrades to `None` or
//! [`BaseColor::Other`], never an error. Keyword and pattern tables are data,
//! so call sites stay untouched when a table grows.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Price-text policy: where to cut installment noise and which patterns to
/// try, in order. Defaults match the price formats both tracked sites emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePolicy {
    /// Case-insensitive markers; text from the earliest match onward is
    /// payment-plan noise and dropped before number extraction.
    #[serde(default = "PricePolicy::default_plan_markers")]
    pub plan_markers: Vec<String>,
    /// Ordered regex patterns, first capture group is the numeral.
    #[serde(default = "PricePolicy::default_patterns")]
    pub patterns: Vec<String>,
}

impl PricePolicy {
    fn default_plan_markers() -> Vec<String> {
        vec![
            " or ".to_string(),
            "installment".to_string(),
            " with ".to_string(),
        ]
    }

    fn default_patterns() -> Vec<String> {
        vec![
            r"\brs\.?\s*([0-9][0-9,]*(?:\.[0-9]+)?)".to_string(),
            r"\blkr\s*([0-9][0-9,]*(?:\.[0-9]+)?)".to_string(),
            r"([0-9][0-9,]*(?:\.[0-9]+)?)\s*rs\b".to_string(),
            r"([0-9][0-9,]*(?:\.[0-9]+)?)".to_string(),
        ]
    }
}

impl Default for PricePolicy {
    fn default() -> Self {
        Self {
            plan_markers: Self::default_plan_markers(),
            patterns: Self::default_patterns(),
        }
    }
}

/// A compiled [`PricePolicy`]. Build once per run, clean many.
#[derive(Debug)]
pub struct PriceCleaner {
    plan_markers: Vec<String>,
    patterns: Vec<Regex>,
}

impl PriceCleaner {
    pub fn new(policy: &PricePolicy) -> Result<Self, regex::Error> {
        let patterns = policy
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            plan_markers: policy
                .plan_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            patterns,
        })
    }

    /// Extract the canonical numeric price, or `None` when no numeral is
    /// recoverable. `None` is distinct from zero.
    pub fn clean(&self, raw: &str) -> Option<f64> {
        // Collapse the newline-and-indent soup the listing markup produces,
        // then work on the lowercased text so markers and patterns share
        // byte offsets.
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = text.to_lowercase();

        let cut = self
            .plan_markers
            .iter()
            .filter_map(|marker| text.find(marker.as_str()))
            .min()
            .unwrap_or(text.len());
        let head = &text[..cut];

        for pattern in &self.patterns {
            let Some(caps) = pattern.captures(head) else {
                continue;
            };
            let Some(numeral) = caps.get(1) else {
                continue;
            };
            if let Ok(value) = numeral.as_str().replace(',', "").parse::<f64>() {
                return Some(value);
            }
        }
        None
    }
}

static DEFAULT_CLEANER: Lazy<PriceCleaner> = Lazy::new(|| {
    PriceCleaner::new(&PricePolicy::default())
        .unwrap_or_else(|e| panic!("built-in price patterns must compile: {e}"))
});

/// Clean a price string with the default policy.
pub fn clean_price(raw: &str) -> Option<f64> {
    DEFAULT_CLEANER.clean(raw)
}

/// The closed set of base-color buckets raw shade names normalize into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseColor {
    Black,
    White,
    Gray,
    Red,
    Blue,
    Green,
    Yellow,
    Orange,
    Purple,
    Pink,
    Brown,
    Multicolor,
    Other,
}

impl BaseColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Black => "Black",
            Self::White => "White",
            Self::Gray => "Gray",
            Self::Red => "Red",
            Self::Blue => "Blue",
            Self::Green => "Green",
            Self::Yellow => "Yellow",
            Self::Orange => "Orange",
            Self::Purple => "Purple",
            Self::Pink => "Pink",
            Self::Brown => "Brown",
            Self::Multicolor => "Multicolor",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for BaseColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword table, one row per bucket. Black stays first: compound shade
/// names like "blue-black" must land on Black, so it is checked before any
/// other bucket gets a chance.
const COLOR_KEYWORDS: &[(BaseColor, &[&str])] = &[
    (
        BaseColor::Black,
        &["black", "ebony", "jet", "onyx", "coal", "raisin", "licorice"],
    ),
    (
        BaseColor::White,
        &["white", "ivory", "cream", "beige", "eggshell", "ghost"],
    ),
    (
        BaseColor::Gray,
        &["gray", "grey", "silver", "ash", "slate", "charcoal", "grullo", "taupe"],
    ),
    (
        BaseColor::Red,
        &["red", "crimson", "scarlet", "ruby", "burgundy", "maroon", "cardinal", "brick"],
    ),
    (
        BaseColor::Blue,
        &["blue", "navy", "azure", "cobalt", "sapphire", "indigo", "cerulean", "prussian", "yinmn"],
    ),
    (
        BaseColor::Green,
        &["green", "olive", "emerald", "jade", "lime", "forest", "mint", "sage"],
    ),
    (
        BaseColor::Yellow,
        &["yellow", "gold", "amber", "lemon", "canary", "mustard", "saffron"],
    ),
    (
        BaseColor::Orange,
        &["orange", "coral", "peach", "tangerine", "apricot", "rust"],
    ),
    (
        BaseColor::Purple,
        &["purple", "violet", "lavender", "plum", "mauve", "lilac", "magenta", "orchid"],
    ),
    (
        BaseColor::Pink,
        &["pink", "rose", "salmon", "fuchsia", "blush"],
    ),
    (
        BaseColor::Brown,
        &["brown", "tan", "khaki", "chocolate", "coffee", "mocha", "umber", "liver", "sepia"],
    ),
    (
        BaseColor::Multicolor,
        &["multicolor", "multicolour", "multi-color", "multi color"],
    ),
];

/// Map a raw shade name onto its base-color bucket. Case-insensitive
/// substring match, first bucket in table order wins, no match is `Other`.
pub fn categorize_color(raw_label: &str) -> BaseColor {
    let label = raw_label.to_lowercase();
    for (color, keywords) in COLOR_KEYWORDS {
        if keywords.iter().any(|kw| label.contains(kw)) {
            return *color;
        }
    }
    BaseColor::Other
}

/// Recover color labels from a product name when the listing exposed no
/// swatches. Returns base-color display names ordered by where each bucket
/// first appears in the name, so "Blue-Black Dress" yields Blue before Black
/// (positional order, unlike the single-label categorization above).
pub fn mine_color_labels(name: &str) -> Vec<String> {
    let haystack = name.to_lowercase();
    let mut hits: Vec<(usize, BaseColor)> = Vec::new();
    for (color, keywords) in COLOR_KEYWORDS {
        if let Some(pos) = keywords.iter().filter_map(|kw| haystack.find(kw)).min() {
            hits.push((pos, *color));
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter()
        .map(|(_, color)| color.as_str().to_string())
        .collect()
}

/// Which listed color is the garment's own.
///
/// Fashion Bug photographs its shirt/blouse/top listings on a model wearing a
/// paired garment, and lists the paired garment's color first; for those
/// categories the second color is the real one. Everyone else lists the
/// garment's color first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryColorRule {
    FirstListed,
    SecondWhenPaired,
}

/// Reorder `labels` so the primary color sits at index 0. Downstream
/// consumers (storage, trend queries) always read the head of the list.
pub fn order_primary_first(mut labels: Vec<String>, rule: PrimaryColorRule) -> Vec<String> {
    if rule == PrimaryColorRule::SecondWhenPaired && labels.len() >= 2 {
        labels.swap(0, 1);
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("Jet Black", BaseColor::Black)]
    #[case("Navy Blue", BaseColor::Blue)]
    #[case("Xyzzy", BaseColor::Other)]
    #[case("blue-black", BaseColor::Black)]
    #[case("Charcoal", BaseColor::Black)] // "coal" is a Black keyword and Black wins ties
    #[case("Rose Gold", BaseColor::Yellow)] // table order: Yellow before Pink
    #[case("Tangerine", BaseColor::Orange)]
    #[case("OLIVE", BaseColor::Green)]
    #[case("Multi-Color", BaseColor::Multicolor)]
    #[case("", BaseColor::Other)]
    fn categorize_color_cases(#[case] raw: &str, #[case] expected: BaseColor) {
        assert_eq!(categorize_color(raw), expected);
    }

    #[test]
    fn categorize_color_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(categorize_color("Jet Black"), BaseColor::Black);
        }
    }

    #[rstest]
    #[case("Rs 2,890.00 / 3 installments of Rs 963", Some(2890.00))]
    #[case("Contact for price", None)]
    #[case(
        "Sale price\nRs 1,850.00\n        \n                 or 3 X Rs 1,072.66 with",
        Some(1850.00)
    )]
    #[case("Rs 2,650.00", Some(2650.00))]
    #[case("LKR 5,000.00", Some(5000.00))]
    #[case("1,234.56 Rs", Some(1234.56))]
    #[case("Sale price Rs 1,234.56", Some(1234.56))]
    #[case("4990", Some(4990.0))]
    #[case("", None)]
    #[case("   \n  ", None)]
    fn clean_price_cases(#[case] raw: &str, #[case] expected: Option<f64>) {
        assert_eq!(clean_price(raw), expected);
    }

    #[test]
    fn clean_price_ignores_installment_amount_even_when_it_comes_first() {
        // A marker cut must drop everything after " or ", so the installment
        // figure can never win even if the head pattern misses.
        let policy = PricePolicy {
            patterns: vec![r"\blkr\s*([0-9][0-9,]*(?:\.[0-9]+)?)".to_string()],
            ..PricePolicy::default()
        };
        let cleaner = PriceCleaner::new(&policy).unwrap();
        assert_eq!(cleaner.clean("Rs 2,890.00 or 3 X LKR 963.33"), None);
    }

    #[test]
    fn price_cleaner_rejects_bad_pattern() {
        let policy = PricePolicy {
            patterns: vec!["(unclosed".to_string()],
            ..PricePolicy::default()
        };
        assert!(PriceCleaner::new(&policy).is_err());
    }

    #[test]
    fn mine_color_labels_orders_by_position() {
        assert_eq!(mine_color_labels("Blue-Black Dress"), vec!["Blue", "Black"]);
        assert_eq!(mine_color_labels("Jet Black Slim Tee"), vec!["Black"]);
        assert_eq!(mine_color_labels("Plain Crew Neck"), Vec::<String>::new());
    }

    #[test]
    fn primary_rule_moves_second_color_to_front() {
        let labels = vec!["White".to_string(), "Navy".to_string(), "Red".to_string()];
        assert_eq!(
            order_primary_first(labels.clone(), PrimaryColorRule::SecondWhenPaired),
            vec!["Navy", "White", "Red"]
        );
        assert_eq!(
            order_primary_first(labels, PrimaryColorRule::FirstListed),
            vec!["White", "Navy", "Red"]
        );
    }

    #[test]
    fn primary_rule_with_single_color_is_a_no_op() {
        let labels = vec!["Black".to_string()];
        assert_eq!(
            order_primary_first(labels, PrimaryColorRule::SecondWhenPaired),
            vec!["Black"]
        );
    }

    proptest! {
        #[test]
        fn clean_price_is_total(raw in "\\PC{0,120}") {
            if let Some(value) = clean_price(&raw) {
                prop_assert!(value.is_finite());
                prop_assert!(value >= 0.0);
            }
        }

        #[test]
        fn categorize_color_is_total(raw in "\\PC{0,60}") {
            let _ = categorize_color(&raw);
        }
    }
}
