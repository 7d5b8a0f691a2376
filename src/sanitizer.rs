//! Text repair strategies applied when the engine returns degenerate output.
//!
//! Every [`RetryLevel`] maps to one deterministic transform of the *original*
//! request text. The only exception is [`RetryLevel::PaddedFallback`], which
//! builds on the output of [`RetryLevel::AggressiveNormalize`].
//!
//! The order in which levels are tried is described separately by an
//! [`EscalationLadder`], so the ladder can be tested and configured
//! independently of the orchestrator.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Texts shorter than this (in characters) tend to produce empty semantic
/// token sequences.
pub const MIN_TEXT_UNITS: usize = 30;

/// Maximum number of normalized characters kept after the filler phrase.
pub const PADDED_TAIL_UNITS: usize = 100;

/// Filler phrase prepended by [`RetryLevel::PaddedFallback`].
pub const FILLER_PHRASE: &str = "这是一段测试语音，用于测试语音合成系统。";

/// Uniform separator used by [`RetryLevel::AggressiveNormalize`].
const UNIFORM_SEPARATOR: char = '，';

/// Punctuation trimmed from the end of text by [`RetryLevel::StripLeadingMarkup`].
const TRAILING_PUNCTUATION: &[char] = &[
    '。', '？', '！', '；', '…', ',', '.', '!', '?', ';', ':', '：', '，',
];

/// Ordered text-repair levels, from least to most aggressive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryLevel {
    /// Input unchanged.
    Raw,
    /// Leading list number and report title removed, trailing punctuation trimmed.
    StripLeadingMarkup,
    /// Line breaks, inline list numbers and punctuation variants flattened;
    /// short results are duplicated.
    AggressiveNormalize,
    /// Filler phrase plus a bounded prefix of the normalized text.
    PaddedFallback,
}

impl RetryLevel {
    /// All levels in escalation order.
    pub const ALL: [RetryLevel; 4] = [
        RetryLevel::Raw,
        RetryLevel::StripLeadingMarkup,
        RetryLevel::AggressiveNormalize,
        RetryLevel::PaddedFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetryLevel::Raw => "raw",
            RetryLevel::StripLeadingMarkup => "strip-leading-markup",
            RetryLevel::AggressiveNormalize => "aggressive-normalize",
            RetryLevel::PaddedFallback => "padded-fallback",
        }
    }
}

impl fmt::Display for RetryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which ladder of levels the orchestrator walks after a failed attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LadderMode {
    /// `Raw → AggressiveNormalize → PaddedFallback` (at most 3 attempts).
    #[default]
    Simple,
    /// All four levels in enum order.
    Full,
}

/// The ordered sequence of levels tried for one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationLadder {
    levels: Vec<RetryLevel>,
}

impl EscalationLadder {
    /// The ladder used by the interactive entry point. It has no
    /// `StripLeadingMarkup` step; that cleanup runs once before the first
    /// attempt when [`crate::Orchestrator::with_preclean`] is enabled.
    pub fn simple() -> Self {
        Self {
            levels: vec![
                RetryLevel::Raw,
                RetryLevel::AggressiveNormalize,
                RetryLevel::PaddedFallback,
            ],
        }
    }

    pub fn full() -> Self {
        Self {
            levels: RetryLevel::ALL.to_vec(),
        }
    }

    /// Build a custom ladder. Levels are sorted and deduplicated so escalation
    /// always moves toward more aggressive rewrites; an empty list falls back
    /// to `[Raw]`.
    pub fn from_levels(levels: impl IntoIterator<Item = RetryLevel>) -> Self {
        let mut levels: Vec<RetryLevel> = levels.into_iter().collect();
        levels.sort_unstable();
        levels.dedup();
        if levels.is_empty() {
            levels.push(RetryLevel::Raw);
        }
        Self { levels }
    }

    pub fn levels(&self) -> &[RetryLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl Default for EscalationLadder {
    fn default() -> Self {
        Self::simple()
    }
}

impl From<LadderMode> for EscalationLadder {
    fn from(mode: LadderMode) -> Self {
        match mode {
            LadderMode::Simple => Self::simple(),
            LadderMode::Full => Self::full(),
        }
    }
}

/// Rewrite `text` according to `level`.
///
/// Pure and deterministic. If a transform would produce an empty (or
/// whitespace-only) string, the original text is returned instead and a
/// warning is logged, so a non-empty input never yields empty output.
pub fn sanitize(text: &str, level: RetryLevel) -> String {
    let rewritten = match level {
        RetryLevel::Raw => return text.to_string(),
        RetryLevel::StripLeadingMarkup => strip_leading_markup(text),
        RetryLevel::AggressiveNormalize => aggressive_normalize(text),
        RetryLevel::PaddedFallback => padded_fallback(text),
    };
    if rewritten.trim().is_empty() {
        log::warn!("Sanitizing at level {level} produced empty text, using original text");
        return text.to_string();
    }
    rewritten
}

/// Number of characters, the unit all length thresholds are expressed in.
pub fn text_units(text: &str) -> usize {
    text.chars().count()
}

fn leading_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[、.．:：]\s*").expect("valid regex"))
}

fn report_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:每日|今日|晨间|晚间).*?(?:简报|资讯|新闻|播报).*?\n").expect("valid regex"))
}

fn inline_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+[、.．]").expect("valid regex"))
}

fn sentence_punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[，。？！；,.!?;]+").expect("valid regex"))
}

fn strip_leading_markup(text: &str) -> String {
    let without_number = leading_number_re().replace(text, "");
    // The title is only removed up through its line break; a title without a
    // following line is left alone.
    let without_title = report_title_re().replace(&without_number, "");
    without_title
        .trim_end_matches(TRAILING_PUNCTUATION)
        .trim()
        .to_string()
}

fn is_edge_punctuation(c: char) -> bool {
    c.is_whitespace() || TRAILING_PUNCTUATION.contains(&c) || matches!(c, '、' | '．')
}

fn aggressive_normalize(text: &str) -> String {
    let flattened = text.replace(['\r', '\n'], " ");
    let unnumbered = inline_number_re().replace_all(&flattened, "");
    let separator = UNIFORM_SEPARATOR.to_string();
    let unified = sentence_punctuation_re().replace_all(&unnumbered, separator.as_str());
    let normalized = unified.trim_matches(is_edge_punctuation);

    let base = if normalized.is_empty() {
        log::warn!("Aggressive normalization emptied the text, using original text");
        text
    } else {
        normalized
    };
    pad_by_duplication(base)
}

fn pad_by_duplication(base: &str) -> String {
    let mut padded = base.to_string();
    if padded.is_empty() {
        return padded;
    }
    while text_units(&padded) < MIN_TEXT_UNITS {
        padded = padded.repeat(2);
    }
    padded
}

fn padded_fallback(text: &str) -> String {
    let normalized = aggressive_normalize(text);
    let tail: String = normalized.chars().take(PADDED_TAIL_UNITS).collect();
    format!("{FILLER_PHRASE}{tail}")
}

#[cfg(test)]
mod tests {
    use super::{
        sanitize, text_units, EscalationLadder, LadderMode, RetryLevel, FILLER_PHRASE,
        MIN_TEXT_UNITS, PADDED_TAIL_UNITS,
    };

    const BRIEFING: &str = "每日资讯简报\n1、女子离婚嫁妆纠纷案：法院判决仅支持部分诉求。\n2、河南高速车祸现场：多车相撞致拥堵！";

    #[test]
    fn raw_is_identity() {
        assert_eq!(sanitize(BRIEFING, RetryLevel::Raw), BRIEFING);
        assert_eq!(sanitize("  spaced  ", RetryLevel::Raw), "  spaced  ");
    }

    #[test]
    fn strips_leading_list_number() {
        assert_eq!(
            sanitize("1、今天天气晴朗。", RetryLevel::StripLeadingMarkup),
            "今天天气晴朗"
        );
        assert_eq!(
            sanitize("12. Hello there!", RetryLevel::StripLeadingMarkup),
            "Hello there"
        );
    }

    #[test]
    fn strips_report_title_through_first_line() {
        let stripped = sanitize(BRIEFING, RetryLevel::StripLeadingMarkup);
        assert!(stripped.starts_with("1、女子离婚"), "got {stripped:?}");
        assert!(stripped.ends_with("多车相撞致拥堵"));
    }

    #[test]
    fn keeps_title_without_line_break() {
        assert_eq!(
            sanitize("今日新闻播报", RetryLevel::StripLeadingMarkup),
            "今日新闻播报"
        );
    }

    #[test]
    fn plain_text_only_loses_trailing_punctuation() {
        assert_eq!(
            sanitize("没有任何标记的文本。！", RetryLevel::StripLeadingMarkup),
            "没有任何标记的文本"
        );
    }

    #[test]
    fn aggressive_flattens_lines_numbers_and_punctuation() {
        let normalized = sanitize(BRIEFING, RetryLevel::AggressiveNormalize);
        assert!(!normalized.contains('\n'));
        assert!(!normalized.contains("1、"));
        assert!(!normalized.contains("2、"));
        assert!(!normalized.contains('。'));
        assert!(!normalized.contains('！'));
        assert!(!normalized.ends_with('，'));
        assert!(normalized.contains("纠纷案：法院判决仅支持部分诉求， 河南"));
    }

    #[test]
    fn aggressive_collapses_punctuation_runs() {
        let normalized = sanitize("第一句话！？第二句话……第三句话。。。", RetryLevel::AggressiveNormalize);
        assert!(!normalized.contains("，，"), "got {normalized:?}");
    }

    #[test]
    fn short_text_is_duplicated_past_threshold() {
        for text in ["短文本", "a", "嗯。", "1、好", "Hello!", "二十九个字以内的一句话而已哦"] {
            let normalized = sanitize(text, RetryLevel::AggressiveNormalize);
            assert!(
                text_units(&normalized) >= MIN_TEXT_UNITS,
                "{text:?} normalized to {normalized:?}"
            );
        }
    }

    #[test]
    fn duplication_repeats_the_normalized_text() {
        let normalized = sanitize("短文本", RetryLevel::AggressiveNormalize);
        assert_eq!(normalized, "短文本".repeat(16));
    }

    #[test]
    fn long_text_is_not_duplicated() {
        let text = "这是一段足够长的文本，它的长度已经超过了三十个字符的最低限制，所以不需要重复";
        let normalized = sanitize(text, RetryLevel::AggressiveNormalize);
        assert_eq!(normalized, text);
    }

    #[test]
    fn padded_fallback_prepends_filler_and_bounds_tail() {
        let long = "字".repeat(250);
        let padded = sanitize(&long, RetryLevel::PaddedFallback);
        assert!(padded.starts_with(FILLER_PHRASE));
        assert_eq!(
            text_units(&padded),
            text_units(FILLER_PHRASE) + PADDED_TAIL_UNITS
        );

        let short = sanitize("短文本", RetryLevel::PaddedFallback);
        assert_eq!(short, format!("{FILLER_PHRASE}{}", "短文本".repeat(16)));
    }

    #[test]
    fn never_empty_for_non_empty_input() {
        let inputs = ["。", "1、", "!!!", "\n\n", "   ", "12.", "，。？", "x"];
        for text in inputs {
            for level in RetryLevel::ALL {
                let out = sanitize(text, level);
                assert!(!out.is_empty(), "{text:?} at {level} became empty");
            }
        }
    }

    #[test]
    fn punctuation_only_falls_back_to_original() {
        assert_eq!(sanitize("1、", RetryLevel::StripLeadingMarkup), "1、");
        let normalized = sanitize("。", RetryLevel::AggressiveNormalize);
        assert!(normalized.chars().all(|c| c == '。'));
        assert!(text_units(&normalized) >= MIN_TEXT_UNITS);
    }

    #[test]
    fn ladders_are_ordered() {
        assert_eq!(
            EscalationLadder::simple().levels(),
            &[
                RetryLevel::Raw,
                RetryLevel::AggressiveNormalize,
                RetryLevel::PaddedFallback
            ]
        );
        assert_eq!(EscalationLadder::full().levels(), &RetryLevel::ALL);
        assert_eq!(EscalationLadder::from(LadderMode::Full).len(), 4);
    }

    #[test]
    fn custom_ladder_is_sorted_and_never_empty() {
        let ladder = EscalationLadder::from_levels([
            RetryLevel::PaddedFallback,
            RetryLevel::Raw,
            RetryLevel::PaddedFallback,
        ]);
        assert_eq!(
            ladder.levels(),
            &[RetryLevel::Raw, RetryLevel::PaddedFallback]
        );
        assert_eq!(EscalationLadder::from_levels(std::iter::empty()).levels(), &[RetryLevel::Raw]);
    }
}
