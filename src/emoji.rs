//! Normalised emoji vocabulary.
//!
//! Platforms deliver reactions under differing names (`+1` vs `thumbsup`,
//! Unicode keycaps vs `one`). Everything the router consumes is first
//! normalised into a [`ReactionKind`] here; raw emoji names never leak
//! past this module.

/// Semantic meaning of a reaction on a registered post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    /// Approve the pending decision.
    Approve,
    /// Reject the pending decision.
    Deny,
    /// Approve and suppress future prompts of the same kind.
    AllowAll,
    /// Cancel the session.
    Cancel,
    /// Interrupt the child's current turn without ending the session.
    Interrupt,
    /// Resume a paused session.
    Resume,
    /// Numbered option choice, 1-based, at most 4.
    Number(u8),
    /// Collapse or expand an auxiliary post (task list).
    Toggle,
    /// Open a bug report for the session.
    BugReport,
}

impl ReactionKind {
    /// Normalise a platform emoji name into its semantic kind.
    ///
    /// Returns `None` for emoji outside the recognised vocabulary.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "+1" | "thumbsup" => Some(Self::Approve),
            "-1" | "thumbsdown" => Some(Self::Deny),
            "white_check_mark" | "heavy_check_mark" => Some(Self::AllowAll),
            "x" | "stop" | "octagonal_sign" | "stop_sign" => Some(Self::Cancel),
            "pause" | "pause_button" | "double_vertical_bar" => Some(Self::Interrupt),
            "arrows_counterclockwise" | "arrow_forward" | "repeat" => Some(Self::Resume),
            "small_red_triangle_down" | "arrow_down_small" => Some(Self::Toggle),
            "bug" | "\u{1f41b}" => Some(Self::BugReport),
            other => number_from_name(other).map(Self::Number),
        }
    }

    /// Canonical emoji name used when the bot seeds this reaction itself.
    #[must_use]
    pub fn seed_name(self) -> &'static str {
        match self {
            Self::Approve => "+1",
            Self::Deny => "-1",
            Self::AllowAll => "white_check_mark",
            Self::Cancel => "x",
            Self::Interrupt => "double_vertical_bar",
            Self::Resume => "arrows_counterclockwise",
            Self::Number(n) => number_seed_name(n),
            Self::Toggle => "arrow_down_small",
            Self::BugReport => "bug",
        }
    }
}

/// Parse numbered reactions: short names and Unicode keycap sequences.
fn number_from_name(name: &str) -> Option<u8> {
    match name {
        "one" | "1\u{fe0f}\u{20e3}" => Some(1),
        "two" | "2\u{fe0f}\u{20e3}" => Some(2),
        "three" | "3\u{fe0f}\u{20e3}" => Some(3),
        "four" | "4\u{fe0f}\u{20e3}" => Some(4),
        _ => None,
    }
}

/// Canonical name for a numbered seed reaction. Indices outside 1..=4
/// clamp to the nearest edge; the question machine never asks for more.
fn number_seed_name(n: u8) -> &'static str {
    match n {
        0 | 1 => "one",
        2 => "two",
        3 => "three",
        _ => "four",
    }
}

/// Keycap glyph used when rendering option lists in post bodies.
#[must_use]
pub fn keycap_glyph(n: u8) -> &'static str {
    match n {
        0 | 1 => "1\u{fe0f}\u{20e3}",
        2 => "2\u{fe0f}\u{20e3}",
        3 => "3\u{fe0f}\u{20e3}",
        _ => "4\u{fe0f}\u{20e3}",
    }
}
