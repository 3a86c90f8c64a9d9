use thread_relay::emoji::{keycap_glyph, ReactionKind};

#[test]
fn approval_aliases_normalise() {
    assert_eq!(ReactionKind::from_name("+1"), Some(ReactionKind::Approve));
    assert_eq!(ReactionKind::from_name("thumbsup"), Some(ReactionKind::Approve));
    assert_eq!(ReactionKind::from_name("-1"), Some(ReactionKind::Deny));
    assert_eq!(ReactionKind::from_name("thumbsdown"), Some(ReactionKind::Deny));
}

#[test]
fn cancel_and_interrupt_aliases_normalise() {
    for name in ["x", "stop", "octagonal_sign", "stop_sign"] {
        assert_eq!(ReactionKind::from_name(name), Some(ReactionKind::Cancel), "{name}");
    }
    for name in ["pause", "pause_button", "double_vertical_bar"] {
        assert_eq!(ReactionKind::from_name(name), Some(ReactionKind::Interrupt), "{name}");
    }
}

#[test]
fn resume_aliases_normalise() {
    for name in ["arrows_counterclockwise", "arrow_forward", "repeat"] {
        assert_eq!(ReactionKind::from_name(name), Some(ReactionKind::Resume), "{name}");
    }
}

#[test]
fn numbers_parse_in_both_spellings() {
    assert_eq!(ReactionKind::from_name("one"), Some(ReactionKind::Number(1)));
    assert_eq!(ReactionKind::from_name("four"), Some(ReactionKind::Number(4)));
    assert_eq!(
        ReactionKind::from_name("2\u{fe0f}\u{20e3}"),
        Some(ReactionKind::Number(2))
    );
    assert_eq!(ReactionKind::from_name("five"), None);
}

#[test]
fn allow_all_and_toggle_and_bug_normalise() {
    assert_eq!(ReactionKind::from_name("white_check_mark"), Some(ReactionKind::AllowAll));
    assert_eq!(ReactionKind::from_name("heavy_check_mark"), Some(ReactionKind::AllowAll));
    assert_eq!(ReactionKind::from_name("arrow_down_small"), Some(ReactionKind::Toggle));
    assert_eq!(ReactionKind::from_name("bug"), Some(ReactionKind::BugReport));
}

#[test]
fn unknown_emoji_is_none() {
    assert_eq!(ReactionKind::from_name("tada"), None);
}

#[test]
fn seed_names_round_trip_through_normalisation() {
    for kind in [
        ReactionKind::Approve,
        ReactionKind::Deny,
        ReactionKind::AllowAll,
        ReactionKind::Cancel,
        ReactionKind::Interrupt,
        ReactionKind::Resume,
        ReactionKind::Number(3),
        ReactionKind::Toggle,
        ReactionKind::BugReport,
    ] {
        assert_eq!(ReactionKind::from_name(kind.seed_name()), Some(kind));
    }
}

#[test]
fn keycap_glyphs_cover_the_option_range() {
    assert_eq!(keycap_glyph(1), "1\u{fe0f}\u{20e3}");
    assert_eq!(keycap_glyph(4), "4\u{fe0f}\u{20e3}");
}
