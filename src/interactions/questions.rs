//! Question-set machine.
//!
//! `AskUserQuestion` delivers a batch of questions; the machine asks one
//! at a time with numbered reactions, records each answer into the prompt
//! post, and sends a compiled answer message to the child after the last.

use serde::Deserialize;
use tracing::warn;

use crate::emoji::{keycap_glyph, ReactionKind};
use crate::interactions::{Effect, InteractionCtx, PendingInteraction};
use crate::registry::PostRole;
use crate::session::SessionState;
use crate::Result;

/// Maximum options offered per question (reaction vocabulary limit).
pub const MAX_OPTIONS: usize = 4;

/// One answer option.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QuestionOption {
    /// Short label, used in the compiled answer.
    pub label: String,
    /// Longer description shown under the label.
    #[serde(default)]
    pub description: String,
}

/// One question of the set.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Question {
    /// Short topic, e.g. "Color".
    #[serde(default)]
    pub header: String,
    /// The question text.
    #[serde(default, alias = "prompt")]
    pub question: String,
    /// Answer options; rendering caps at [`MAX_OPTIONS`].
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Whether multiple answers were requested. Answered single-choice;
    /// the first selection wins.
    #[serde(default, rename = "multiSelect")]
    pub multi_select: bool,
    /// The chosen label, filled as the set progresses.
    #[serde(skip)]
    pub selected_label: Option<String>,
}

/// Progress of a question set.
#[derive(Debug, Clone)]
pub struct QuestionSetState {
    /// Tool invocation being answered.
    pub tool_use_id: String,
    /// Index of the question currently asked.
    pub current_index: usize,
    /// Post the current question lives in.
    pub current_post_id: String,
    /// All questions with any recorded answers.
    pub questions: Vec<Question>,
}

/// Parse the `AskUserQuestion` input into questions.
#[must_use]
pub fn parse_questions(input: &serde_json::Value) -> Vec<Question> {
    let Some(raw) = input.get("questions") else {
        return Vec::new();
    };
    match serde_json::from_value::<Vec<Question>>(raw.clone()) {
        Ok(questions) => questions
            .into_iter()
            .filter(|q| !q.options.is_empty())
            .collect(),
        Err(err) => {
            warn!(%err, "unparseable question set");
            Vec::new()
        }
    }
}

fn render_question(question: &Question, index: usize, total: usize) -> String {
    let mut body = format!(
        "\u{2753} **{}** ({}/{})\n{}\n\n",
        question.header,
        index + 1,
        total,
        question.question
    );
    for (i, option) in question.options.iter().take(MAX_OPTIONS).enumerate() {
        let n = u8::try_from(i + 1).unwrap_or(u8::MAX);
        body.push_str(&format!("{} {}", keycap_glyph(n), option.label));
        if !option.description.is_empty() {
            body.push_str(&format!(" \u{2014} {}", option.description));
        }
        body.push('\n');
    }
    body
}

fn option_reactions(count: usize) -> Vec<&'static str> {
    ["one", "two", "three", "four"]
        .into_iter()
        .take(count.min(MAX_OPTIONS))
        .collect()
}

/// Entry: post the first question of the set.
///
/// An input with no answerable questions produces no interaction.
pub async fn begin_question_set(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    tool_use_id: &str,
    input: &serde_json::Value,
) -> Result<()> {
    let questions = parse_questions(input);
    let Some(first) = questions.first() else {
        warn!(session = %state.key, "question set with no answerable questions");
        return Ok(());
    };

    let body = render_question(first, 0, questions.len());
    let reactions = option_reactions(first.options.len());
    let post = ctx
        .post_prompt(state, PostRole::Question, &body, &reactions)
        .await?;

    state.pending_interaction = Some(PendingInteraction::QuestionSet(QuestionSetState {
        tool_use_id: tool_use_id.to_owned(),
        current_index: 0,
        current_post_id: post.id,
        questions,
    }));
    Ok(())
}

/// Transition: record an answer, advance or compile.
pub(crate) async fn handle_reaction(
    state: &mut SessionState,
    ctx: &InteractionCtx<'_>,
    mut set: QuestionSetState,
    kind: ReactionKind,
) -> Result<Vec<Effect>> {
    let ReactionKind::Number(n) = kind else {
        return Ok(Vec::new());
    };

    let index = set.current_index;
    let Some(question) = set.questions.get_mut(index) else {
        state.pending_interaction = None;
        return Ok(Vec::new());
    };
    let Some(option) = question.options.get(usize::from(n).saturating_sub(1)) else {
        return Ok(Vec::new());
    };

    let label = option.label.clone();
    question.selected_label = Some(label.clone());
    let header = question.header.clone();
    ctx.resolve_prompt(&set.current_post_id, &format!("\u{2705} {header}: {label}"))
        .await;
    state.touch();

    let next_index = index + 1;
    if let Some(next) = set.questions.get(next_index) {
        let body = render_question(next, next_index, set.questions.len());
        let reactions = option_reactions(next.options.len());
        let post = ctx
            .post_prompt(state, PostRole::Question, &body, &reactions)
            .await?;
        set.current_index = next_index;
        set.current_post_id = post.id;
        state.pending_interaction = Some(PendingInteraction::QuestionSet(set));
        return Ok(Vec::new());
    }

    // Last question answered: compile and send.
    state.pending_interaction = None;
    let mut compiled = String::from("Here are my answers:\n");
    for question in &set.questions {
        if let Some(ref label) = question.selected_label {
            compiled.push_str(&format!("- {}: {label}\n", question.header));
        }
    }
    Ok(vec![Effect::SendToChild(compiled.trim_end().to_owned())])
}
