//! Context Builder: assembles a `ContextState` for a generation request.

use loomquill_core::types::{ContextLimit, ContextState, Fragment, Role};
use loomquill_core::{Error, FragmentId, Result, StoryId};
use loomquill_store::{FragmentStore, StoryStore};

use crate::blocks::builtin_block;
use loomquill_core::types::ContextBlock;

#[derive(Default, Clone)]
pub struct BuildOptions {
    pub prose_before_fragment_id: Option<FragmentId>,
    pub summary_before_fragment_id: Option<FragmentId>,
}

fn token_estimate(content: &str) -> u64 {
    ((content.chars().count() as f64) / 4.0).ceil() as u64
}

/// Build the `ContextState` for one generation request: §4.D of the spec.
pub async fn build_context(
    story_id: &StoryId,
    author_input: &str,
    options: &BuildOptions,
    fragment_store: &FragmentStore,
    story_store: &StoryStore,
) -> Result<ContextState> {
    let mut story = story_store.get(story_id).await.ok_or_else(|| Error::not_found(format!("story {}", story_id)))?;
    if options.summary_before_fragment_id.is_some() {
        // Regenerating/refining a past fragment: the rolling summary reflects
        // events that may postdate it, so omit it rather than leak the future.
        story.summary.clear();
    }

    let summaries = fragment_store.list_summaries(story_id, None, false).await;
    let mut all_fragments = Vec::with_capacity(summaries.len());
    for summary in &summaries {
        if let Some(fragment) = fragment_store.get(story_id, &summary.id).await {
            all_fragments.push(fragment);
        }
    }

    let mut characters: Vec<Fragment> = Vec::new();
    let mut guidelines: Vec<Fragment> = Vec::new();
    let mut knowledge: Vec<Fragment> = Vec::new();
    let mut prose: Vec<Fragment> = Vec::new();
    for fragment in all_fragments {
        match fragment.fragment_type.as_str() {
            "character" => characters.push(fragment),
            "guideline" => guidelines.push(fragment),
            "knowledge" => knowledge.push(fragment),
            "prose" => prose.push(fragment),
            _ => {}
        }
    }

    prose.sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));
    if let Some(before_id) = &options.prose_before_fragment_id {
        if let Some(pos) = prose.iter().position(|f| &f.id == before_id) {
            prose.truncate(pos);
        }
    }

    let prose_fragments = window_prose(&prose, story.settings.context_limit);

    let (sticky_characters, character_shortlist) = split_sticky(characters);
    let (sticky_guidelines, guideline_shortlist) = split_sticky(guidelines);
    let (sticky_knowledge, knowledge_shortlist) = split_sticky(knowledge);

    let system_prompt_fragments: Vec<Fragment> = sticky_characters
        .iter()
        .chain(sticky_guidelines.iter())
        .chain(sticky_knowledge.iter())
        .filter(|f| matches!(f.placement, loomquill_core::types::Placement::System))
        .cloned()
        .collect();

    Ok(ContextState {
        story: Some(story),
        prose_fragments,
        sticky_guidelines,
        sticky_knowledge,
        sticky_characters,
        guideline_shortlist,
        knowledge_shortlist,
        character_shortlist,
        system_prompt_fragments,
        author_input: author_input.to_string(),
    })
}

fn split_sticky(fragments: Vec<Fragment>) -> (Vec<Fragment>, Vec<Fragment>) {
    fragments.into_iter().partition(|f| f.sticky)
}

/// Scan the prose chain from the end backward, including fragments until the
/// budget is exceeded, but always including at least one.
fn window_prose(prose: &[Fragment], limit: ContextLimit) -> Vec<Fragment> {
    if prose.is_empty() {
        return Vec::new();
    }
    let mut included: Vec<&Fragment> = Vec::new();
    let mut budget_used: u64 = 0;

    for fragment in prose.iter().rev() {
        let cost = match limit {
            ContextLimit::Fragments { .. } => 1,
            ContextLimit::Tokens { .. } => token_estimate(&fragment.content),
            ContextLimit::Characters { .. } => fragment.content.chars().count() as u64,
        };
        let max = match limit {
            ContextLimit::Fragments { value } => value,
            ContextLimit::Tokens { value } => value,
            ContextLimit::Characters { value } => value,
        };
        if included.is_empty() {
            included.push(fragment);
            budget_used += cost;
            continue;
        }
        if budget_used + cost > max {
            break;
        }
        included.push(fragment);
        budget_used += cost;
    }

    included.into_iter().rev().cloned().collect()
}

/// Build the builtin block list for a generation request (spec.md §4.H step 2).
pub fn default_blocks(
    context: &ContextState,
    writing_instructions: &str,
    tool_suffix: &str,
) -> Vec<ContextBlock> {
    let mut blocks = Vec::new();
    let mut order = 0i64;

    blocks.push(builtin_block("instructions", Role::System, writing_instructions, order));
    order += 1;
    if !tool_suffix.is_empty() {
        blocks.push(builtin_block("tool-suffix", Role::System, tool_suffix, order));
        order += 1;
    }
    for fragment in &context.system_prompt_fragments {
        blocks.push(builtin_block(&format!("sticky-system-{}", fragment.id), Role::System, &fragment.content, order));
        order += 1;
    }

    let mut user_order = 0i64;
    if let Some(story) = &context.story {
        blocks.push(builtin_block(
            "story-header",
            Role::User,
            format!("# {}\n{}", story.name, story.description),
            user_order,
        ));
        user_order += 1;
        if !story.summary.is_empty() {
            blocks.push(builtin_block("summary", Role::User, format!("## Summary\n{}", story.summary), user_order));
            user_order += 1;
        }
    }

    for fragment in context.sticky_characters.iter().chain(&context.sticky_guidelines).chain(&context.sticky_knowledge) {
        if matches!(fragment.placement, loomquill_core::types::Placement::User) {
            blocks.push(builtin_block(&format!("sticky-user-{}", fragment.id), Role::User, &fragment.content, user_order));
            user_order += 1;
        }
    }

    let shortlist_text = shortlist_block_text(&context.character_shortlist, &context.guideline_shortlist, &context.knowledge_shortlist);
    if !shortlist_text.is_empty() {
        blocks.push(builtin_block("shortlists", Role::User, shortlist_text, user_order));
        user_order += 1;
    }

    if !context.prose_fragments.is_empty() {
        let prose_text = context.prose_fragments.iter().map(|f| f.content.as_str()).collect::<Vec<_>>().join("\n\n");
        blocks.push(builtin_block("prose", Role::User, prose_text, user_order));
        user_order += 1;
    }

    blocks.push(builtin_block("author-input", Role::User, &context.author_input, user_order));

    blocks
}

fn shortlist_block_text(characters: &[Fragment], guidelines: &[Fragment], knowledge: &[Fragment]) -> String {
    let mut lines = Vec::new();
    for f in characters.iter().chain(guidelines).chain(knowledge) {
        lines.push(f.shortlist_entry());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomquill_core::types::Placement;

    fn fragment(order: i64, content: &str) -> Fragment {
        let now = chrono::Utc::now();
        Fragment {
            id: FragmentId::from_raw("pr-aaaaaa"),
            fragment_type: "prose".to_string(),
            name: "p".to_string(),
            description: "d".to_string(),
            content: content.to_string(),
            sticky: false,
            placement: Placement::User,
            archived: false,
            order,
            tags: Vec::new(),
            meta: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            version: 1,
            versions: Vec::new(),
        }
    }

    #[test]
    fn fragments_limit_zero_still_returns_one() {
        let prose = vec![fragment(0, "only one")];
        let windowed = window_prose(&prose, ContextLimit::fragments(0));
        assert_eq!(windowed.len(), 1);
    }

    #[test]
    fn tokens_limit_one_still_returns_one() {
        let prose = vec![fragment(0, "a much longer piece of prose than one token")];
        let windowed = window_prose(&prose, ContextLimit::tokens(1));
        assert_eq!(windowed.len(), 1);
    }

    #[test]
    fn fragments_limit_includes_n_most_recent() {
        let prose = vec![fragment(0, "first"), fragment(1, "second"), fragment(2, "third")];
        let windowed = window_prose(&prose, ContextLimit::fragments(2));
        assert_eq!(windowed.len(), 2);
        assert_eq!(windowed[0].content, "second");
        assert_eq!(windowed[1].content, "third");
    }

    #[tokio::test]
    async fn summary_before_fragment_id_gates_the_rolling_summary() {
        let dir = tempfile::tempdir().unwrap();
        let fragment_store = FragmentStore::new(dir.path());
        let story_store = StoryStore::new(dir.path());
        let story_id = StoryId::new("s1");
        story_store.create(story_id.clone(), "Story", "d").await.unwrap();
        story_store.append_summary(&story_id, "a rolling summary", 8192).await.unwrap();

        let target = fragment_store.create(&story_id, "prose", "P", "d", "c", Placement::User, false).await.unwrap();

        let forward = build_context(&story_id, "continue", &BuildOptions::default(), &fragment_store, &story_store).await.unwrap();
        assert_eq!(forward.story.unwrap().summary, "a rolling summary");

        let gated_options = BuildOptions { prose_before_fragment_id: None, summary_before_fragment_id: Some(target.id) };
        let gated = build_context(&story_id, "continue", &gated_options, &fragment_store, &story_store).await.unwrap();
        assert_eq!(gated.story.unwrap().summary, "");
    }
}
