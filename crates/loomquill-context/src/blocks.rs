//! Block Engine: merges default block producers with user-defined custom
//! blocks (simple or sandboxed-script), then applies overrides and ordering.

use loomquill_core::types::{
    ContentMode, ContextBlock, CustomBlockDefinition, CustomBlockType, Fragment, Role, Story,
};
use loomquill_core::{FragmentId, StoryId};
use loomquill_store::FragmentStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use loomquill_core::types::BlockConfig;

/// The capability object exposed to script blocks.
#[derive(Clone)]
pub struct ScriptContext {
    pub story: Option<Story>,
    pub prose_fragments: Vec<Fragment>,
    pub sticky_guidelines: Vec<Fragment>,
    pub sticky_knowledge: Vec<Fragment>,
    pub sticky_characters: Vec<Fragment>,
    pub guideline_shortlist: Vec<Fragment>,
    pub knowledge_shortlist: Vec<Fragment>,
    pub character_shortlist: Vec<Fragment>,
    pub new_prose: Option<String>,
    pub fragment_store: Arc<FragmentStore>,
    pub story_id: StoryId,
}

const SCRIPT_TIMEOUT: Duration = Duration::from_millis(2000);
const SCRIPT_MAX_OPERATIONS: u64 = 200_000;
const SCRIPT_MAX_EXPR_DEPTH: usize = 64;

enum ScriptOutcome {
    Text(String),
    Empty,
    Error(String),
}

fn fragments_to_array(fragments: &[Fragment]) -> rhai::Array {
    fragments
        .iter()
        .map(|f| {
            let mut map = rhai::Map::new();
            map.insert("id".into(), f.id.to_string().into());
            map.insert("name".into(), f.name.clone().into());
            map.insert("description".into(), f.description.clone().into());
            map.insert("content".into(), f.content.clone().into());
            map.into()
        })
        .collect()
}

fn build_scope_map(ctx: &ScriptContext) -> rhai::Map {
    let mut map = rhai::Map::new();
    if let Some(story) = &ctx.story {
        let mut story_map = rhai::Map::new();
        story_map.insert("id".into(), story.id.to_string().into());
        story_map.insert("name".into(), story.name.clone().into());
        story_map.insert("description".into(), story.description.clone().into());
        story_map.insert("summary".into(), story.summary.clone().into());
        map.insert("story".into(), story_map.into());
    }
    map.insert("prose_fragments".into(), fragments_to_array(&ctx.prose_fragments).into());
    map.insert("sticky_guidelines".into(), fragments_to_array(&ctx.sticky_guidelines).into());
    map.insert("sticky_knowledge".into(), fragments_to_array(&ctx.sticky_knowledge).into());
    map.insert("sticky_characters".into(), fragments_to_array(&ctx.sticky_characters).into());
    map.insert("guideline_shortlist".into(), fragments_to_array(&ctx.guideline_shortlist).into());
    map.insert("knowledge_shortlist".into(), fragments_to_array(&ctx.knowledge_shortlist).into());
    map.insert("character_shortlist".into(), fragments_to_array(&ctx.character_shortlist).into());
    if let Some(new_prose) = &ctx.new_prose {
        map.insert("new_prose".into(), new_prose.clone().into());
    }
    map
}

/// Evaluate a script block body in a fresh, budgeted Rhai engine. The body is
/// wrapped as a function so a bare expression or a `return` both work, and
/// `ctx.get_fragment(id)` is bridged to the async store via a blocking call
/// on the dedicated blocking thread this runs on.
async fn evaluate_script(name: &str, content: &str, ctx: &ScriptContext) -> ScriptOutcome {
    let content = content.to_string();
    let scope_map = build_scope_map(ctx);
    let store = ctx.fragment_store.clone();
    let story_id = ctx.story_id.clone();
    let handle = tokio::runtime::Handle::current();

    let join = tokio::task::spawn_blocking(move || {
        let mut engine = rhai::Engine::new();
        engine.set_max_operations(SCRIPT_MAX_OPERATIONS);
        engine.set_max_expr_depth(SCRIPT_MAX_EXPR_DEPTH);
        engine.set_max_string_size(1_000_000);
        engine.set_max_array_size(10_000);
        engine.disable_symbol("eval");

        engine.register_fn("get_fragment", move |id: &str| -> rhai::Dynamic {
            let fragment = handle.block_on(store.get(&story_id, &FragmentId::from_raw(id)));
            match fragment {
                Some(f) => f.content.into(),
                None => rhai::Dynamic::UNIT,
            }
        });

        let mut scope = rhai::Scope::new();
        scope.push("ctx", scope_map);
        let wrapped = format!("fn __block(ctx) {{\n{}\n}}\n__block(ctx)", content);
        engine.eval_with_scope::<rhai::Dynamic>(&mut scope, &wrapped)
    });

    let _ = name;
    match tokio::time::timeout(SCRIPT_TIMEOUT, join).await {
        Err(_) => ScriptOutcome::Error("script timed out".to_string()),
        Ok(Err(join_err)) => ScriptOutcome::Error(format!("script panicked: {}", join_err)),
        Ok(Ok(Err(eval_err))) => ScriptOutcome::Error(describe_rhai_error(&eval_err)),
        Ok(Ok(Ok(value))) => {
            if value.is_unit() {
                ScriptOutcome::Error("script must return a string".to_string())
            } else if value.is_string() {
                let text = value.into_string().unwrap_or_default();
                if text.is_empty() {
                    ScriptOutcome::Empty
                } else {
                    ScriptOutcome::Text(text)
                }
            } else {
                ScriptOutcome::Error("script must return a string".to_string())
            }
        }
    }
}

fn describe_rhai_error(err: &rhai::EvalAltResult) -> String {
    match err {
        rhai::EvalAltResult::ErrorRuntime(value, _) => value.clone().into_string().unwrap_or_else(|_| value.to_string()),
        other => other.to_string(),
    }
}

/// Apply a story's `BlockConfig` to a list of default (builtin) blocks,
/// producing the final ordered block list per spec §4.C.
pub async fn apply_block_config(
    default_blocks: Vec<ContextBlock>,
    config: &BlockConfig,
    script_ctx: &ScriptContext,
) -> Vec<ContextBlock> {
    let mut blocks = default_blocks;

    for cb in &config.custom_blocks {
        if !cb.enabled {
            continue;
        }
        if let Some(Some(false)) = config.overrides.get(&cb.id).map(|o| o.enabled) {
            continue;
        }
        if let Some(block) = evaluate_custom_block(cb, script_ctx).await {
            blocks.push(block);
        }
    }

    for block in blocks.iter_mut() {
        if let Some(ov) = config.overrides.get(&block.id) {
            if let Some(mode) = ov.content_mode {
                if let Some(custom) = &ov.custom_content {
                    block.content = match mode {
                        ContentMode::Override => custom.clone(),
                        ContentMode::Prepend => format!("{}\n{}", custom, block.content),
                        ContentMode::Append => format!("{}\n{}", block.content, custom),
                    };
                }
            }
        }
    }

    if !config.block_order.is_empty() {
        let positions: HashMap<&str, i64> = config
            .block_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i as i64))
            .collect();
        for block in blocks.iter_mut() {
            if let Some(&pos) = positions.get(block.id.as_str()) {
                block.order = pos;
            }
        }
    }

    for block in blocks.iter_mut() {
        if let Some(ov) = config.overrides.get(&block.id) {
            if let Some(order) = ov.order {
                block.order = order;
            }
        }
    }

    blocks.retain(|block| !matches!(config.overrides.get(&block.id).and_then(|o| o.enabled), Some(false)));

    // role groups: system before user; within role, ascending order, ties by
    // insertion order (stable sort preserves insertion order on ties).
    blocks.sort_by(|a, b| a.role.cmp(&b.role).then(a.order.cmp(&b.order)));

    blocks
}

async fn evaluate_custom_block(cb: &CustomBlockDefinition, ctx: &ScriptContext) -> Option<ContextBlock> {
    let content = match cb.block_type {
        CustomBlockType::Simple => cb.content.clone(),
        CustomBlockType::Script => match evaluate_script(&cb.name, &cb.content, ctx).await {
            ScriptOutcome::Text(text) => text,
            ScriptOutcome::Empty => return None,
            ScriptOutcome::Error(msg) => format!("[Script error in \"{}\": {}]", cb.name, msg),
        },
    };
    Some(ContextBlock {
        id: cb.id.clone(),
        role: cb.role,
        content,
        order: cb.order,
        source: loomquill_core::types::BlockSource::Custom,
        name: Some(cb.name.clone()),
    })
}

/// Concatenate a sorted block list into `(system_text, user_text)`, one
/// block's content per paragraph in the blocks' already-sorted order.
pub fn concatenate_by_role(blocks: &[ContextBlock]) -> (String, String) {
    let mut system_parts = Vec::new();
    let mut user_parts = Vec::new();
    for block in blocks {
        match block.role {
            Role::System => system_parts.push(block.content.as_str()),
            Role::User => user_parts.push(block.content.as_str()),
        }
    }
    (system_parts.join("\n\n"), user_parts.join("\n\n"))
}

/// Convenience for builtin producers to wrap a fixed string as a block.
pub fn builtin_block(id: &str, role: Role, content: impl Into<String>, order: i64) -> ContextBlock {
    ContextBlock {
        id: id.to_string(),
        role,
        content: content.into(),
        order,
        source: loomquill_core::types::BlockSource::Builtin,
        name: None,
    }
}
