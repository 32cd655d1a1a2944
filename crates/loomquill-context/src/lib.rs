//! Instruction Registry, Block Engine, and Context Builder.

pub mod blocks;
pub mod builder;
pub mod instructions;

pub use blocks::{apply_block_config, builtin_block, concatenate_by_role, ScriptContext};
pub use builder::{build_context, default_blocks, BuildOptions};
pub use instructions::InstructionRegistry;
