//! # Conductor Skills
//!
//! Stage agents and the utilities they share.
//!
//! ## Architecture
//!
//! ```text
//! Stage skill (heuristic fallback first)
//!   └── StageLlm (prompt logging)
//!         └── Escalation plan (retry on truncation)
//!               └── JSON extraction → domain type
//! ```
//!
//! ## Skill Categories
//!
//! **Planning pipeline:**
//! - `CoordinatorSkill` - Ordered milestone objectives
//! - `PlannerSkill` - Goals, assumptions, non-goals, risks, milestones
//! - `DecomposerSkill` - One prompt step per milestone
//! - `ReviewerSkill` - Deterministic rubric scoring
//!
//! **Coding orchestrator:**
//! - `MilestonesSkill` - Blueprint summary and five milestones
//! - `GraphAuditSkill` - Component coverage audit
//! - `PromptGeneratorSkill` - Coding-agent prompt per milestone

pub mod dependencies;
pub mod escalation;
pub mod json_extract;
pub mod llm_helpers;
pub mod prompts;
pub mod sanitize;
pub mod text;

// Planning pipeline
pub mod coordinator_skill;
pub mod decomposer_skill;
pub mod planner_skill;
pub mod reviewer_skill;

// Coding orchestrator
pub mod graph_audit_skill;
pub mod milestones_skill;
pub mod prompt_generator_skill;

pub use coordinator_skill::CoordinatorSkill;
pub use decomposer_skill::DecomposerSkill;
pub use graph_audit_skill::GraphAuditSkill;
pub use llm_helpers::StageLlm;
pub use milestones_skill::MilestonesSkill;
pub use planner_skill::PlannerSkill;
pub use prompt_generator_skill::PromptGeneratorSkill;
pub use reviewer_skill::ReviewerSkill;
