//! Default system prompts bundled at compile time.
//!
//! Each generation stage sends one of these as its system message.

/// Coordinator - ordered milestone objectives from research excerpts
pub const COORDINATOR: &str = include_str!("defaults/coordinator.md");

/// Planner - context, goals, assumptions, non-goals and risks
pub const PLANNER: &str = include_str!("defaults/planner.md");

/// Decomposer - one execution-ready prompt step per milestone
pub const DECOMPOSER: &str = include_str!("defaults/decomposer.md");

/// Blueprint summary - summary, highlights, risks and components
pub const BLUEPRINT_SUMMARY: &str = include_str!("defaults/blueprint_summary.md");

/// Milestones - exactly five delivery milestones from an approved summary
pub const MILESTONES: &str = include_str!("defaults/milestones.md");

/// Graph audit - component coverage verification
pub const GRAPH_AUDIT: &str = include_str!("defaults/graph_audit.md");

/// Prompt generator - per-milestone coding-agent prompts
pub const PROMPT_GENERATOR: &str = include_str!("defaults/prompt_generator.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("coordinator", COORDINATOR),
        ("planner", PLANNER),
        ("decomposer", DECOMPOSER),
        ("blueprint_summary", BLUEPRINT_SUMMARY),
        ("milestones", MILESTONES),
        ("graph_audit", GRAPH_AUDIT),
        ("prompt_generator", PROMPT_GENERATOR),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", slug);
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
        }
    }

    #[test]
    fn test_prompts_request_json() {
        for (slug, content) in all_defaults() {
            assert!(content.contains("JSON"), "Prompt '{}' should ask for JSON", slug);
        }
    }
}
