//! Dependency resolution for model-produced entities.
//!
//! Models refer to each other's entities by whatever id they emitted, which
//! may differ in casing or punctuation from the sanitized id we keep. This
//! module maps raw references onto known ids, drops everything it cannot
//! resolve, orders the entities deterministically and renumbers them.

use std::collections::{HashMap, HashSet};

use super::sanitize::sanitize_id;

/// An entity as parsed from model output, before resolution.
#[derive(Debug, Clone)]
pub struct DraftEntity<T> {
    /// Identifier exactly as the model wrote it
    pub raw_id: String,
    /// Sanitized identifier
    pub id: String,
    /// Declared order (position in the list when the model gave none)
    pub declared_order: usize,
    /// Dependency references exactly as the model wrote them
    pub raw_dependencies: Vec<String>,
    pub payload: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity<T> {
    pub id: String,
    /// Dense 0-based order after sorting
    pub order: usize,
    /// Ids of earlier entities only, de-duplicated, in first-reference order
    pub dependencies: Vec<String>,
    pub payload: T,
}

/// Resolve dependency references and assign final ordering.
///
/// Entities are sorted by `(declared_order, id)` and renumbered densely from 0.
/// Duplicate sanitized ids are made unique with a numeric suffix. A reference
/// is kept only if it resolves (case-insensitively via the raw id, or via its
/// sanitized form) to a different entity that sorts earlier, so the result is
/// always acyclic.
pub fn resolve<T>(drafts: Vec<DraftEntity<T>>) -> Vec<ResolvedEntity<T>> {
    let mut used: HashSet<String> = HashSet::new();
    let mut lookup: HashMap<String, String> = HashMap::new();
    let mut drafts: Vec<DraftEntity<T>> = drafts
        .into_iter()
        .map(|mut draft| {
            let base = draft.id.clone();
            let mut candidate = base.clone();
            let mut suffix = 2;
            while used.contains(&candidate) {
                candidate = format!("{}-{}", base, suffix);
                suffix += 1;
            }
            used.insert(candidate.clone());
            lookup
                .entry(draft.raw_id.trim().to_lowercase())
                .or_insert_with(|| candidate.clone());
            lookup.entry(candidate.clone()).or_insert_with(|| candidate.clone());
            draft.id = candidate;
            draft
        })
        .collect();

    drafts.sort_by(|a, b| {
        a.declared_order
            .cmp(&b.declared_order)
            .then_with(|| a.id.cmp(&b.id))
    });

    let position: HashMap<String, usize> = drafts
        .iter()
        .enumerate()
        .map(|(index, draft)| (draft.id.clone(), index))
        .collect();

    drafts
        .into_iter()
        .enumerate()
        .map(|(order, draft)| {
            let mut dependencies: Vec<String> = Vec::new();
            for reference in &draft.raw_dependencies {
                let key = reference.trim().to_lowercase();
                let resolved = lookup
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| sanitize_id(reference, None));
                let earlier = position
                    .get(&resolved)
                    .map(|index| *index < order)
                    .unwrap_or(false);
                if !resolved.is_empty()
                    && resolved != draft.id
                    && earlier
                    && !dependencies.contains(&resolved)
                {
                    dependencies.push(resolved);
                }
            }
            ResolvedEntity {
                id: draft.id,
                order,
                dependencies,
                payload: draft.payload,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(raw_id: &str, order: usize, deps: &[&str]) -> DraftEntity<()> {
        DraftEntity {
            raw_id: raw_id.to_string(),
            id: sanitize_id(raw_id, Some(order)),
            declared_order: order,
            raw_dependencies: deps.iter().map(|d| d.to_string()).collect(),
            payload: (),
        }
    }

    #[test]
    fn test_references_resolve_through_raw_ids() {
        let resolved = resolve(vec![
            draft("M_01", 0, &[]),
            draft("Build API", 1, &["m_01", "M_01", "unknown", "Build API"]),
        ]);
        assert_eq!(resolved[1].id, "build-api");
        assert_eq!(resolved[1].dependencies, vec!["m-01"]);
    }

    #[test]
    fn test_forward_references_are_dropped() {
        let resolved = resolve(vec![draft("a", 0, &["b"]), draft("b", 1, &["a"])]);
        assert!(resolved[0].dependencies.is_empty());
        assert_eq!(resolved[1].dependencies, vec!["a"]);
    }

    #[test]
    fn test_ordering_is_deterministic_and_dense() {
        let first = resolve(vec![
            draft("zeta", 5, &[]),
            draft("alpha", 5, &[]),
            draft("mid", 2, &[]),
        ]);
        let second = resolve(vec![
            draft("mid", 2, &[]),
            draft("alpha", 5, &[]),
            draft("zeta", 5, &[]),
        ]);
        let ids: Vec<_> = first.iter().map(|e| (e.id.clone(), e.order)).collect();
        assert_eq!(
            ids,
            vec![
                ("mid".to_string(), 0),
                ("alpha".to_string(), 1),
                ("zeta".to_string(), 2)
            ]
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_dependency_validity() {
        let resolved = resolve(vec![
            draft("m01", 0, &["m01", "m03"]),
            draft("m02", 1, &["m01", "m01", "ghost"]),
            draft("m03", 2, &["M01", "m02", "m03"]),
            draft("m04", 3, &["", "  ", "m02"]),
        ]);
        let ids: HashSet<_> = resolved.iter().map(|e| e.id.clone()).collect();
        for entity in &resolved {
            let unique: HashSet<_> = entity.dependencies.iter().collect();
            assert_eq!(unique.len(), entity.dependencies.len());
            for dep in &entity.dependencies {
                assert!(ids.contains(dep));
                assert_ne!(dep, &entity.id);
            }
        }
        assert_eq!(resolved[2].dependencies, vec!["m01", "m02"]);
    }

    #[test]
    fn test_duplicate_ids_made_unique() {
        let resolved = resolve(vec![draft("x", 0, &[]), draft("X", 1, &["x"])]);
        assert_eq!(resolved[0].id, "x");
        assert_eq!(resolved[1].id, "x-2");
        assert_eq!(resolved[1].dependencies, vec!["x"]);
    }
}
