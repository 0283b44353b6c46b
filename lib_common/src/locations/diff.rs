//! # Diff Engine
//!
//! Computes what has to change in the store so that it mirrors the upstream
//! snapshot. Identifiers are compared by their `(lac, cellid, eci)` triple only.
//!
//! - Duplicates in `actual` collapse to their first occurrence, so one triple
//!   is never inserted twice in the same tick.
//! - Every row in `existing` whose triple is gone upstream is deleted,
//!   duplicates included. Each of them has its own key and all of them must
//!   go for the store to converge.
//!
//! Both sides are indexed in a `HashSet`, so the cost is linear in the input sizes.

use std::collections::HashSet;

use super::model::{IdentityTriple, LocationIdentifier};

/// The mutation set for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// New identifiers. They never carry a store key.
    pub to_insert: Vec<LocationIdentifier>,
    /// Obsolete identifiers, each with the key it was read with.
    pub to_delete: Vec<LocationIdentifier>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// Diffs the upstream snapshot (`actual`) against the stored one (`existing`).
pub fn diff(actual: &[LocationIdentifier], existing: &[LocationIdentifier]) -> SyncPlan {
    let actual_set: HashSet<IdentityTriple> = actual.iter().map(|i| i.identity()).collect();
    let existing_set: HashSet<IdentityTriple> = existing.iter().map(|i| i.identity()).collect();

    let mut queued: HashSet<IdentityTriple> = HashSet::new();
    let to_insert = actual
        .iter()
        .filter(|i| {
            let triple = i.identity();
            !existing_set.contains(&triple) && queued.insert(triple)
        })
        .map(|i| i.without_id())
        .collect();

    let to_delete = existing
        .iter()
        .filter(|i| !actual_set.contains(&i.identity()))
        .copied()
        .collect();

    SyncPlan {
        to_insert,
        to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lac(lac: i64, cellid: Option<i64>) -> LocationIdentifier {
        LocationIdentifier::new(Some(lac), cellid, None).unwrap()
    }

    fn eci(eci: i64) -> LocationIdentifier {
        LocationIdentifier::new(None, None, Some(eci)).unwrap()
    }

    fn triples(items: &[LocationIdentifier]) -> HashSet<IdentityTriple> {
        items.iter().map(|i| i.identity()).collect()
    }

    #[test]
    fn stale_row_is_deleted_with_its_key() {
        let actual = vec![lac(1, Some(2))];
        let existing = vec![lac(1, Some(2)).with_id(5), lac(9, Some(10)).with_id(6)];

        let plan = diff(&actual, &existing);

        assert!(plan.to_insert.is_empty());
        assert_eq!(plan.to_delete, vec![lac(9, Some(10)).with_id(6)]);
    }

    #[test]
    fn empty_store_inserts_everything() {
        let plan = diff(&[eci(100)], &[]);
        assert_eq!(plan.to_insert, vec![eci(100)]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn empty_upstream_deletes_everything() {
        let existing = vec![lac(1, None).with_id(1), eci(7).with_id(2)];
        let plan = diff(&[], &existing);
        assert!(plan.to_insert.is_empty());
        assert_eq!(plan.to_delete, existing);
    }

    #[test]
    fn insert_and_delete_sets_are_the_set_differences() {
        let actual = vec![lac(1, None), lac(2, Some(3)), eci(4), eci(5)];
        let existing = vec![
            eci(4).with_id(10),
            lac(2, None).with_id(11),
            lac(8, Some(8)).with_id(12),
        ];

        let plan = diff(&actual, &existing);

        let a = triples(&actual);
        let e = triples(&existing);
        let expected_insert: HashSet<_> = a.difference(&e).copied().collect();
        let expected_delete: HashSet<_> = e.difference(&a).copied().collect();

        assert_eq!(triples(&plan.to_insert), expected_insert);
        assert_eq!(triples(&plan.to_delete), expected_delete);
        assert!(triples(&plan.to_insert).is_disjoint(&triples(&plan.to_delete)));
        assert!(plan.to_insert.iter().all(|i| i.id().is_none()));
        assert!(plan.to_delete.iter().all(|i| i.id().is_some()));
    }

    #[test]
    fn duplicates_upstream_collapse_to_the_first() {
        let actual = vec![lac(3, None), lac(3, None).with_id(99), eci(1)];
        let plan = diff(&actual, &[]);
        assert_eq!(plan.to_insert, vec![lac(3, None), eci(1)]);
    }

    #[test]
    fn duplicate_stale_rows_are_all_deleted() {
        let existing = vec![lac(3, None).with_id(1), lac(3, None).with_id(2)];
        let plan = diff(&[eci(1)], &existing);
        assert_eq!(plan.to_delete.len(), 2);
    }

    #[test]
    fn applying_the_plan_converges() {
        let actual = vec![lac(1, None), lac(2, Some(3)), eci(4)];
        let existing = vec![eci(4).with_id(1), lac(7, None).with_id(2)];

        let plan = diff(&actual, &existing);

        let deleted = triples(&plan.to_delete);
        let mut next: Vec<LocationIdentifier> = existing
            .iter()
            .filter(|i| !deleted.contains(&i.identity()))
            .copied()
            .collect();
        next.extend(
            plan.to_insert
                .iter()
                .enumerate()
                .map(|(n, i)| i.with_id(100 + n as i32)),
        );

        assert!(diff(&actual, &next).is_empty());
    }
}
