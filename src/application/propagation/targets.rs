//! Target set resolution.

use std::collections::{HashSet, VecDeque};

use crate::application::repos::{RepoError, Repositories};
use crate::domain::types::SourceReference;

/// Strings a job must regenerate, parents before children where the source
/// implies a tree.
pub async fn resolve_targets(
    repos: &dyn Repositories,
    workspace_id: i64,
    source: &SourceReference,
) -> Result<Vec<i64>, RepoError> {
    match source {
        SourceReference::DimensionValue { dimension_value_id } => {
            let mut ids = repos
                .list_string_ids_by_dimension_value(workspace_id, *dimension_value_id)
                .await?;
            ids.sort_unstable();
            ids.dedup();
            Ok(ids)
        }
        SourceReference::ParentString { string_id } => descendants(repos, *string_id).await,
        SourceReference::Rule { rule_id } => {
            let mut ids = repos
                .list_string_ids_by_rule(workspace_id, *rule_id)
                .await?;
            ids.sort_unstable();
            ids.dedup();
            Ok(ids)
        }
        SourceReference::Strings { string_ids } => Ok(dedup_in_order(string_ids)),
    }
}

/// Transitive children of `root` in breadth-first order, `root` excluded.
pub async fn descendants(repos: &dyn Repositories, root: i64) -> Result<Vec<i64>, RepoError> {
    let mut seen = HashSet::from([root]);
    let mut frontier = VecDeque::from([root]);
    let mut out = Vec::new();

    while let Some(current) = frontier.pop_front() {
        let mut children = repos.list_children(current).await?;
        children.sort_unstable();
        for child in children {
            if seen.insert(child) {
                out.push(child);
                frontier.push_back(child);
            }
        }
    }

    Ok(out)
}

pub fn dedup_in_order(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::StringRecord;
    use crate::infra::memory::MemoryRepositories;
    use time::OffsetDateTime;

    fn string(id: i64, parent_id: Option<i64>, rule_id: i64) -> StringRecord {
        StringRecord {
            id,
            workspace_id: 1,
            rule_id,
            field_id: 100,
            parent_id,
            value: format!("s{id}"),
            version: 1,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn tree() -> MemoryRepositories {
        let repos = MemoryRepositories::new();
        repos.insert_string(string(499, None, 5), &[(1, Some(20), None)]);
        repos.insert_string(string(500, Some(499), 6), &[(3, Some(10), None)]);
        repos.insert_string(string(501, Some(499), 6), &[(3, Some(11), None)]);
        repos.insert_string(string(502, Some(500), 7), &[(3, Some(10), None)]);
        repos.insert_string(string(503, Some(502), 7), &[]);
        // Sibling tree.
        repos.insert_string(string(600, None, 5), &[(1, Some(21), None)]);
        repos.insert_string(string(601, Some(600), 6), &[(3, Some(10), None)]);
        repos
    }

    #[tokio::test]
    async fn parent_change_targets_only_descendants() {
        let repos = tree();
        let ids = resolve_targets(&repos, 1, &SourceReference::ParentString { string_id: 499 })
            .await
            .unwrap();
        assert_eq!(ids, vec![500, 501, 502, 503]);
    }

    #[tokio::test]
    async fn dimension_value_targets_referencing_strings() {
        let repos = tree();
        let ids = resolve_targets(
            &repos,
            1,
            &SourceReference::DimensionValue {
                dimension_value_id: 10,
            },
        )
        .await
        .unwrap();
        assert_eq!(ids, vec![500, 502, 601]);
        assert!(
            resolve_targets(
                &repos,
                2,
                &SourceReference::DimensionValue {
                    dimension_value_id: 10
                }
            )
            .await
            .unwrap()
            .is_empty()
        );
    }

    #[tokio::test]
    async fn rule_and_manual_sources() {
        let repos = tree();
        let ids = resolve_targets(&repos, 1, &SourceReference::Rule { rule_id: 6 })
            .await
            .unwrap();
        assert_eq!(ids, vec![500, 501, 601]);

        let manual = SourceReference::Strings {
            string_ids: vec![503, 500, 503],
        };
        assert_eq!(
            resolve_targets(&repos, 1, &manual).await.unwrap(),
            vec![503, 500]
        );
    }

    #[tokio::test]
    async fn descendants_survive_parent_cycles() {
        let repos = MemoryRepositories::new();
        repos.insert_string(string(1, Some(2), 5), &[]);
        repos.insert_string(string(2, Some(1), 5), &[]);
        assert_eq!(descendants(&repos, 1).await.unwrap(), vec![2]);
    }
}
