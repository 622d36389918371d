//! Tests for rebuild, validation and statistics through the engine
//!
//! Corruption is injected directly into the in-memory store so the repair
//! pass starts from states the mutating operations can never produce.

#[cfg(test)]
mod tests {
    use crate::db::MemoryTreeStore;
    use crate::models::{IntegrityFinding, NewTreeNode, TreeKind, TreeNode, TreeSchema};
    use crate::services::NestedSetEngine;
    use std::sync::Arc;

    const KIND: TreeKind = TreeKind::Taxonomy;

    async fn create_test_engine() -> (NestedSetEngine, MemoryTreeStore) {
        let store = MemoryTreeStore::new();
        let engine = NestedSetEngine::new(Arc::new(store.clone()));
        engine.ensure_schema(KIND).await.unwrap();
        (engine, store)
    }

    async fn add(engine: &NestedSetEngine, id: &str, parent: Option<&str>) {
        engine
            .create_node(KIND, NewTreeNode::new(id, parent.map(str::to_string), 0))
            .await
            .unwrap();
    }

    /// animals(1,10) -> mammals(2,7) -> cats(3,4), dogs(5,6); birds(8,9)
    async fn seed_taxonomy(engine: &NestedSetEngine) {
        add(engine, "animals", None).await;
        add(engine, "mammals", Some("animals")).await;
        add(engine, "cats", Some("mammals")).await;
        add(engine, "dogs", Some("mammals")).await;
        add(engine, "birds", Some("animals")).await;
    }

    async fn node(store: &MemoryTreeStore, id: &str) -> TreeNode {
        store
            .snapshot(&TreeSchema::for_kind(KIND))
            .await
            .into_iter()
            .find(|n| n.id == id)
            .unwrap()
    }

    async fn corrupt(store: &MemoryTreeStore, id: &str, edit: impl FnOnce(&mut TreeNode)) {
        let mut row = node(store, id).await;
        edit(&mut row);
        store.force_node(&TreeSchema::for_kind(KIND), row).await;
    }

    #[tokio::test]
    async fn test_consistent_tree_validates_clean() {
        let (engine, _store) = create_test_engine().await;
        seed_taxonomy(&engine).await;

        let report = engine.validate_tree(KIND).await.unwrap();
        assert!(report.is_valid(), "{:?}", report.findings);
        assert_eq!(report.nodes_checked, 5);
    }

    #[tokio::test]
    async fn test_rebuild_of_consistent_tree_rewrites_nothing() {
        let (engine, _store) = create_test_engine().await;
        seed_taxonomy(&engine).await;

        let report = engine.rebuild_tree(KIND).await.unwrap();
        assert_eq!(report.nodes_positioned, 5);
        assert_eq!(report.roots, 1);
        assert_eq!(report.rows_rewritten, 0);
        assert!(report.detached.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_repairs_corrupted_bounds() {
        let (engine, store) = create_test_engine().await;
        seed_taxonomy(&engine).await;

        corrupt(&store, "dogs", |n| {
            n.left = 40;
            n.right = 2;
            n.depth = 9;
        })
        .await;
        corrupt(&store, "mammals", |n| n.right = 5).await;

        let report = engine.validate_tree(KIND).await.unwrap();
        assert!(!report.is_valid());
        assert!(report.findings.contains(&IntegrityFinding::InvalidBounds {
            id: "dogs".into(),
            left: 40,
            right: 2,
        }));

        let rebuilt = engine.rebuild_tree(KIND).await.unwrap();
        assert!(rebuilt.rows_rewritten > 0);
        assert!(engine.validate_tree(KIND).await.unwrap().is_valid());

        let mammals = node(&store, "mammals").await;
        let dogs = node(&store, "dogs").await;
        assert_eq!((mammals.left, mammals.right, mammals.depth), (2, 7, 1));
        assert_eq!((dogs.left, dogs.right, dogs.depth), (5, 6, 2));
    }

    #[tokio::test]
    async fn test_rebuild_detaches_orphans() {
        let (engine, store) = create_test_engine().await;
        seed_taxonomy(&engine).await;
        corrupt(&store, "birds", |n| n.parent_id = Some("dinosaurs".into())).await;

        let report = engine.validate_tree(KIND).await.unwrap();
        assert!(report.findings.contains(&IntegrityFinding::DanglingParent {
            id: "birds".into(),
            parent_id: "dinosaurs".into(),
        }));

        let rebuilt = engine.rebuild_tree(KIND).await.unwrap();
        assert_eq!(rebuilt.detached, vec!["birds".to_string()]);
        assert_eq!(rebuilt.roots, 2);

        let birds = engine.get_node(KIND, "birds").await.unwrap().unwrap();
        assert!(birds.is_root());
        assert_eq!(birds.depth, 0);
        assert!(engine.validate_tree(KIND).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_rebuild_breaks_parent_cycles() {
        let (engine, store) = create_test_engine().await;
        seed_taxonomy(&engine).await;
        // cats <-> dogs, cut off from mammals
        corrupt(&store, "cats", |n| n.parent_id = Some("dogs".into())).await;
        corrupt(&store, "dogs", |n| n.parent_id = Some("cats".into())).await;

        let rebuilt = engine.rebuild_tree(KIND).await.unwrap();
        assert_eq!(rebuilt.detached, vec!["cats".to_string()]);
        assert!(engine.validate_tree(KIND).await.unwrap().is_valid());

        let dogs = engine.get_node(KIND, "dogs").await.unwrap().unwrap();
        assert_eq!(dogs.parent_id.as_deref(), Some("cats"));
        assert_eq!(engine.count_descendants(KIND, "cats").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_ignores_tombstones() {
        let (engine, store) = create_test_engine().await;
        seed_taxonomy(&engine).await;
        engine.delete_subtree(KIND, "mammals").await.unwrap();

        engine.rebuild_tree(KIND).await.unwrap();

        let cats = node(&store, "cats").await;
        assert!(cats.is_deleted());
        assert_eq!((cats.left, cats.right), (3, 4));
        assert_eq!(engine.subtree_size(KIND, "animals").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_of_unprepared_table_fails() {
        let (engine, store) = create_test_engine().await;
        seed_taxonomy(&engine).await;
        let schema = TreeSchema::for_kind(KIND);
        let before = store.snapshot(&schema).await;

        assert!(engine.rebuild_tree(TreeKind::OrgUnit).await.is_err());
        assert_eq!(store.snapshot(&schema).await, before);
    }

    #[tokio::test]
    async fn test_statistics() {
        let (engine, _store) = create_test_engine().await;
        seed_taxonomy(&engine).await;
        add(&engine, "plants", None).await;
        add(&engine, "ferns", Some("plants")).await;
        engine.delete_subtree(KIND, "ferns").await.unwrap();

        let stats = engine.get_tree_statistics(KIND).await.unwrap();
        assert_eq!(stats.total_nodes, 6);
        assert_eq!(stats.tree_height, 2);
        assert_eq!(stats.root_count, 2);
        assert_eq!(stats.leaf_count, 4);
        assert_eq!(stats.max_level_width, 2);
        assert_eq!(stats.widest_level, Some(0));
        assert_eq!(stats.deleted_nodes, 1);
    }
}
