//! Tree Schema Descriptors
//!
//! Every hierarchical entity table shares one column contract. Instead of
//! passing table names around as strings, callers name a [`TreeKind`] and the
//! engine resolves it to a [`TreeSchema`] whose identifiers are all
//! `&'static str`. SQL text is therefore only ever assembled from
//! compile-time identifiers; values are always bound as parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity kinds that store their hierarchy as a nested set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// Threaded comments
    Comment,
    /// Multi-level navigation menus
    MenuItem,
    /// Hierarchical taxonomies (categories, tags with parents)
    Taxonomy,
    /// Media library folders
    MediaFolder,
    /// Organization chart units
    OrgUnit,
}

impl TreeKind {
    /// All supported kinds, in declaration order
    pub const ALL: [TreeKind; 5] = [
        TreeKind::Comment,
        TreeKind::MenuItem,
        TreeKind::Taxonomy,
        TreeKind::MediaFolder,
        TreeKind::OrgUnit,
    ];

    /// Default table backing this kind
    pub const fn table_name(self) -> &'static str {
        match self {
            TreeKind::Comment => "comments",
            TreeKind::MenuItem => "menu_items",
            TreeKind::Taxonomy => "taxonomies",
            TreeKind::MediaFolder => "media_folders",
            TreeKind::OrgUnit => "org_units",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            TreeKind::Comment => "comment",
            TreeKind::MenuItem => "menu_item",
            TreeKind::Taxonomy => "taxonomy",
            TreeKind::MediaFolder => "media_folder",
            TreeKind::OrgUnit => "org_unit",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TreeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.table_name() == s)
            .ok_or_else(|| format!("Unknown tree kind: {}", s))
    }
}

/// Column names of the nested-set contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeColumns {
    pub id: &'static str,
    pub parent_id: &'static str,
    pub left: &'static str,
    pub right: &'static str,
    pub depth: &'static str,
    pub ordering: &'static str,
    pub created_at: &'static str,
    pub deleted_at: &'static str,
}

impl TreeColumns {
    /// The shared column contract used by every entity table
    pub const CONTRACT: TreeColumns = TreeColumns {
        id: "id",
        parent_id: "parent_id",
        left: "record_left",
        right: "record_right",
        depth: "record_depth",
        ordering: "record_ordering",
        created_at: "created_at",
        deleted_at: "deleted_at",
    };

    /// Columns in the order every store reads them back
    pub fn select_list(&self) -> String {
        [
            self.id,
            self.parent_id,
            self.left,
            self.right,
            self.depth,
            self.ordering,
            self.created_at,
            self.deleted_at,
        ]
        .join(", ")
    }
}

impl Default for TreeColumns {
    fn default() -> Self {
        Self::CONTRACT
    }
}

/// Table and column mapping for one tree kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSchema {
    pub kind: TreeKind,
    pub table: &'static str,
    pub columns: TreeColumns,
}

impl TreeSchema {
    /// Default mapping: the kind's table with the shared column contract
    pub const fn for_kind(kind: TreeKind) -> Self {
        Self {
            kind,
            table: kind.table_name(),
            columns: TreeColumns::CONTRACT,
        }
    }

    /// Same columns, different backing table
    pub const fn with_table(mut self, table: &'static str) -> Self {
        self.table = table;
        self
    }

    pub const fn with_columns(mut self, columns: TreeColumns) -> Self {
        self.columns = columns;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_name_and_table() {
        for kind in TreeKind::ALL {
            assert_eq!(kind.as_str().parse::<TreeKind>().unwrap(), kind);
            assert_eq!(kind.table_name().parse::<TreeKind>().unwrap(), kind);
        }
        assert!("widgets".parse::<TreeKind>().is_err());
    }

    #[test]
    fn test_default_schema_uses_contract_columns() {
        let schema = TreeSchema::for_kind(TreeKind::MenuItem);
        assert_eq!(schema.table, "menu_items");
        assert_eq!(schema.columns.left, "record_left");
        assert_eq!(
            schema.columns.select_list(),
            "id, parent_id, record_left, record_right, record_depth, record_ordering, created_at, deleted_at"
        );
    }

    #[test]
    fn test_schema_table_override_keeps_kind() {
        let schema = TreeSchema::for_kind(TreeKind::Comment).with_table("article_comments");
        assert_eq!(schema.kind, TreeKind::Comment);
        assert_eq!(schema.table, "article_comments");
    }
}
