//! Declarative decomposition rules
//!
//! Each composite entity is described by a static [`EntitySchema`] listing the
//! nested fields that are split off into child tables. The [`Decomposer`]
//! engine interprets these rules; no entity needs hand-written code.
//!
//! [`Decomposer`]: super::Decomposer

/// Column holding the run's extraction timestamp
pub const EXTRACTION_TIME: &str = "extraction_time";

/// Column holding the zero-based position of a child within its parent list
pub const ROW_NR: &str = "row_nr";

/// Rules for one entity type
#[derive(Debug)]
pub struct EntitySchema {
    /// Table name of the entity itself
    pub name: &'static str,
    /// Primary key of the entity table; the first column identifies the
    /// entity to its children
    pub primary_key: &'static [&'static str],
    /// Nested fields split off into child tables, in processing order
    pub children: &'static [ChildRule],
    /// Skip records whose primary key was already written this run
    pub dedupe: bool,
}

impl EntitySchema {
    /// A flat entity without nested children
    pub const fn flat(name: &'static str, primary_key: &'static [&'static str]) -> Self {
        Self {
            name,
            primary_key,
            children: &[],
            dedupe: false,
        }
    }

    /// Column identifying this entity to its children
    pub fn key_column(&self) -> &'static str {
        self.primary_key.first().copied().unwrap_or("id")
    }

    /// Whether any child needs this entity's key injected
    pub fn needs_parent_key(&self) -> bool {
        self.children.iter().any(|c| c.foreign_key.is_some())
    }

    pub fn child(&self, field: &str) -> Option<&'static ChildRule> {
        self.children.iter().find(|c| c.field == field)
    }
}

/// Where the elements of a nested field end up
#[derive(Debug)]
pub enum ChildTarget {
    /// A flat child table
    Table {
        name: &'static str,
        primary_key: &'static [&'static str],
    },
    /// A nested entity decomposed by its own rules; `prefix` is prepended to
    /// every table name of that subtree
    Entity {
        schema: &'static EntitySchema,
        prefix: &'static str,
    },
    /// A writer owned by the run and shared between producers; the parent
    /// keeps the child's id in `link_column`
    Shared {
        entity: &'static str,
        link_column: &'static str,
    },
}

/// One nested field of an entity
#[derive(Debug)]
pub struct ChildRule {
    pub field: &'static str,
    pub target: ChildTarget,
    /// Column receiving the parent's key on every child row
    pub foreign_key: Option<&'static str>,
    /// Inject `row_nr` for children without a natural id
    pub positional: bool,
}

impl ChildRule {
    pub const fn table(
        field: &'static str,
        name: &'static str,
        primary_key: &'static [&'static str],
    ) -> Self {
        Self {
            field,
            target: ChildTarget::Table { name, primary_key },
            foreign_key: None,
            positional: false,
        }
    }

    pub const fn entity(field: &'static str, schema: &'static EntitySchema) -> Self {
        Self {
            field,
            target: ChildTarget::Entity { schema, prefix: "" },
            foreign_key: None,
            positional: false,
        }
    }

    pub const fn shared(
        field: &'static str,
        entity: &'static str,
        link_column: &'static str,
    ) -> Self {
        Self {
            field,
            target: ChildTarget::Shared {
                entity,
                link_column,
            },
            foreign_key: None,
            positional: false,
        }
    }

    pub const fn foreign_key(mut self, column: &'static str) -> Self {
        self.foreign_key = Some(column);
        self
    }

    pub const fn positional(mut self) -> Self {
        self.positional = true;
        self
    }

    /// Prefix the table names of an entity child
    pub const fn prefixed(mut self, table_prefix: &'static str) -> Self {
        if let ChildTarget::Entity { schema, .. } = self.target {
            self.target = ChildTarget::Entity {
                schema,
                prefix: table_prefix,
            };
        }
        self
    }
}
