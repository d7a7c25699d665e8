//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `entities`: one row per configuration record, keyed by its storage id
//! - `counters`: named integer counters such as the MMC global id

use sea_orm::entity::prelude::*;

/// Configuration rows.
///
/// The record itself is kept as JSON so the schema does not follow every field
/// of every entity kind.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "entities")]
pub struct Model {
    /// `EntityKey::storage_id`, e.g. `CONNECTOR:m1/c1`
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// `EntityKind::as_str`
    pub kind: String,
    /// Serialized `EntityRecord`
    pub json: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Counters table entity models.
pub mod counters {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "counters")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub name: String,
        pub value: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
