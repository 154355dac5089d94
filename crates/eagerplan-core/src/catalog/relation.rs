//! Relations between entities and their cardinality.

/// Cardinality of a relation, seen from its source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one target per source (unique foreign key on the target).
    OneToOne,
    /// Many sources share one target (foreign key on the source).
    ManyToOne,
    /// Many targets per source (foreign key on the target).
    OneToMany,
}

/// A named link from one entity to another.
///
/// Source rows match target rows where `from_field == to_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    /// Unique among the relations of the source entity.
    pub name: String,
    pub from_entity: String,
    /// Key column read from source rows.
    pub from_field: String,
    pub to_entity: String,
    /// Key column matched on target rows.
    pub to_field: String,
    pub cardinality: Cardinality,
}

macro_rules! relation_ctor {
    ($($(#[$doc:meta])* $ctor:ident => $cardinality:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $ctor(
                name: impl Into<String>,
                from_entity: impl Into<String>,
                from_field: impl Into<String>,
                to_entity: impl Into<String>,
                to_field: impl Into<String>,
            ) -> Self {
                Self {
                    name: name.into(),
                    from_entity: from_entity.into(),
                    from_field: from_field.into(),
                    to_entity: to_entity.into(),
                    to_field: to_field.into(),
                    cardinality: Cardinality::$cardinality,
                }
            }
        )*
    };
}

impl RelationDef {
    relation_ctor! {
        /// Unique key on the target side.
        one_to_one => OneToOne;
        /// The source row holds the key.
        many_to_one => ManyToOne;
        /// Target rows hold the key.
        one_to_many => OneToMany;
    }

    /// Whether a source row can have several targets.
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::OneToMany
    }

    /// The same link walked from the target side, under `name`.
    pub fn inverse(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from_entity: self.to_entity.clone(),
            from_field: self.to_field.clone(),
            to_entity: self.from_entity.clone(),
            to_field: self.from_field.clone(),
            cardinality: match self.cardinality {
                Cardinality::ManyToOne => Cardinality::OneToMany,
                Cardinality::OneToMany => Cardinality::ManyToOne,
                same => same,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_swaps_endpoints_and_cardinality() {
        let posts = RelationDef::one_to_many("posts", "User", "id", "Post", "author_id");
        let author = posts.inverse("author");

        assert!(posts.is_to_many());
        assert!(!author.is_to_many());
        assert_eq!(author.from_entity, "Post");
        assert_eq!(author.from_field, "author_id");
        assert_eq!(author.to_entity, "User");
        assert_eq!(author.to_field, "id");
        assert_eq!(author.cardinality, Cardinality::ManyToOne);
        assert_eq!(author.inverse("posts"), posts);
    }

    #[test]
    fn test_one_to_one_is_not_to_many() {
        let profile = RelationDef::one_to_one("profile", "User", "id", "Profile", "user_id");

        assert!(!profile.is_to_many());
        assert_eq!(profile.inverse("user").cardinality, Cardinality::OneToOne);
    }
}
