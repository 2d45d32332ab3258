//! Shaper descriptions.
//!
//! A [`Shaper`] mirrors the object graph a query produces and tells the
//! materializer how to rebuild values from a row. All column references are
//! projection ordinals of the root [`crate::shape::SelectShape`], so a
//! compiled query's shape and shaper stay structurally aligned.

use crate::types::TypeInfo;

/// Describes how one entity is rebuilt from row columns.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityShaper {
    /// Mapped entity type name.
    pub entity_type: String,
    /// Primary-key ordinals, in declared key-property order. Never empty.
    pub key_ordinals: Vec<usize>,
    /// `(property name, ordinal)` pairs for all mapped properties.
    pub properties: Vec<(String, usize)>,
    /// Discriminator column ordinal for hierarchy-mapped entities.
    pub discriminator: Option<usize>,
    /// Collection navigations materialized alongside the entity.
    pub collections: Vec<CollectionShaper>,
}

/// Describes a collection navigation accumulated across joined rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionShaper {
    /// Navigation name on the parent entity.
    pub navigation: String,
    /// Ordinals of the parent key in the row, used to group child rows.
    pub parent_key_ordinals: Vec<usize>,
    /// Shaper for one collection element. Element keys deduplicate join
    /// fan-out: a child reachable through two join paths appears once.
    pub element: Box<Shaper>,
}

/// A value-construction description for query results.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaper {
    /// A single scalar column.
    Scalar {
        /// Projection ordinal.
        ordinal: usize,
        /// Type descriptor of the column.
        ty: TypeInfo,
    },

    /// A tracked entity.
    Entity(EntityShaper),

    /// An anonymous/DTO projection: named member bindings.
    Composite {
        /// `(member name, shaper)` bindings in declaration order.
        bindings: Vec<(String, Shaper)>,
    },

    /// A scalar finished in-process: the backend could not represent the
    /// function, so its arguments are fetched and the function is applied
    /// during materialization. Only scalar projections may take this form.
    ClientEval {
        /// Function name, resolved against the client function registry.
        function: String,
        /// Ordinals of the fetched arguments.
        arg_ordinals: Vec<usize>,
        /// Result type descriptor.
        ty: TypeInfo,
    },
}

impl Shaper {
    /// Creates a scalar shaper.
    #[must_use]
    pub fn scalar(ordinal: usize, ty: TypeInfo) -> Self {
        Self::Scalar { ordinal, ty }
    }

    /// Returns every projection ordinal the shaper reads, in visit order.
    #[must_use]
    pub fn referenced_ordinals(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_ordinals(&mut out);
        out
    }

    fn collect_ordinals(&self, out: &mut Vec<usize>) {
        match self {
            Self::Scalar { ordinal, .. } => out.push(*ordinal),
            Self::Entity(entity) => {
                out.extend(&entity.key_ordinals);
                out.extend(entity.properties.iter().map(|(_, o)| *o));
                if let Some(d) = entity.discriminator {
                    out.push(d);
                }
                for collection in &entity.collections {
                    out.extend(&collection.parent_key_ordinals);
                    collection.element.collect_ordinals(out);
                }
            }
            Self::Composite { bindings } => {
                for (_, shaper) in bindings {
                    shaper.collect_ordinals(out);
                }
            }
            Self::ClientEval { arg_ordinals, .. } => out.extend(arg_ordinals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeInfo, TypeKind};

    #[test]
    fn test_referenced_ordinals() {
        let shaper = Shaper::Composite {
            bindings: vec![
                (
                    String::from("Name"),
                    Shaper::scalar(0, TypeInfo::new(TypeKind::Text)),
                ),
                (
                    String::from("OrderCount"),
                    Shaper::scalar(1, TypeInfo::new(TypeKind::Int)),
                ),
            ],
        };
        assert_eq!(shaper.referenced_ordinals(), vec![0, 1]);
    }

    #[test]
    fn test_entity_ordinals_include_collections() {
        let shaper = Shaper::Entity(EntityShaper {
            entity_type: String::from("Customer"),
            key_ordinals: vec![0],
            properties: vec![(String::from("Id"), 0), (String::from("Name"), 1)],
            discriminator: None,
            collections: vec![CollectionShaper {
                navigation: String::from("Orders"),
                parent_key_ordinals: vec![0],
                element: Box::new(Shaper::Entity(EntityShaper {
                    entity_type: String::from("Order"),
                    key_ordinals: vec![2],
                    properties: vec![(String::from("Id"), 2), (String::from("Total"), 3)],
                    discriminator: None,
                    collections: vec![],
                })),
            }],
        });
        let ordinals = shaper.referenced_ordinals();
        assert!(ordinals.contains(&3));
    }
}
