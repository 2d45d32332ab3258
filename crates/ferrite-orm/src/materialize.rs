//! Row materialization.
//!
//! Consumes a row stream against the [`Shaper`] a compiled query produced
//! and rebuilds the result graph. Entities are registered in the
//! [`TrackingScope`]'s identity map; join fan-out collapses back into
//! collections by grouping rows on the parent key in first-appearance order
//! and deduplicating children by their key.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use ferrite_core::shaper::{EntityShaper, Shaper};
use ferrite_core::types::{TypeInfo, TypeKind};
use ferrite_core::value::Value;

use crate::error::MaterializeError;
use crate::model::MappingModel;
use crate::tracking::{EntityData, EntityRef, KeyValue, TrackingScope};

/// Provider-neutral access to one result row.
///
/// Providers implement this over their native row type; tests use
/// [`ValueRow`].
pub trait RowReader {
    /// Number of columns in the row.
    fn column_count(&self) -> usize;

    /// Reads the value at a projection ordinal.
    fn get(&self, ordinal: usize) -> Result<Value, MaterializeError>;

    /// Returns whether the value at an ordinal is NULL.
    fn is_null(&self, ordinal: usize) -> Result<bool, MaterializeError> {
        Ok(self.get(ordinal)?.is_null())
    }
}

/// An in-memory row.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow(pub Vec<Value>);

impl RowReader for ValueRow {
    fn column_count(&self) -> usize {
        self.0.len()
    }

    fn get(&self, ordinal: usize) -> Result<Value, MaterializeError> {
        self.0
            .get(ordinal)
            .cloned()
            .ok_or(MaterializeError::ColumnCountMismatch {
                ordinal,
                actual: self.0.len(),
            })
    }
}

/// One materialized result.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    /// A scalar value.
    Value(Value),
    /// A tracked entity instance.
    Entity(EntityRef),
    /// A named-member record from a projection.
    Record(Vec<(String, Materialized)>),
}

impl Materialized {
    /// Returns the scalar value, if this result is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the entity instance, if this result is one.
    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }
}

/// Rebuilds result graphs from rows.
pub struct Materializer<'a> {
    model: &'a MappingModel,
}

impl<'a> Materializer<'a> {
    /// Creates a materializer over the mapping model.
    #[must_use]
    pub fn new(model: &'a MappingModel) -> Self {
        Self { model }
    }

    /// Materializes a full result set.
    ///
    /// For entity results, join fan-out collapses: each distinct root key
    /// yields one result, in first-appearance order, and included children
    /// deduplicate by their own key. For scalar and record results, one
    /// result per row.
    pub fn materialize_all<R: RowReader>(
        &self,
        rows: &[R],
        shaper: &Shaper,
        scope: &mut TrackingScope,
    ) -> Result<Vec<Materialized>, MaterializeError> {
        let Shaper::Entity(root) = shaper else {
            return rows
                .iter()
                .map(|row| self.materialize_row(row, shaper, scope))
                .collect();
        };

        let mut results = Vec::new();
        let mut seen_parents: HashSet<KeyValue> = HashSet::new();
        let mut seen_children: HashMap<(KeyValue, String), HashSet<KeyValue>> = HashMap::new();

        for row in rows {
            let Some((parent_key, parent)) = self.read_entity(row, root, scope)? else {
                continue;
            };
            if seen_parents.insert(parent_key.clone()) {
                // Collections start empty so parents without children expose
                // an empty list rather than a missing one.
                {
                    let mut data = parent.borrow_mut();
                    for collection in &root.collections {
                        data.collections
                            .entry(collection.navigation.clone())
                            .or_default();
                    }
                }
                results.push(Materialized::Entity(Rc::clone(&parent)));
            }

            for collection in &root.collections {
                let Shaper::Entity(element) = collection.element.as_ref() else {
                    continue;
                };
                // An all-NULL child key is a left-join miss, not a child.
                let Some((child_key, child)) = self.read_entity(row, element, scope)? else {
                    continue;
                };
                let seen = seen_children
                    .entry((parent_key.clone(), collection.navigation.clone()))
                    .or_default();
                if seen.insert(child_key) {
                    parent
                        .borrow_mut()
                        .collections
                        .entry(collection.navigation.clone())
                        .or_default()
                        .push(child);
                }
            }
        }
        Ok(results)
    }

    fn materialize_row<R: RowReader>(
        &self,
        row: &R,
        shaper: &Shaper,
        scope: &mut TrackingScope,
    ) -> Result<Materialized, MaterializeError> {
        match shaper {
            Shaper::Scalar { ordinal, ty } => {
                let value = coerce(row.get(*ordinal)?, ty, *ordinal)?;
                Ok(Materialized::Value(value))
            }
            Shaper::Entity(entity) => Ok(match self.read_entity(row, entity, scope)? {
                Some((_, instance)) => Materialized::Entity(instance),
                None => Materialized::Value(Value::Null),
            }),
            Shaper::Composite { bindings } => {
                let mut members = Vec::with_capacity(bindings.len());
                for (name, member) in bindings {
                    members.push((name.clone(), self.materialize_row(row, member, scope)?));
                }
                Ok(Materialized::Record(members))
            }
            Shaper::ClientEval {
                function,
                arg_ordinals,
                ..
            } => {
                let mut args = Vec::with_capacity(arg_ordinals.len());
                for &ordinal in arg_ordinals {
                    args.push((ordinal, row.get(ordinal)?));
                }
                Ok(Materialized::Value(apply_client_function(function, &args)?))
            }
        }
    }

    /// Reads one entity from the row, resolving identity through the scope.
    /// Returns `None` when the key columns are all NULL.
    fn read_entity<R: RowReader>(
        &self,
        row: &R,
        shaper: &EntityShaper,
        scope: &mut TrackingScope,
    ) -> Result<Option<(KeyValue, EntityRef)>, MaterializeError> {
        let key = KeyValue(
            shaper
                .key_ordinals
                .iter()
                .map(|&o| row.get(o))
                .collect::<Result<Vec<_>, _>>()?,
        );
        if key.is_all_null() {
            return Ok(None);
        }

        let entity_type = match shaper.discriminator {
            Some(ordinal) => {
                let value = row.get(ordinal)?;
                self.model
                    .entity_type(&shaper.entity_type)
                    .ok()
                    .and_then(|e| e.discriminator.as_ref())
                    .and_then(|d| d.entity_for(&value))
                    .map(String::from)
                    .ok_or(MaterializeError::UnknownDiscriminator(value))?
            }
            None => shaper.entity_type.clone(),
        };

        let mut values = BTreeMap::new();
        for (name, ordinal) in &shaper.properties {
            let raw = row.get(*ordinal)?;
            let value = match self.model.resolve_property(&shaper.entity_type, name) {
                Ok(property) => coerce(raw, &property.ty, *ordinal)?,
                Err(_) => raw,
            };
            values.insert(name.clone(), value);
        }

        let instance = scope.resolve_or_insert(&entity_type, key.clone(), || EntityData {
            entity_type: entity_type.clone(),
            values,
            collections: BTreeMap::new(),
        });
        Ok(Some((key, instance)))
    }
}

/// Converts a raw column value to the expected storage class.
///
/// Backends without strict column types hand back whatever affinity stored;
/// integers widen to floats and 0/1 narrows to booleans. Anything else is a
/// conversion failure.
fn coerce(value: Value, ty: &TypeInfo, ordinal: usize) -> Result<Value, MaterializeError> {
    let mismatch = |value: &Value| MaterializeError::TypeConversion {
        ordinal,
        expected: ty.store_type.clone(),
        value: value.render_literal(),
    };
    match (ty.kind, value) {
        (_, Value::Null) => Ok(Value::Null),
        (TypeKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (TypeKind::Bool, Value::Int(0)) => Ok(Value::Bool(false)),
        (TypeKind::Bool, Value::Int(1)) => Ok(Value::Bool(true)),
        (TypeKind::Int, Value::Int(n)) => Ok(Value::Int(n)),
        (TypeKind::Float, Value::Float(f)) => Ok(Value::Float(f)),
        #[allow(clippy::cast_precision_loss)]
        (TypeKind::Float, Value::Int(n)) => Ok(Value::Float(n as f64)),
        (TypeKind::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (TypeKind::Blob, Value::Blob(b)) => Ok(Value::Blob(b)),
        (_, other) => Err(mismatch(&other)),
    }
}

/// Applies a client-evaluated function to fetched argument values.
///
/// NULL propagates through every function, matching what the backend would
/// have returned had it evaluated the call.
fn apply_client_function(
    name: &str,
    args: &[(usize, Value)],
) -> Result<Value, MaterializeError> {
    if args.iter().any(|(_, v)| v.is_null()) {
        return Ok(Value::Null);
    }
    let text_arg = |index: usize| -> Result<&str, MaterializeError> {
        match args.get(index) {
            Some((_, Value::Text(s))) => Ok(s.as_str()),
            Some((ordinal, other)) => Err(MaterializeError::TypeConversion {
                ordinal: *ordinal,
                expected: String::from("TEXT"),
                value: other.render_literal(),
            }),
            None => Err(MaterializeError::UnknownClientFunction(String::from(name))),
        }
    };
    match name {
        "UPPER" => Ok(Value::Text(text_arg(0)?.to_uppercase())),
        "LOWER" => Ok(Value::Text(text_arg(0)?.to_lowercase())),
        "LENGTH" => Ok(Value::Int(text_arg(0)?.chars().count() as i64)),
        "ABS" => match args.first() {
            Some((_, Value::Int(n))) => Ok(Value::Int(n.abs())),
            Some((_, Value::Float(f))) => Ok(Value::Float(f.abs())),
            Some((ordinal, other)) => Err(MaterializeError::TypeConversion {
                ordinal: *ordinal,
                expected: String::from("INTEGER"),
                value: other.render_literal(),
            }),
            None => Err(MaterializeError::UnknownClientFunction(String::from(name))),
        },
        _ => Err(MaterializeError::UnknownClientFunction(String::from(name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_core::shaper::CollectionShaper;

    use crate::model::{DiscriminatorMapping, EntityType, PropertyMapping};

    fn sample_model() -> MappingModel {
        MappingModel::new()
            .entity(
                EntityType::new("Customer", "customers")
                    .property(PropertyMapping::new("Id", "id", TypeInfo::new(TypeKind::Int)))
                    .property(PropertyMapping::new(
                        "Name",
                        "name",
                        TypeInfo::new(TypeKind::Text),
                    ))
                    .key(&["Id"]),
            )
            .entity(
                EntityType::new("Order", "orders")
                    .property(PropertyMapping::new("Id", "id", TypeInfo::new(TypeKind::Int)))
                    .property(PropertyMapping::new(
                        "Total",
                        "total",
                        TypeInfo::new(TypeKind::Float),
                    ))
                    .key(&["Id"]),
            )
    }

    fn customer_shaper() -> EntityShaper {
        EntityShaper {
            entity_type: String::from("Customer"),
            key_ordinals: vec![0],
            properties: vec![(String::from("Id"), 0), (String::from("Name"), 1)],
            discriminator: None,
            collections: Vec::new(),
        }
    }

    fn customer_with_orders_shaper() -> Shaper {
        let mut root = customer_shaper();
        root.collections.push(CollectionShaper {
            navigation: String::from("Orders"),
            parent_key_ordinals: vec![0],
            element: Box::new(Shaper::Entity(EntityShaper {
                entity_type: String::from("Order"),
                key_ordinals: vec![2],
                properties: vec![(String::from("Id"), 2), (String::from("Total"), 3)],
                discriminator: None,
                collections: Vec::new(),
            })),
        });
        Shaper::Entity(root)
    }

    fn row(values: Vec<Value>) -> ValueRow {
        ValueRow(values)
    }

    #[test]
    fn test_fan_out_collapses_into_collections() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let rows = vec![
            row(vec![
                Value::Int(1),
                Value::Text(String::from("Alice")),
                Value::Int(10),
                Value::Float(99.5),
            ]),
            row(vec![
                Value::Int(1),
                Value::Text(String::from("Alice")),
                Value::Int(11),
                Value::Float(5.0),
            ]),
            row(vec![
                Value::Int(2),
                Value::Text(String::from("Bob")),
                Value::Int(12),
                Value::Float(1.0),
            ]),
        ];
        let results = Materializer::new(&model)
            .materialize_all(&rows, &customer_with_orders_shaper(), &mut scope)
            .unwrap();

        assert_eq!(results.len(), 2);
        let alice = results[0].as_entity().unwrap().borrow();
        assert_eq!(alice.get("Name"), Some(&Value::Text(String::from("Alice"))));
        assert_eq!(alice.collections["Orders"].len(), 2);
        let bob = results[1].as_entity().unwrap().borrow();
        assert_eq!(bob.collections["Orders"].len(), 1);
    }

    #[test]
    fn test_left_join_miss_yields_empty_collection() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let rows = vec![row(vec![
            Value::Int(1),
            Value::Text(String::from("Alice")),
            Value::Null,
            Value::Null,
        ])];
        let results = Materializer::new(&model)
            .materialize_all(&rows, &customer_with_orders_shaper(), &mut scope)
            .unwrap();
        assert_eq!(results.len(), 1);
        let alice = results[0].as_entity().unwrap().borrow();
        assert!(alice.collections["Orders"].is_empty());
    }

    #[test]
    fn test_duplicate_children_deduplicate_by_key() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let rows = vec![
            row(vec![
                Value::Int(1),
                Value::Text(String::from("Alice")),
                Value::Int(10),
                Value::Float(99.5),
            ]),
            row(vec![
                Value::Int(1),
                Value::Text(String::from("Alice")),
                Value::Int(10),
                Value::Float(99.5),
            ]),
        ];
        let results = Materializer::new(&model)
            .materialize_all(&rows, &customer_with_orders_shaper(), &mut scope)
            .unwrap();
        let alice = results[0].as_entity().unwrap().borrow();
        assert_eq!(alice.collections["Orders"].len(), 1);
    }

    #[test]
    fn test_identity_map_returns_same_instance_across_queries() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let shaper = Shaper::Entity(customer_shaper());
        let rows = vec![row(vec![Value::Int(1), Value::Text(String::from("Alice"))])];

        let first = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap();
        // A later query returns the same row with a stale name.
        let rows = vec![row(vec![Value::Int(1), Value::Text(String::from("Stale"))])];
        let second = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap();

        let a = first[0].as_entity().unwrap();
        let b = second[0].as_entity().unwrap();
        assert!(Rc::ptr_eq(a, b));
        assert_eq!(
            b.borrow().get("Name"),
            Some(&Value::Text(String::from("Alice")))
        );
    }

    #[test]
    fn test_discriminator_resolves_derived_type() {
        let model = MappingModel::new().entity(
            EntityType::new("Animal", "animals")
                .property(PropertyMapping::new("Id", "id", TypeInfo::new(TypeKind::Int)))
                .property(PropertyMapping::new(
                    "Kind",
                    "kind",
                    TypeInfo::new(TypeKind::Text),
                ))
                .key(&["Id"])
                .discriminator(DiscriminatorMapping {
                    column: String::from("kind"),
                    values: vec![
                        (Value::Text(String::from("cat")), String::from("Cat")),
                        (Value::Text(String::from("dog")), String::from("Dog")),
                    ],
                }),
        );
        let shaper = Shaper::Entity(EntityShaper {
            entity_type: String::from("Animal"),
            key_ordinals: vec![0],
            properties: vec![(String::from("Id"), 0), (String::from("Kind"), 1)],
            discriminator: Some(1),
            collections: Vec::new(),
        });
        let mut scope = TrackingScope::new();
        let rows = vec![row(vec![Value::Int(1), Value::Text(String::from("cat"))])];
        let results = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap();
        assert_eq!(results[0].as_entity().unwrap().borrow().entity_type, "Cat");

        let rows = vec![row(vec![Value::Int(2), Value::Text(String::from("fish"))])];
        let err = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap_err();
        assert!(matches!(err, MaterializeError::UnknownDiscriminator(_)));
    }

    #[test]
    fn test_composite_record_per_row() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let shaper = Shaper::Composite {
            bindings: vec![
                (
                    String::from("Name"),
                    Shaper::scalar(0, TypeInfo::new(TypeKind::Text)),
                ),
                (
                    String::from("Total"),
                    Shaper::scalar(1, TypeInfo::new(TypeKind::Float)),
                ),
            ],
        };
        let rows = vec![
            row(vec![Value::Text(String::from("Alice")), Value::Float(99.5)]),
            row(vec![Value::Text(String::from("Bob")), Value::Int(3)]),
        ];
        let results = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap();
        assert_eq!(results.len(), 2);
        let Materialized::Record(members) = &results[1] else {
            panic!("expected record");
        };
        // Integer affinity widens to the declared float type.
        assert_eq!(members[1].1, Materialized::Value(Value::Float(3.0)));
    }

    #[test]
    fn test_client_eval_applies_function() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let shaper = Shaper::ClientEval {
            function: String::from("UPPER"),
            arg_ordinals: vec![0],
            ty: TypeInfo::new(TypeKind::Text),
        };
        let rows = vec![
            row(vec![Value::Text(String::from("alice"))]),
            row(vec![Value::Null]),
        ];
        let results = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap();
        assert_eq!(
            results[0],
            Materialized::Value(Value::Text(String::from("ALICE")))
        );
        assert_eq!(results[1], Materialized::Value(Value::Null));
    }

    #[test]
    fn test_unknown_client_function_fails() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let shaper = Shaper::ClientEval {
            function: String::from("SOUNDEX"),
            arg_ordinals: vec![0],
            ty: TypeInfo::new(TypeKind::Text),
        };
        let rows = vec![row(vec![Value::Text(String::from("x"))])];
        let err = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap_err();
        assert!(matches!(err, MaterializeError::UnknownClientFunction(_)));
    }

    #[test]
    fn test_short_row_is_a_column_count_mismatch() {
        let model = sample_model();
        let mut scope = TrackingScope::new();
        let shaper = Shaper::Entity(customer_shaper());
        let rows = vec![row(vec![Value::Int(1)])];
        let err = Materializer::new(&model)
            .materialize_all(&rows, &shaper, &mut scope)
            .unwrap_err();
        assert!(matches!(
            err,
            MaterializeError::ColumnCountMismatch { ordinal: 1, actual: 1 }
        ));
    }
}
