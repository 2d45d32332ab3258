//! The mapping model: entity-type, property and navigation metadata.
//!
//! Built once per configuration, read-only afterwards, and safe to share
//! across tracking scopes. The translation pipeline receives it as an
//! explicit parameter on every entry point; there is no ambient model.

use ferrite_core::types::TypeInfo;
use ferrite_core::value::Value;

use crate::error::TranslationError;

/// Maps one entity property to its table column.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMapping {
    /// Property name on the entity.
    pub name: String,
    /// Column name in the table.
    pub column: String,
    /// Column type descriptor.
    pub ty: TypeInfo,
}

impl PropertyMapping {
    /// Creates a property mapping.
    #[must_use]
    pub fn new(name: impl Into<String>, column: impl Into<String>, ty: TypeInfo) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            ty,
        }
    }
}

/// A relationship from one entity type to another.
///
/// `foreign_key` columns live on the dependent side, `principal_key`
/// columns on the principal side; `is_collection` tells which side this
/// navigation starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    /// Navigation name on the declaring entity.
    pub name: String,
    /// Target entity type name.
    pub target: String,
    /// Foreign-key column names on the dependent side.
    pub foreign_key: Vec<String>,
    /// Principal-key column names on the principal side.
    pub principal_key: Vec<String>,
    /// Whether the navigation yields a collection (declaring side is the
    /// principal).
    pub is_collection: bool,
    /// Whether the relationship is required (non-nullable foreign key).
    pub is_required: bool,
}

/// Discriminator mapping for hierarchy-mapped tables.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminatorMapping {
    /// Column holding the discriminator value.
    pub column: String,
    /// Known `(value, entity type)` pairs.
    pub values: Vec<(Value, String)>,
}

impl DiscriminatorMapping {
    /// Resolves a discriminator value to an entity type name.
    #[must_use]
    pub fn entity_for(&self, value: &Value) -> Option<&str> {
        self.values
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, e)| e.as_str())
    }
}

/// One mapped entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    /// Entity type name.
    pub name: String,
    /// Schema the table lives in (optional).
    pub schema: Option<String>,
    /// Table name.
    pub table: String,
    /// Mapped properties in declaration order.
    pub properties: Vec<PropertyMapping>,
    /// Key property names, in declared key order.
    pub key: Vec<String>,
    /// Navigations declared on this entity.
    pub navigations: Vec<Navigation>,
    /// Discriminator mapping, for hierarchy-mapped entities.
    pub discriminator: Option<DiscriminatorMapping>,
}

impl EntityType {
    /// Creates an entity type mapped to the given table.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table: table.into(),
            properties: Vec::new(),
            key: Vec::new(),
            navigations: Vec::new(),
            discriminator: None,
        }
    }

    /// Sets the schema.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Adds a property mapping.
    #[must_use]
    pub fn property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    /// Declares the primary key property names, in key order.
    #[must_use]
    pub fn key(mut self, properties: &[&str]) -> Self {
        self.key = properties.iter().map(|p| String::from(*p)).collect();
        self
    }

    /// Adds a navigation.
    #[must_use]
    pub fn navigation(mut self, navigation: Navigation) -> Self {
        self.navigations.push(navigation);
        self
    }

    /// Sets the discriminator mapping.
    #[must_use]
    pub fn discriminator(mut self, mapping: DiscriminatorMapping) -> Self {
        self.discriminator = Some(mapping);
        self
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property_by_name(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up a property by column name.
    #[must_use]
    pub fn property_by_column(&self, column: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.column == column)
    }

    /// Returns the key columns in declared key order.
    #[must_use]
    pub fn key_columns(&self) -> Vec<&str> {
        self.key
            .iter()
            .filter_map(|name| self.property_by_name(name))
            .map(|p| p.column.as_str())
            .collect()
    }
}

/// The read-only mapping model queried during normalization and
/// compilation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingModel {
    entities: Vec<EntityType>,
}

impl MappingModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity type.
    #[must_use]
    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    /// Resolves an entity type by name.
    pub fn entity_type(&self, name: &str) -> Result<&EntityType, TranslationError> {
        self.entities
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| TranslationError::UnknownEntity(String::from(name)))
    }

    /// Resolves a property access to its column mapping.
    pub fn resolve_property(
        &self,
        entity: &str,
        member: &str,
    ) -> Result<&PropertyMapping, TranslationError> {
        self.entity_type(entity)?
            .property_by_name(member)
            .ok_or_else(|| TranslationError::UnmappedMember {
                entity: String::from(entity),
                member: String::from(member),
            })
    }

    /// Resolves a navigation access.
    pub fn resolve_navigation(
        &self,
        entity: &str,
        member: &str,
    ) -> Result<&Navigation, TranslationError> {
        self.entity_type(entity)?
            .navigations
            .iter()
            .find(|n| n.name == member)
            .ok_or_else(|| TranslationError::UnmappedMember {
                entity: String::from(entity),
                member: String::from(member),
            })
    }

    /// Returns the primary-key column names for an entity, in key order.
    pub fn primary_key_columns(&self, entity: &str) -> Result<Vec<String>, TranslationError> {
        Ok(self
            .entity_type(entity)?
            .key_columns()
            .into_iter()
            .map(String::from)
            .collect())
    }

    /// Returns `(schema, table)` for an entity.
    pub fn table_for(&self, entity: &str) -> Result<(Option<&str>, &str), TranslationError> {
        let entity = self.entity_type(entity)?;
        Ok((entity.schema.as_deref(), entity.table.as_str()))
    }
}
