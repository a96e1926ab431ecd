//! Partition schema.
//!
//! The schema lists the attributes stored per segment and whether the
//! partition has a sub doc space (e.g. SKUs nested under products). It is
//! stored as `schema.json` for id 0 and `schema.json.<id>` afterwards.

use crate::config::OffsetConfig;
use crate::dir::schema_file_name;
use crate::error::{CoreError, CoreResult};
use crate::types::SchemaVersionId;
use seglake_storage::Directory;
use serde::{Deserialize, Serialize};

/// Value layout of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Values of any length, addressed through an offset table.
    VarLen,
    /// Values of exactly `width` bytes.
    Fixed {
        /// Value width in bytes.
        width: u32,
    },
}

/// Configuration of one attribute field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Field name, unique within a schema.
    pub name: String,
    /// Value layout.
    pub kind: AttributeKind,
    /// Compress the offset table (var-len only).
    #[serde(default)]
    pub compress_offset: bool,
    /// Allow in-place updates after build.
    #[serde(default)]
    pub updatable: bool,
}

impl AttributeConfig {
    /// A var-len attribute with plain offsets.
    #[must_use]
    pub fn var_len(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::VarLen,
            compress_offset: false,
            updatable: false,
        }
    }

    /// A fixed-width attribute.
    #[must_use]
    pub fn fixed(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Fixed { width },
            compress_offset: false,
            updatable: false,
        }
    }

    /// Sets offset compression.
    #[must_use]
    pub fn compress_offset(mut self, value: bool) -> Self {
        self.compress_offset = value;
        self
    }

    /// Sets updatability.
    #[must_use]
    pub fn updatable(mut self, value: bool) -> Self {
        self.updatable = value;
        self
    }

    /// Offset options for this attribute, layered over `base`.
    #[must_use]
    pub fn offset_config(&self, base: &OffsetConfig) -> OffsetConfig {
        base.clone()
            .compress(self.compress_offset)
            .updatable(self.updatable)
    }
}

/// Schema of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Table name.
    pub name: String,
    /// Schema version id.
    pub schema_version_id: SchemaVersionId,
    /// Attribute fields.
    pub attributes: Vec<AttributeConfig>,
    /// Store a summary (whole stored document) per doc.
    #[serde(default)]
    pub summary: bool,
    /// Schema of the sub doc space, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_schema: Option<Box<Schema>>,
}

impl Schema {
    /// Creates a schema without attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, schema_version_id: SchemaVersionId) -> Self {
        Self {
            name: name.into(),
            schema_version_id,
            attributes: Vec::new(),
            summary: false,
            sub_schema: None,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeConfig) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Enables the summary store.
    #[must_use]
    pub fn with_summary(mut self) -> Self {
        self.summary = true;
        self
    }

    /// Sets the sub schema.
    #[must_use]
    pub fn with_sub_schema(mut self, sub: Schema) -> Self {
        self.sub_schema = Some(Box::new(sub));
        self
    }

    /// True if the partition has a sub doc space.
    #[must_use]
    pub fn has_sub_schema(&self) -> bool {
        self.sub_schema.is_some()
    }

    /// Looks up an attribute by name.
    ///
    /// # Errors
    ///
    /// Returns `FieldNotFound` if no attribute has that name.
    pub fn attribute(&self, name: &str) -> CoreResult<&AttributeConfig> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| CoreError::field_not_found(name))
    }

    /// Checks field names are unique, fixed widths are non-zero and only
    /// var-len attributes compress offsets.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        let mut seen = std::collections::BTreeSet::new();
        for attribute in &self.attributes {
            if attribute.name.is_empty() || attribute.name.contains('/') {
                return Err(CoreError::invalid_argument(format!(
                    "invalid attribute name {:?}",
                    attribute.name
                )));
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(CoreError::invalid_argument(format!(
                    "duplicate attribute {}",
                    attribute.name
                )));
            }
            if let AttributeKind::Fixed { width } = attribute.kind {
                if width == 0 {
                    return Err(CoreError::invalid_argument(format!(
                        "attribute {} has zero width",
                        attribute.name
                    )));
                }
                if attribute.compress_offset {
                    return Err(CoreError::invalid_argument(format!(
                        "fixed attribute {} has no offsets to compress",
                        attribute.name
                    )));
                }
            }
        }
        if let Some(sub) = &self.sub_schema {
            if sub.sub_schema.is_some() {
                return Err(CoreError::invalid_argument(
                    "sub schemas cannot nest",
                ));
            }
            sub.validate()?;
        }
        Ok(())
    }

    /// Loads schema `id` from the partition root.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is missing, `Json` if it doesn't
    /// parse and `CorruptFormat` if the stored id disagrees with the name.
    pub fn load(dir: &dyn Directory, id: SchemaVersionId) -> CoreResult<Self> {
        let bytes = dir.read(&schema_file_name(id))?;
        let schema: Self = serde_json::from_slice(&bytes)?;
        if schema.schema_version_id != id {
            return Err(CoreError::corrupt_format(format!(
                "{} holds schema id {}",
                schema_file_name(id),
                schema.schema_version_id
            )));
        }
        schema.validate()?;
        Ok(schema)
    }

    /// Writes the schema to the partition root.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid schema or a storage error.
    pub fn store(&self, dir: &dyn Directory) -> CoreResult<()> {
        self.validate()?;
        let bytes = serde_json::to_vec_pretty(self)?;
        dir.write(&schema_file_name(self.schema_version_id), &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_storage::InMemoryDirectory;

    fn product_schema() -> Schema {
        Schema::new("products", SchemaVersionId::new(1))
            .with_attribute(AttributeConfig::var_len("title").compress_offset(true))
            .with_attribute(AttributeConfig::fixed("price", 8).updatable(true))
            .with_summary()
            .with_sub_schema(
                Schema::new("skus", SchemaVersionId::new(1))
                    .with_attribute(AttributeConfig::var_len("color")),
            )
    }

    #[test]
    fn store_and_load() {
        let dir = InMemoryDirectory::new();
        let schema = product_schema();
        schema.store(&dir).unwrap();

        assert!(dir.exists("schema.json.1").unwrap());
        let loaded = Schema::load(&dir, SchemaVersionId::new(1)).unwrap();
        assert_eq!(loaded, schema);
        assert!(loaded.has_sub_schema());
    }

    #[test]
    fn attribute_lookup() {
        let schema = product_schema();
        assert_eq!(
            schema.attribute("price").unwrap().kind,
            AttributeKind::Fixed { width: 8 }
        );
        let err = schema.attribute("missing").unwrap_err();
        assert!(matches!(err, CoreError::FieldNotFound { .. }));
    }

    #[test]
    fn validation() {
        let dup = Schema::new("t", SchemaVersionId::new(0))
            .with_attribute(AttributeConfig::var_len("a"))
            .with_attribute(AttributeConfig::var_len("a"));
        assert!(dup.validate().is_err());

        let zero = Schema::new("t", SchemaVersionId::new(0))
            .with_attribute(AttributeConfig::fixed("a", 0));
        assert!(zero.validate().is_err());

        let nested = Schema::new("t", SchemaVersionId::new(0)).with_sub_schema(
            Schema::new("s", SchemaVersionId::new(0))
                .with_sub_schema(Schema::new("x", SchemaVersionId::new(0))),
        );
        assert!(nested.validate().is_err());

        assert!(product_schema().validate().is_ok());
    }

    #[test]
    fn load_rejects_mismatched_id() {
        let dir = InMemoryDirectory::new();
        let schema = Schema::new("t", SchemaVersionId::new(3));
        dir.write("schema.json.4", &serde_json::to_vec(&schema).unwrap())
            .unwrap();
        assert!(Schema::load(&dir, SchemaVersionId::new(4)).is_err());
    }
}
