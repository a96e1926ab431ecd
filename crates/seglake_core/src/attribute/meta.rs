//! Stored format flags of an attribute.

use crate::dir::ATTRIBUTE_META_FILE;
use crate::error::{CoreError, CoreResult};
use crate::offset::OffsetFormat;
use seglake_storage::path::join;
use seglake_storage::Directory;
use serde::{Deserialize, Serialize};

/// Contents of `attribute.meta`.
///
/// Written once when the attribute is dumped. Readers consult it to pick
/// the offset encoding instead of guessing from the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMeta {
    /// Offsets use the compressed encoding.
    pub compress: bool,
    /// Offsets are 64 bits wide.
    pub wide: bool,
    /// In-place updates are allowed.
    pub updatable: bool,
    /// Documents in the attribute.
    pub doc_count: u32,
    /// Value width for fixed-length attributes; `None` for var-len.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_width: Option<u32>,
}

impl AttributeMeta {
    /// Offset format recorded in the meta.
    #[must_use]
    pub const fn offset_format(&self) -> OffsetFormat {
        OffsetFormat {
            compress: self.compress,
            wide: self.wide,
        }
    }

    /// Loads the meta of the attribute at `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is missing, or `Json` if it
    /// doesn't parse.
    pub fn load(dir: &dyn Directory, attr_path: &str) -> CoreResult<Self> {
        let bytes = dir.read(&join(attr_path, ATTRIBUTE_META_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes the meta of the attribute at `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn store(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        dir.write(&join(attr_path, ATTRIBUTE_META_FILE), &bytes)?;
        Ok(())
    }

    /// Checks that the meta describes `doc_count` documents.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` on a mismatch.
    pub fn expect_doc_count(&self, doc_count: u32) -> CoreResult<()> {
        if self.doc_count != doc_count {
            return Err(CoreError::corrupt_format(format!(
                "attribute meta holds {} docs, segment has {doc_count}",
                self.doc_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_storage::InMemoryDirectory;

    #[test]
    fn store_and_load() {
        let dir = InMemoryDirectory::new();
        let meta = AttributeMeta {
            compress: true,
            wide: false,
            updatable: true,
            doc_count: 9,
            fixed_width: None,
        };
        meta.store(&dir, "segment_0/attribute/title").unwrap();

        let loaded = AttributeMeta::load(&dir, "segment_0/attribute/title").unwrap();
        assert_eq!(loaded, meta);
        assert!(loaded.offset_format().compress);
        loaded.expect_doc_count(9).unwrap();
        assert!(loaded.expect_doc_count(8).is_err());
    }

    #[test]
    fn missing_meta_is_not_found() {
        let dir = InMemoryDirectory::new();
        let err = AttributeMeta::load(&dir, "segment_0/attribute/title").unwrap_err();
        assert!(err.is_not_found());
    }
}
