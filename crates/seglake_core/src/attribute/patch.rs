//! Attribute patches.
//!
//! A patch holds "latest value wins" updates that a newer segment made to
//! docs of an older, already-built segment. It lives in the newer
//! segment's attribute directory as `patch/<source>_<target>.patch`.
//!
//! ## Format
//!
//! ```text
//! | magic "APAT" (4) | count (4) | (doc_id (4) | len (4) | bytes)* |
//! ```
//!
//! Entries are sorted by doc id.

use crate::dir::{parse_patch_file_name, patch_file_name, PATCH_DIR};
use crate::error::{CoreError, CoreResult};
use crate::offset::le_u32;
use crate::types::{DocId, SegmentId};
use seglake_storage::path::join;
use seglake_storage::Directory;
use std::collections::BTreeMap;

/// Magic bytes identifying a patch file.
pub const PATCH_MAGIC: [u8; 4] = *b"APAT";

/// Updates of one attribute against one target segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributePatch {
    values: BTreeMap<DocId, Vec<u8>>,
}

/// A patch file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    /// Segment whose updates the patch carries.
    pub source: SegmentId,
    /// Segment the updates apply to.
    pub target: SegmentId,
    /// Path of the file.
    pub path: String,
}

impl AttributePatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the new value of `doc_id`, replacing any earlier one.
    pub fn set(&mut self, doc_id: DocId, value: Vec<u8>) {
        self.values.insert(doc_id, value);
    }

    /// Returns the patched value of `doc_id`.
    #[must_use]
    pub fn get(&self, doc_id: DocId) -> Option<&[u8]> {
        self.values.get(&doc_id).map(Vec::as_slice)
    }

    /// Number of patched docs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no doc is patched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(doc_id, value)` in doc id order.
    pub fn iter(&self) -> impl Iterator<Item = (DocId, &[u8])> {
        self.values.iter().map(|(&doc, value)| (doc, value.as_slice()))
    }

    /// Folds in a patch from a newer source; its values win.
    pub fn merge_newer(&mut self, newer: &AttributePatch) {
        for (doc, value) in &newer.values {
            self.values.insert(*doc, value.clone());
        }
    }

    /// Encodes the patch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a value is longer than `u32::MAX`.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&PATCH_MAGIC);
        buf.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for (doc, value) in &self.values {
            let len = u32::try_from(value.len())
                .map_err(|_| CoreError::invalid_argument("patch value too long"))?;
            buf.extend_from_slice(&doc.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(value);
        }
        Ok(buf)
    }

    /// Decodes a patch.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` on a bad magic or a truncated body.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 8 || data[0..4] != PATCH_MAGIC {
            return Err(CoreError::corrupt_format("invalid patch header"));
        }
        let count = le_u32(data, 4);
        let mut values = BTreeMap::new();
        let mut pos = 8;
        for _ in 0..count {
            if data.len() < pos + 8 {
                return Err(CoreError::corrupt_format("patch entry header truncated"));
            }
            let doc = le_u32(data, pos);
            let len = le_u32(data, pos + 4) as usize;
            pos += 8;
            let value = data
                .get(pos..pos + len)
                .ok_or_else(|| CoreError::corrupt_format("patch value truncated"))?;
            values.insert(doc, value.to_vec());
            pos += len;
        }
        Ok(Self { values })
    }

    /// Loads the patch at `path`.
    ///
    /// # Errors
    ///
    /// Returns storage errors or `CorruptFormat`.
    pub fn load(dir: &dyn Directory, path: &str) -> CoreResult<Self> {
        Self::decode(&dir.read(path)?)
    }

    /// Writes the patch from `source` against `target` under `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn store(
        &self,
        dir: &dyn Directory,
        attr_path: &str,
        source: SegmentId,
        target: SegmentId,
    ) -> CoreResult<String> {
        let path = join(&join(attr_path, PATCH_DIR), &patch_file_name(source, target));
        dir.write(&path, &self.encode()?)?;
        Ok(path)
    }
}

/// Lists the patch files under an attribute directory, ordered by source
/// then target. A missing patch directory yields an empty list.
///
/// # Errors
///
/// Returns storage errors other than not-found.
pub fn list_patch_files(dir: &dyn Directory, attr_path: &str) -> CoreResult<Vec<PatchFile>> {
    let patch_dir = join(attr_path, PATCH_DIR);
    let names = match dir.list(&patch_dir) {
        Ok(names) => names,
        Err(e) if e.is_not_found() => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files: Vec<PatchFile> = names
        .iter()
        .filter_map(|name| {
            parse_patch_file_name(name).map(|(source, target)| PatchFile {
                source,
                target,
                path: join(&patch_dir, name),
            })
        })
        .collect();
    files.sort_by_key(|f| (f.source, f.target));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_storage::InMemoryDirectory;

    #[test]
    fn encode_decode() {
        let mut patch = AttributePatch::new();
        patch.set(9, b"nine".to_vec());
        patch.set(2, Vec::new());
        let decoded = AttributePatch::decode(&patch.encode().unwrap()).unwrap();
        assert_eq!(decoded, patch);
        assert_eq!(decoded.iter().map(|(d, _)| d).collect::<Vec<_>>(), vec![2, 9]);
    }

    #[test]
    fn decode_rejects_damage() {
        let mut patch = AttributePatch::new();
        patch.set(1, b"abc".to_vec());
        let bytes = patch.encode().unwrap();
        assert!(AttributePatch::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(AttributePatch::decode(b"XPAT\0\0\0\0").is_err());
    }

    #[test]
    fn newer_values_win() {
        let mut older = AttributePatch::new();
        older.set(1, b"old".to_vec());
        older.set(2, b"keep".to_vec());
        let mut newer = AttributePatch::new();
        newer.set(1, b"new".to_vec());

        older.merge_newer(&newer);
        assert_eq!(older.get(1), Some(&b"new"[..]));
        assert_eq!(older.get(2), Some(&b"keep"[..]));
    }

    #[test]
    fn store_and_list() {
        let dir = InMemoryDirectory::new();
        let attr = "segment_5/attribute/price";
        let mut patch = AttributePatch::new();
        patch.set(0, b"x".to_vec());
        patch.store(&dir, attr, SegmentId::new(5), SegmentId::new(3)).unwrap();
        patch.store(&dir, attr, SegmentId::new(5), SegmentId::new(1)).unwrap();
        dir.write(&join(attr, "patch/garbage"), b"").unwrap();

        let files = list_patch_files(&dir, attr).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].target, SegmentId::new(1));
        assert_eq!(AttributePatch::load(&dir, &files[1].path).unwrap(), patch);

        assert!(list_patch_files(&dir, "segment_9/attribute/price").unwrap().is_empty());
    }
}
