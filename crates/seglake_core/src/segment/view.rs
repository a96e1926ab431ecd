//! Runtime composition of a version with building segments.

use super::{
    BuildingSegmentIterator, BuiltSegmentIterator, PartitionSegmentIterator, Segment, SegmentData,
    SegmentInfo, SegmentKind,
};
use crate::dir::segment_path;
use crate::error::{CoreError, CoreResult};
use crate::types::{DocId, DocIdRange, SegmentId};
use crate::version::Version;
use seglake_storage::Directory;

/// A version's built segments followed by building segments, as one doc
/// id space.
///
/// Construction validates the segment lists, so iteration never has to
/// skip or reorder anything.
#[derive(Debug, Clone)]
pub struct PartitionView {
    version: Version,
    built: Vec<SegmentData>,
    building: Vec<SegmentData>,
    sub: Option<Box<PartitionView>>,
}

fn check_ascending(segments: &[SegmentData], what: &str) -> CoreResult<()> {
    for pair in segments.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(CoreError::invalid_segment_set(format!(
                "duplicate {what} segment {}",
                pair[0].id
            )));
        }
        if pair[0].id > pair[1].id {
            return Err(CoreError::invalid_segment_set(format!(
                "{what} segments out of order: {} before {}",
                pair[0].id, pair[1].id
            )));
        }
    }
    Ok(())
}

impl PartitionView {
    /// Composes a view.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSegmentSet` if:
    /// - built segments are not strictly ascending or don't match the
    ///   version's segment list one for one
    /// - building segments are not strictly ascending or not newer than
    ///   every built segment
    /// - a segment has the wrong kind
    /// - the total doc count overflows the doc id space
    pub fn new(
        version: Version,
        built: Vec<SegmentData>,
        building: Vec<SegmentData>,
    ) -> CoreResult<Self> {
        check_ascending(&built, "built")?;
        check_ascending(&building, "building")?;

        for data in &built {
            if data.kind != SegmentKind::Built {
                return Err(CoreError::invalid_segment_set(format!(
                    "{} listed as built but is building",
                    data.id
                )));
            }
            if !version.contains(data.id) {
                return Err(CoreError::invalid_segment_set(format!(
                    "{} is not in version {}",
                    data.id,
                    version.version_id()
                )));
            }
        }
        if built.len() != version.segment_count() {
            let missing = version
                .segments()
                .iter()
                .find(|id| built.binary_search_by_key(*id, |d| d.id).is_err());
            return Err(CoreError::invalid_segment_set(format!(
                "version {} segment {} has no data",
                version.version_id(),
                missing.map_or_else(|| "?".to_string(), ToString::to_string)
            )));
        }

        let max_built = version.last_segment();
        for data in &building {
            if data.kind != SegmentKind::Building {
                return Err(CoreError::invalid_segment_set(format!(
                    "{} listed as building but is built",
                    data.id
                )));
            }
            if max_built.is_some_and(|max| data.id <= max) {
                return Err(CoreError::invalid_segment_set(format!(
                    "building {} is not newer than built segments",
                    data.id
                )));
            }
        }

        let total = built
            .iter()
            .chain(&building)
            .try_fold(0u32, |acc, d| acc.checked_add(d.doc_count));
        if total.is_none() {
            return Err(CoreError::invalid_segment_set(
                "total doc count overflows the doc id space",
            ));
        }

        Ok(Self {
            version,
            built,
            building,
            sub: None,
        })
    }

    /// Opens the built segments of `version` from the partition root.
    ///
    /// With `with_sub`, a sub-partition view over the same segments is
    /// built from their sub doc counts.
    ///
    /// # Errors
    ///
    /// Returns storage errors for a missing segment and the errors of
    /// [`Self::new`].
    pub fn open(
        dir: &dyn Directory,
        version: Version,
        building: Vec<SegmentData>,
        with_sub: bool,
    ) -> CoreResult<Self> {
        let built = version
            .segments()
            .iter()
            .map(|&id| {
                let info = SegmentInfo::load(dir, &segment_path(id)).map_err(|e| {
                    if e.is_not_found() {
                        CoreError::invalid_segment_set(format!(
                            "version {} references missing {id}",
                            version.version_id()
                        ))
                    } else {
                        e
                    }
                })?;
                Ok(SegmentData::built(id, &info))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        let view = Self::new(version, built, building)?;
        if with_sub {
            view.with_sub_view()
        } else {
            Ok(view)
        }
    }

    /// Attaches the sub-partition view derived from sub doc counts.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::new`] for the sub space.
    pub fn with_sub_view(mut self) -> CoreResult<Self> {
        let built = self.built.iter().map(SegmentData::sub_segment).collect();
        let building = self.building.iter().map(SegmentData::sub_segment).collect();
        let sub = Self::new(self.version.clone(), built, building)?;
        self.sub = Some(Box::new(sub));
        Ok(self)
    }

    /// The version this view was built from.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Built segment descriptions, ascending.
    #[must_use]
    pub fn built_segments(&self) -> &[SegmentData] {
        &self.built
    }

    /// Building segment descriptions, ascending.
    #[must_use]
    pub fn building_segments(&self) -> &[SegmentData] {
        &self.building
    }

    /// The sub-partition view, if attached.
    #[must_use]
    pub fn sub_view(&self) -> Option<&PartitionView> {
        self.sub.as_deref()
    }

    /// Iterates all segments.
    #[must_use]
    pub fn iter(&self) -> PartitionSegmentIterator<'_> {
        PartitionSegmentIterator::new(&self.built, &self.building)
    }

    /// Iterates built segments only.
    #[must_use]
    pub fn built_iter(&self) -> BuiltSegmentIterator<'_> {
        BuiltSegmentIterator::new(&self.built)
    }

    /// Iterates building segments only, positioned after the built ones.
    #[must_use]
    pub fn building_iter(&self) -> BuildingSegmentIterator<'_> {
        BuildingSegmentIterator::new(&self.building, self.built_doc_count())
    }

    /// Documents in built segments.
    #[must_use]
    pub fn built_doc_count(&self) -> DocId {
        self.built.iter().map(|d| d.doc_count).sum()
    }

    /// Documents in all segments.
    #[must_use]
    pub fn total_doc_count(&self) -> DocId {
        self.built_doc_count() + self.building.iter().map(|d| d.doc_count).sum::<DocId>()
    }

    /// The positioned segment with id `id`.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<Segment> {
        self.iter().find(|s| s.id == id)
    }

    /// Global doc ids of segment `id`.
    #[must_use]
    pub fn segment_range(&self, id: SegmentId) -> Option<DocIdRange> {
        self.segment(id).map(|s| s.doc_id_range())
    }

    /// Finds the segment owning `global` and the local doc id.
    #[must_use]
    pub fn locate(&self, global: DocId) -> Option<(Segment, DocId)> {
        self.iter()
            .find_map(|s| s.to_local(global).map(|local| (s, local)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SchemaVersionId, VersionId};
    use seglake_storage::InMemoryDirectory;

    fn version(ids: &[u32]) -> Version {
        Version::new(
            VersionId::new(1),
            SchemaVersionId::new(0),
            ids.iter().copied().map(SegmentId::new),
        )
    }

    fn built(id: u32, docs: u32) -> SegmentData {
        SegmentData {
            id: SegmentId::new(id),
            kind: SegmentKind::Built,
            doc_count: docs,
            sub_doc_count: docs * 2,
        }
    }

    fn building(id: u32, docs: u32) -> SegmentData {
        SegmentData {
            kind: SegmentKind::Building,
            ..built(id, docs)
        }
    }

    fn invalid(result: CoreResult<PartitionView>) -> bool {
        matches!(result, Err(CoreError::InvalidSegmentSet { .. }))
    }

    #[test]
    fn composes_built_and_building() {
        let view = PartitionView::new(
            version(&[0, 1]),
            vec![built(0, 100), built(1, 50)],
            vec![building(4, 7)],
        )
        .unwrap();

        assert_eq!(view.total_doc_count(), 157);
        assert_eq!(view.segment_range(SegmentId::new(4)), Some(150..157));
        assert_eq!(view.building_iter().next().unwrap().base_doc_id, 150);
        let (segment, local) = view.locate(120).unwrap();
        assert_eq!(segment.id, SegmentId::new(1));
        assert_eq!(local, 20);
        assert!(view.locate(157).is_none());
    }

    #[test]
    fn rejects_duplicates_gaps_and_disorder() {
        assert!(invalid(PartitionView::new(
            version(&[0, 1]),
            vec![built(0, 1), built(0, 1)],
            vec![],
        )));
        assert!(invalid(PartitionView::new(
            version(&[0, 1]),
            vec![built(1, 1), built(0, 1)],
            vec![],
        )));
        // version lists 0,1,2 but only 0 and 2 have data
        assert!(invalid(PartitionView::new(
            version(&[0, 1, 2]),
            vec![built(0, 1), built(2, 1)],
            vec![],
        )));
        assert!(invalid(PartitionView::new(
            version(&[0]),
            vec![built(0, 1), built(3, 1)],
            vec![],
        )));
        assert!(invalid(PartitionView::new(
            version(&[0, 5]),
            vec![built(0, 1), built(5, 1)],
            vec![building(3, 1)],
        )));
        assert!(invalid(PartitionView::new(
            version(&[0]),
            vec![building(0, 1)],
            vec![],
        )));
        assert!(invalid(PartitionView::new(
            version(&[0, 1]),
            vec![built(0, u32::MAX), built(1, 1)],
            vec![],
        )));
    }

    #[test]
    fn sub_view_uses_sub_counts() {
        let view = PartitionView::new(version(&[0, 1]), vec![built(0, 3), built(1, 2)], vec![])
            .unwrap()
            .with_sub_view()
            .unwrap();
        let sub = view.sub_view().unwrap();
        assert_eq!(sub.total_doc_count(), 10);
        assert_eq!(sub.segment_range(SegmentId::new(1)), Some(6..10));
    }

    #[test]
    fn open_reads_segment_infos() {
        let dir = InMemoryDirectory::new();
        SegmentInfo::new(4, 0).store(&dir, "segment_0").unwrap();
        SegmentInfo::new(6, 0).store(&dir, "segment_2").unwrap();

        let view = PartitionView::open(&dir, version(&[0, 2]), vec![], false).unwrap();
        assert_eq!(view.segment_range(SegmentId::new(2)), Some(4..10));

        let err = PartitionView::open(&dir, version(&[0, 1]), vec![], false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSegmentSet { .. }));
    }
}
