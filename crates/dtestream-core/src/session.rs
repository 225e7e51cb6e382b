use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::config::{DatasetProfile, GridKind, StreamerConfig};
use crate::error::{StreamError, StreamResult};
use crate::grid::Grid;
use crate::index::FrameIndex;
use crate::memory::{MemoryGuard, ProcMeminfo};
use crate::metadata::{BoundingBox, FrameRecord, MetadataSource, StreamDescriptor, StreamQuery};
use crate::video::{
    DataFrame, DecoderSettings, EndReason, FrameByteSource, SeekableFrameDecoder,
};

/// A seekable, forward-only view of one remote data stream.
///
/// Metadata is fetched once when the session is opened. Each seek starts a fresh frame
/// sequence; dropping the session stops the decoder.
pub struct DteStreamSession {
    profile: DatasetProfile,
    /// Descriptive metadata. Its frame list lives in `index`.
    descriptor: StreamDescriptor,
    index: FrameIndex,
    decoder: SeekableFrameDecoder,
}

impl DteStreamSession {
    /// Fetch metadata for `query` and position the decoder on its first frame.
    pub fn open(
        metadata: &dyn MetadataSource,
        source: Box<dyn FrameByteSource>,
        config: &StreamerConfig,
        profile: DatasetProfile,
        query: &StreamQuery,
        token: &str,
    ) -> StreamResult<Self> {
        info!(
            profile = profile.name,
            subset = %query.subset,
            variable = %query.variable,
            start = %query.start,
            end = %query.end,
            "opening stream session"
        );
        let descriptor = metadata.fetch(&profile, query, token)?;
        Self::from_descriptor(descriptor, profile, source, config)
    }

    /// Build a session from an already fetched descriptor, guarding memory with
    /// `/proc/meminfo` when the config enables it.
    pub fn from_descriptor(
        descriptor: StreamDescriptor,
        profile: DatasetProfile,
        source: Box<dyn FrameByteSource>,
        config: &StreamerConfig,
    ) -> StreamResult<Self> {
        let guard = config
            .memory_threshold
            .map(|threshold| MemoryGuard::new(Box::new(ProcMeminfo), threshold));
        Self::with_memory_guard(descriptor, profile, source, config.fps, guard)
    }

    pub fn with_memory_guard(
        mut descriptor: StreamDescriptor,
        profile: DatasetProfile,
        source: Box<dyn FrameByteSource>,
        fps: f64,
        memory_guard: Option<MemoryGuard>,
    ) -> StreamResult<Self> {
        if fps.is_nan() || fps <= 0.0 {
            return Err(StreamError::InvalidMetadata(format!("fps must be positive, got {fps}")));
        }

        let index = FrameIndex::new(std::mem::take(&mut descriptor.frames))?;
        let settings = DecoderSettings {
            fps,
            sample_format: profile.sample_format,
            width: descriptor.width,
            height: descriptor.height,
            vertical_flip: profile.requires_vertical_flip,
        };
        let decoder = SeekableFrameDecoder::new(
            source,
            descriptor.stream_locator.clone(),
            settings,
            memory_guard,
        );

        let mut session = Self {
            profile,
            descriptor,
            index,
            decoder,
        };
        session.seek_to_frame(session.index.first_frame_number())?;

        info!(
            frames = session.index.len(),
            first = %session.first_timestamp(),
            last = %session.last_timestamp(),
            "stream session ready"
        );
        Ok(session)
    }

    /// Jump to the frame at `timestamp`, or the closest one before it.
    ///
    /// Returns false, leaving the current sequence untouched, when `timestamp` is outside
    /// the stream's time range.
    pub fn seek_to_date(&mut self, timestamp: NaiveDateTime) -> StreamResult<bool> {
        let Some(frame_number) = self.index.locate_by_time(timestamp) else {
            info!(%timestamp, "seek target outside stream range");
            return Ok(false);
        };
        debug!(%timestamp, frame_number, "seek target resolved");
        self.seek_to_frame(frame_number)?;
        Ok(true)
    }

    /// Restart the frame sequence at `frame_number`.
    pub fn seek_to_frame(&mut self, frame_number: u32) -> StreamResult<()> {
        self.decoder.seek(&self.index, frame_number)
    }

    /// Next frame of the current sequence, or None when it has ended.
    pub fn next_frame(&mut self) -> StreamResult<Option<DataFrame>> {
        self.decoder.next_frame(&self.index)
    }

    /// Iterate over the rest of the current sequence.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { session: self }
    }

    /// Frame number the next call to [`next_frame`](Self::next_frame) decodes.
    pub fn current_frame_number(&self) -> u32 {
        self.decoder.cursor()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.decoder.end_reason()
    }

    pub fn profile(&self) -> &DatasetProfile {
        &self.profile
    }

    pub fn records(&self) -> &[FrameRecord] {
        self.index.records()
    }

    pub fn frame_count(&self) -> usize {
        self.index.len()
    }

    pub fn first_timestamp(&self) -> NaiveDateTime {
        self.index.first().timestamp
    }

    pub fn last_timestamp(&self) -> NaiveDateTime {
        self.index.last().timestamp
    }

    pub fn unit(&self) -> &str {
        &self.descriptor.unit
    }

    pub fn name(&self) -> &str {
        &self.descriptor.parameter_name
    }

    pub fn short_name(&self) -> &str {
        &self.descriptor.parameter_short_name
    }

    pub fn type_of_level(&self) -> &str {
        &self.descriptor.level_type
    }

    /// Samples per row.
    pub fn nx(&self) -> u32 {
        self.descriptor.width
    }

    /// Rows per frame.
    pub fn ny(&self) -> u32 {
        self.descriptor.height
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.descriptor.extent.map(|e| e.bbox())
    }

    /// Sample coordinates in the form the dataset family provides them.
    pub fn grid(&self) -> Option<Grid> {
        let extent = self.descriptor.extent?;
        Some(match self.profile.grid_kind {
            GridKind::Linspace => Grid::lon_lat(&extent, self.nx(), self.ny()),
            GridKind::Bbox => Grid::Bbox(extent.bbox()),
        })
    }
}

/// Borrowing iterator over a session's current frame sequence.
pub struct Frames<'a> {
    session: &'a mut DteStreamSession,
}

impl Iterator for Frames<'_> {
    type Item = StreamResult<DataFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.session.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use chrono::NaiveDate;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::datasets::{CLIMATE, EXTREMES, SENTINEL_3};
    use crate::metadata::SpatialExtent;
    use crate::video::decoder::testing::{gray12_frame, MemorySource, SourceLog};

    const FPS: f64 = 25.0;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    /// Frames 101..=103, one second apart, with distinct rescale bounds.
    fn descriptor() -> StreamDescriptor {
        let frames = (0..3u32)
            .map(|i| FrameRecord {
                frame_number: 101 + i,
                timestamp: ts(&format!("2024-01-01T00:00:0{i}")),
                min_value: 100.0 * i as f64,
                max_value: 100.0 * i as f64 + 1.0,
                extra: BTreeMap::from([("satellite".to_string(), format!("S3{i}"))]),
            })
            .collect();
        StreamDescriptor {
            stream_locator: "https://cdn.example/t2m.mp4".to_string(),
            width: 2,
            height: 2,
            extent: Some(SpatialExtent {
                lon_start: 0.0,
                lon_end: 10.0,
                lat_start: 5.0,
                lat_end: -5.0,
            }),
            unit: "K".to_string(),
            parameter_name: "2 metre temperature".to_string(),
            parameter_short_name: "2t".to_string(),
            level_type: "heightAboveGround".to_string(),
            frames,
        }
    }

    /// Raw frames for stream positions 0..=102 so that img_number 101..=103 exist.
    fn source() -> (MemorySource, Rc<RefCell<SourceLog>>) {
        MemorySource::new((0..103).map(|_| gray12_frame(4, 0)).collect(), FPS)
    }

    fn session() -> (DteStreamSession, Rc<RefCell<SourceLog>>) {
        let (source, log) = source();
        let s = DteStreamSession::with_memory_guard(descriptor(), CLIMATE, Box::new(source), FPS, None)
            .unwrap();
        (s, log)
    }

    struct FakeMetadata(StreamResult<StreamDescriptor>);

    impl MetadataSource for FakeMetadata {
        fn fetch(&self, _: &DatasetProfile, _: &StreamQuery, _: &str) -> StreamResult<StreamDescriptor> {
            match &self.0 {
                Ok(d) => Ok(d.clone()),
                Err(_) => Err(StreamError::NotFound("no data".to_string())),
            }
        }
    }

    fn query() -> StreamQuery {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        StreamQuery {
            subset: "Climate DT".to_string(),
            variable: "2t".to_string(),
            start: day.and_hms_opt(0, 0, 0).unwrap(),
            end: day.and_hms_opt(1, 0, 0).unwrap(),
        }
    }

    #[test]
    #[traced_test]
    fn construction_seeks_to_first_frame() {
        let (mut s, log) = session();
        assert_eq!(s.current_frame_number(), 101);
        assert_eq!(log.borrow().spawns.len(), 1);
        assert!((log.borrow().spawns[0].seek_seconds - 100.0 / FPS).abs() < 1e-9);

        let numbers: Vec<u32> = s.frames().map(|f| f.unwrap().frame_number).collect();
        assert_eq!(numbers, vec![101, 102, 103]);
    }

    #[test]
    #[traced_test]
    fn seek_to_date_scenario() {
        let (mut s, _log) = session();

        assert!(s.seek_to_date(ts("2024-01-01T00:00:01")).unwrap());
        let frame = s.next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_number, 102);
        // Raw samples are 0, so every value sits on the frame's min bound.
        assert!(frame.values.iter().all(|v| *v == 100.0));

        assert!(!s.seek_to_date(ts("2023-12-31T00:00:00")).unwrap());
        // A rejected seek leaves the running sequence alone.
        assert_eq!(s.next_frame().unwrap().unwrap().frame_number, 103);

        assert!(s.seek_to_date(ts("2024-01-01T00:00:02")).unwrap());
        let last = s.next_frame().unwrap().unwrap();
        assert_eq!(last.frame_number, 103);
        assert_eq!(last.timestamp, s.last_timestamp());
        assert!(s.next_frame().unwrap().is_none());
        assert_eq!(s.end_reason(), Some(EndReason::Exhausted));
    }

    #[test]
    fn seek_after_range_is_false() {
        let (mut s, log) = session();
        assert!(!s.seek_to_date(ts("2024-01-01T00:00:03")).unwrap());
        assert_eq!(log.borrow().spawns.len(), 1);
    }

    #[test]
    fn repeated_seeks_keep_one_decoder_alive() {
        let (mut s, log) = session();
        for t in ["2024-01-01T00:00:02", "2024-01-01T00:00:00", "2024-01-01T00:00:01", "2024-01-01T00:00:01"] {
            assert!(s.seek_to_date(ts(t)).unwrap());
            let log = log.borrow();
            assert_eq!(log.alive(), 1, "after seeking to {t}");
        }
        assert_eq!(log.borrow().spawns.len(), 5);
        assert_eq!(log.borrow().terminations, 4);

        drop(s);
        assert_eq!(log.borrow().alive(), 0);
    }

    #[test]
    fn seek_to_frame_out_of_range_errors() {
        let (mut s, _log) = session();
        assert!(matches!(s.seek_to_frame(104), Err(StreamError::OutOfRange { .. })));
        assert!(matches!(s.seek_to_frame(100), Err(StreamError::OutOfRange { .. })));
    }

    #[test]
    #[traced_test]
    fn empty_stream_yields_nothing() {
        let (source, _log) = MemorySource::new(vec![], FPS);
        let mut s =
            DteStreamSession::with_memory_guard(descriptor(), CLIMATE, Box::new(source), FPS, None)
                .unwrap();
        assert_eq!(s.frames().count(), 0);
        assert_eq!(s.end_reason(), Some(EndReason::EmptyStream));
    }

    #[test]
    fn carries_extra_fields_and_accessors() {
        let (source, _log) = source();
        let mut s =
            DteStreamSession::with_memory_guard(descriptor(), SENTINEL_3, Box::new(source), FPS, None)
                .unwrap();
        let frame = s.next_frame().unwrap().unwrap();
        assert_eq!(frame.extra.get("satellite").map(String::as_str), Some("S30"));

        assert_eq!(s.unit(), "K");
        assert_eq!(s.name(), "2 metre temperature");
        assert_eq!(s.short_name(), "2t");
        assert_eq!(s.type_of_level(), "heightAboveGround");
        assert_eq!((s.nx(), s.ny()), (2, 2));
        assert_eq!(s.frame_count(), 3);
        assert_eq!(
            s.grid(),
            Some(Grid::Bbox(BoundingBox {
                min_lon: 0.0,
                min_lat: -5.0,
                max_lon: 10.0,
                max_lat: 5.0,
            }))
        );
    }

    #[test]
    fn linspace_grid_for_climate_profiles() {
        let (s, _log) = session();
        match s.grid() {
            Some(Grid::LonLat { lons, lats }) => {
                assert_eq!(lons, vec![0.0, 10.0]);
                assert_eq!(lats, vec![5.0, -5.0]);
            }
            other => panic!("expected lon/lat grid, got {other:?}"),
        }
    }

    #[test]
    fn flip_follows_profile() {
        let (source, _log) = source();
        let s = DteStreamSession::with_memory_guard(descriptor(), EXTREMES, Box::new(source), FPS, None)
            .unwrap();
        assert!(s.profile().requires_vertical_flip);
    }

    #[test]
    fn open_fetches_metadata_once() {
        let (source, log) = source();
        let metadata = FakeMetadata(Ok(descriptor()));
        let config = StreamerConfig {
            memory_threshold: None,
            ..StreamerConfig::default()
        };
        let s = DteStreamSession::open(&metadata, Box::new(source), &config, CLIMATE, &query(), "tok")
            .unwrap();
        assert_eq!(s.frame_count(), 3);
        assert_eq!(log.borrow().spawns[0].locator, "https://cdn.example/t2m.mp4");
    }

    #[test]
    fn open_fails_without_metadata() {
        let (source, log) = source();
        let metadata = FakeMetadata(Err(StreamError::EmptyStream));
        let config = StreamerConfig::default();
        let result =
            DteStreamSession::open(&metadata, Box::new(source), &config, CLIMATE, &query(), "tok");
        assert!(matches!(result, Err(StreamError::NotFound(_))));
        assert!(log.borrow().spawns.is_empty());
    }

    #[test]
    fn access_denied_fails_construction() {
        let (mut source, _log) = source();
        source.deny = true;
        let result =
            DteStreamSession::with_memory_guard(descriptor(), CLIMATE, Box::new(source), FPS, None);
        assert!(matches!(result, Err(StreamError::AccessDenied(_))));
    }
}
