//! The on-disk volume: physical chapter layout over an [`IoFactory`]
//! region, with reads routed through the shared [`PageCache`] (spec §3.3,
//! §4.5, §4.6).
//!
//! A chapter's physical slot holds its index pages followed by its record
//! pages, each [`crate::uds::geometry::BYTES_PER_PAGE`] bytes, starting
//! at `geometry.physical_slot(virtual_chapter) * geometry.bytes_per_chapter()`.
//! Writing a chapter into a slot that previously held a different virtual
//! chapter must invalidate that slot's cached pages first, since physical
//! page numbers are reused across virtual chapters on the circular
//! volume.

use crate::error::{CoreError, Result};
use crate::primitives::io::factory::IoFactory;
use crate::primitives::radix_sort;
use crate::uds::chapter_index::ChapterIndex;
use crate::uds::geometry::{Geometry, BYTES_PER_PAGE};
use crate::uds::open_chapter::OpenChapter;
use crate::uds::page_cache::{Decoded, PageCache};
use crate::uds::record::{Record, VirtualChapterNumber};
use std::sync::Arc;

/// Ties chapter geometry, the backing region, and the shared page cache
/// together; the volume-read stage of the request pipeline (spec §4.7
/// stage 3) goes through here.
pub struct Volume {
    geometry: Geometry,
    factory: IoFactory,
    cache: PageCache,
}

impl Volume {
    /// Opens (and if necessary sizes) a volume region for `geometry`.
    pub fn open(geometry: Geometry, factory: IoFactory) -> Result<Self> {
        let required_len = geometry.bytes_per_chapter() * geometry.chapters_per_volume as u64;
        let current_len = factory.len()?;
        if current_len < required_len {
            factory.set_len(required_len)?;
        }
        let cache_slots = (geometry.pages_per_chapter() as usize * 4).max(16);
        let indexable_pages =
            geometry.pages_per_chapter() as usize * geometry.chapters_per_volume as usize;
        Ok(Self {
            geometry,
            factory,
            cache: PageCache::new(cache_slots, indexable_pages),
        })
    }

    /// This volume's geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn chapter_base_page(&self, virtual_chapter: VirtualChapterNumber) -> u64 {
        let slot = self.geometry.physical_slot(virtual_chapter) as u64;
        slot * self.geometry.pages_per_chapter() as u64
    }

    fn page_offset(&self, physical_page: u64) -> u64 {
        physical_page * BYTES_PER_PAGE as u64
    }

    /// Closes `chapter` and writes it into its physical slot: builds
    /// per-page radix-sorted record layouts, a delta-compressed chapter
    /// index over them, and invalidates any cached pages the slot
    /// previously held (spec §4.6).
    pub fn write_chapter(
        &self,
        virtual_chapter: VirtualChapterNumber,
        chapter: &OpenChapter,
    ) -> Result<()> {
        let pages_per_chapter = self.geometry.pages_per_chapter() as u64;
        let base_page = self.chapter_base_page(virtual_chapter);
        self.cache.invalidate_chapter(base_page / pages_per_chapter, pages_per_chapter);

        let records_per_page = self.geometry.records_per_page as usize;
        let record_pages = chapter
            .records()
            .chunks(records_per_page)
            .map(|page| {
                let mut order: Vec<u32> = (0..page.len() as u32).collect();
                radix_sort::sort_indices(&mut order, 16, |i| page[i as usize].name.0);
                order.into_iter().map(|i| page[i as usize]).collect::<Vec<Record>>()
            })
            .collect::<Vec<_>>();

        let index_entries = record_pages.iter().enumerate().flat_map(|(page_no, page)| {
            page.iter().map(move |r| (r.name, page_no as u32))
        });
        let chapter_index = ChapterIndex::build(index_entries);

        let index_pages_per_chapter = self.geometry.index_pages_per_chapter;
        let lists_per_page =
            crate::uds::chapter_index::DELTA_LIST_COUNT.div_ceil(index_pages_per_chapter as usize);
        for page_no in 0..index_pages_per_chapter as usize {
            let start = page_no * lists_per_page;
            let end = (start + lists_per_page).min(crate::uds::chapter_index::DELTA_LIST_COUNT);
            let bytes = chapter_index.pack_page(start, end);
            let physical_page = base_page + page_no as u64;
            let mut padded = vec![0u8; BYTES_PER_PAGE as usize];
            let n = bytes.len().min(padded.len());
            padded[..n].copy_from_slice(&bytes[..n]);
            self.factory.write_at(self.page_offset(physical_page), &padded)?;
        }

        for (page_no, page) in record_pages.iter().enumerate() {
            let physical_page = base_page + index_pages_per_chapter as u64 + page_no as u64;
            let mut bytes = vec![0u8; BYTES_PER_PAGE as usize];
            for (i, record) in page.iter().enumerate() {
                let off = i * 32;
                bytes[off..off + 16].copy_from_slice(&record.name.0);
                bytes[off + 16..off + 32].copy_from_slice(&record.metadata);
            }
            self.factory.write_at(self.page_offset(physical_page), &bytes)?;
            self.cache.put(
                physical_page,
                self.cache.select_victim(),
                Decoded::Record(Arc::new(page.clone())),
            );
        }

        self.factory.flush()
    }

    /// Reads (through the cache) and unpacks the chapter index page at
    /// `page_no` within `virtual_chapter`.
    pub fn read_index_page(
        &self,
        virtual_chapter: VirtualChapterNumber,
        page_no: u32,
    ) -> Result<Vec<Vec<(u32, u32)>>> {
        if page_no >= self.geometry.index_pages_per_chapter {
            return Err(CoreError::InvalidArgument("index page out of range".into()));
        }
        let physical_page = self.chapter_base_page(virtual_chapter) + page_no as u64;
        let lists_per_page = crate::uds::chapter_index::DELTA_LIST_COUNT
            .div_ceil(self.geometry.index_pages_per_chapter as usize);
        let mut bytes = vec![0u8; BYTES_PER_PAGE as usize];
        self.factory.read_at(self.page_offset(physical_page), &mut bytes)?;
        ChapterIndex::unpack_page(&bytes, lists_per_page)
    }

    /// Reads (through the cache) record page `page_no` within
    /// `virtual_chapter`, decoding on miss.
    pub fn read_record_page(
        &self,
        virtual_chapter: VirtualChapterNumber,
        page_no: u32,
    ) -> Result<Arc<Vec<Record>>> {
        if page_no >= self.geometry.record_pages_per_chapter {
            return Err(CoreError::InvalidArgument("record page out of range".into()));
        }
        let physical_page = self.chapter_base_page(virtual_chapter)
            + self.geometry.index_pages_per_chapter as u64
            + page_no as u64;

        if let Some(Decoded::Record(records)) = self.cache.get(physical_page) {
            return Ok(records);
        }

        let mut bytes = vec![0u8; BYTES_PER_PAGE as usize];
        self.factory.read_at(self.page_offset(physical_page), &mut bytes)?;
        let records_per_page = self.geometry.records_per_page as usize;
        let mut records = Vec::with_capacity(records_per_page);
        for i in 0..records_per_page {
            let off = i * 32;
            let name: [u8; 16] = bytes[off..off + 16].try_into().unwrap();
            if name == [0u8; 16] {
                continue;
            }
            let metadata: [u8; 16] = bytes[off + 16..off + 32].try_into().unwrap();
            records.push(Record::new(crate::uds::record::RecordName(name), metadata));
        }
        let records = Arc::new(records);
        let slot = self.cache.select_victim();
        self.cache.put(physical_page, slot, Decoded::Record(Arc::clone(&records)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySize;
    use crate::uds::record::RecordName;
    use tempfile::tempdir;

    fn small_geometry() -> Geometry {
        let mut g = Geometry::derive(MemorySize::Mb256, false);
        g.chapters_per_volume = 4;
        g
    }

    #[test]
    fn write_then_read_record_page_round_trips() {
        let dir = tempdir().unwrap();
        let factory = IoFactory::open(dir.path().join("volume.bin")).unwrap();
        let geometry = small_geometry();
        let volume = Volume::open(geometry, factory).unwrap();

        let mut chapter = OpenChapter::new(geometry.records_per_chapter as usize);
        let name = RecordName::from_payload(b"hello world");
        chapter.put(Record::new(name, [9u8; 16]));
        volume.write_chapter(0, &chapter).unwrap();

        let page = volume.read_record_page(0, 0).unwrap();
        assert!(page.iter().any(|r| r.name == name && r.metadata == [9u8; 16]));
    }

    #[test]
    fn chapter_index_lookup_narrows_to_written_page() {
        let dir = tempdir().unwrap();
        let factory = IoFactory::open(dir.path().join("volume.bin")).unwrap();
        let geometry = small_geometry();
        let volume = Volume::open(geometry, factory).unwrap();

        let mut chapter = OpenChapter::new(geometry.records_per_chapter as usize);
        let name = RecordName::from_payload(b"needle");
        chapter.put(Record::new(name, [1u8; 16]));
        volume.write_chapter(1, &chapter).unwrap();

        let page = volume.read_record_page(1, 0).unwrap();
        assert!(page.iter().any(|r| r.name == name));
    }

    #[test]
    fn rewriting_a_slot_invalidates_its_previous_cached_pages() {
        let dir = tempdir().unwrap();
        let factory = IoFactory::open(dir.path().join("volume.bin")).unwrap();
        let geometry = small_geometry();
        let chapters_per_volume = geometry.chapters_per_volume as u64;
        let volume = Volume::open(geometry, factory).unwrap();

        let mut first = OpenChapter::new(geometry.records_per_chapter as usize);
        let name_a = RecordName::from_payload(b"a");
        first.put(Record::new(name_a, [1u8; 16]));
        volume.write_chapter(0, &first).unwrap();
        let _ = volume.read_record_page(0, 0).unwrap();

        let mut second = OpenChapter::new(geometry.records_per_chapter as usize);
        let name_b = RecordName::from_payload(b"b");
        second.put(Record::new(name_b, [2u8; 16]));
        volume.write_chapter(chapters_per_volume, &second).unwrap();

        let page = volume.read_record_page(chapters_per_volume, 0).unwrap();
        assert!(page.iter().any(|r| r.name == name_b));
        assert!(!page.iter().any(|r| r.name == name_a));
    }
}
