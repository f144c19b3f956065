//! Bounded traversal of slab page lists.
//!
//! A partial list is a circular doubly linked list threaded through
//! `struct page::lru`; the list head lives inside `struct kmem_cache_node`.
//! Every pointer comes from a frozen image that may be torn or corrupt, so the
//! walk is split in two:
//!
//! - [`PageListCursor`] produces candidate pages lazily and decides when the
//!   *structure* ends: back at the head, a repeated node, an address past the
//!   valid page range, or an unreadable word.
//! - [`BoundedListWalker`] consumes the cursor, accumulates object counts, and
//!   applies the accounting guard: if the running free count ever exceeds the
//!   running total (or a sum stops being representable) the whole walk is
//!   reported as `(0, 0)`.
//!
//! The stop reason travels with the numbers in [`WalkOutcome`]; it never
//! changes them.

use std::collections::HashSet;

use serde::Serialize;

use crate::counters::{CounterLayout, PageCounters};
use crate::layout::SlabLayout;
use crate::snapshot::{Address, SnapshotAccess};

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalkStop {
    /// Returned to the list head.
    Completed,
    /// Head is null, or the head links straight back to itself.
    Empty,
    /// The head word itself could not be read.
    HeadUnavailable,
    /// A link or counters word could not be read (or a link was null).
    Unavailable { address: Address },
    /// A node was reached twice.
    Cycle { address: Address },
    /// A node lies beyond the last valid page descriptor.
    OutOfRange { address: Address },
    /// Running totals became inconsistent; the walk's numbers were discarded.
    AccountingViolation { address: Address },
}

impl WalkStop {
    /// Anything other than a clean finish.
    #[must_use]
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, Self::Completed | Self::Empty)
    }

    /// Address that triggered the stop, when there is one.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        match *self {
            Self::Unavailable { address }
            | Self::Cycle { address }
            | Self::OutOfRange { address }
            | Self::AccountingViolation { address } => Some(address),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Empty => "empty",
            Self::HeadUnavailable => "head_unavailable",
            Self::Unavailable { .. } => "unavailable",
            Self::Cycle { .. } => "cycle",
            Self::OutOfRange { .. } => "out_of_range",
            Self::AccountingViolation { .. } => "accounting_violation",
        }
    }
}

/// Shape of the structure being walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListShape {
    /// Circular list; nodes are linked through a field at `link_offset`.
    Circular { link_offset: u64 },
    /// The head word points at a single page descriptor (a cpu's active page).
    Singleton,
}

/// One decoded page produced by the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageVisit {
    /// Address as found in the list (pointing at the link field).
    pub link: Address,
    /// Page descriptor base address.
    pub page: Address,
    pub counters: PageCounters,
}

/// Lazy, non-restartable sequence of page descriptors on one list.
pub struct PageListCursor<'a, S: SnapshotAccess + ?Sized> {
    snapshot: &'a S,
    head: Address,
    shape: ListShape,
    counters_offset: u64,
    layout: CounterLayout,
    max_address: Address,
    previous_page: Option<Address>,
    seen: HashSet<Address>,
    yielded: usize,
    stop: Option<WalkStop>,
}

impl<'a, S: SnapshotAccess + ?Sized> PageListCursor<'a, S> {
    pub fn new(
        snapshot: &'a S,
        head: Address,
        shape: ListShape,
        counters_offset: u64,
        layout: CounterLayout,
        max_address: Address,
    ) -> Self {
        Self {
            snapshot,
            head,
            shape,
            counters_offset,
            layout,
            max_address,
            previous_page: None,
            seen: HashSet::new(),
            yielded: 0,
            stop: None,
        }
    }

    /// Stop reason, once the cursor is exhausted.
    #[must_use]
    pub fn stop(&self) -> Option<WalkStop> {
        self.stop
    }

    fn finish(&mut self, stop: WalkStop) -> Option<PageVisit> {
        self.stop = Some(stop);
        None
    }

    fn decode(&mut self, link: Address, page: Address) -> Option<PageVisit> {
        let at = page.wrapping_add(self.counters_offset);
        match self.snapshot.read_u32(at) {
            Ok(word) => {
                self.previous_page = Some(page);
                self.yielded += 1;
                Some(PageVisit {
                    link,
                    page,
                    counters: self.layout.decode(word),
                })
            }
            Err(_) => self.finish(WalkStop::Unavailable { address: at }),
        }
    }

    fn next_circular(&mut self, link_offset: u64) -> Option<PageVisit> {
        let link = match self.previous_page {
            None => match self.snapshot.read_word(self.head) {
                Ok(0) => return self.finish(WalkStop::Empty),
                Ok(word) => word,
                Err(_) => return self.finish(WalkStop::HeadUnavailable),
            },
            Some(page) => {
                let at = page.wrapping_add(link_offset);
                match self.snapshot.read_word(at) {
                    Ok(word) => word,
                    Err(_) => return self.finish(WalkStop::Unavailable { address: at }),
                }
            }
        };

        if link == self.head {
            let stop = if self.yielded == 0 {
                WalkStop::Empty
            } else {
                WalkStop::Completed
            };
            return self.finish(stop);
        }
        if link == 0 {
            let at = self
                .previous_page
                .map_or(self.head, |p| p.wrapping_add(link_offset));
            return self.finish(WalkStop::Unavailable { address: at });
        }
        if self.seen.contains(&link) {
            return self.finish(WalkStop::Cycle { address: link });
        }
        if link > self.max_address {
            return self.finish(WalkStop::OutOfRange { address: link });
        }
        self.seen.insert(link);

        self.decode(link, link.wrapping_sub(link_offset))
    }

    fn next_singleton(&mut self) -> Option<PageVisit> {
        if self.previous_page.is_some() {
            return self.finish(WalkStop::Completed);
        }
        let page = match self.snapshot.read_word(self.head) {
            Ok(0) => return self.finish(WalkStop::Empty),
            Ok(word) => word,
            Err(_) => return self.finish(WalkStop::HeadUnavailable),
        };
        if page > self.max_address {
            return self.finish(WalkStop::OutOfRange { address: page });
        }
        self.decode(page, page)
    }
}

impl<S: SnapshotAccess + ?Sized> Iterator for PageListCursor<'_, S> {
    type Item = PageVisit;

    fn next(&mut self) -> Option<PageVisit> {
        if self.stop.is_some() {
            return None;
        }
        if self.head == 0 {
            return self.finish(WalkStop::Empty);
        }
        match self.shape {
            ListShape::Circular { link_offset } => self.next_circular(link_offset),
            ListShape::Singleton => self.next_singleton(),
        }
    }
}

/// Result of one list walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalkOutcome {
    pub free_objects: u64,
    pub total_objects: u64,
    /// Pages decoded, including ones that contributed nothing.
    pub pages: usize,
    pub stop: WalkStop,
}

impl WalkOutcome {
    #[must_use]
    pub fn empty(stop: WalkStop) -> Self {
        Self {
            free_objects: 0,
            total_objects: 0,
            pages: 0,
            stop,
        }
    }

    /// `(free, total)`, or `None` when the walk could not even read its head.
    #[must_use]
    pub fn contribution(&self) -> Option<(u64, u64)> {
        match self.stop {
            WalkStop::HeadUnavailable => None,
            _ => Some((self.free_objects, self.total_objects)),
        }
    }
}

/// Walks page lists and sums their object counts.
pub struct BoundedListWalker<'a, S: SnapshotAccess + ?Sized> {
    snapshot: &'a S,
    counters_offset: u64,
    layout: CounterLayout,
}

impl<'a, S: SnapshotAccess + ?Sized> BoundedListWalker<'a, S> {
    pub fn new(snapshot: &'a S, counters_offset: u64, layout: CounterLayout) -> Self {
        Self {
            snapshot,
            counters_offset,
            layout,
        }
    }

    pub fn for_layout(snapshot: &'a S, layout: &SlabLayout) -> Self {
        Self::new(snapshot, layout.page_counters, layout.counter_layout)
    }

    /// Walk the circular list whose head is at `head`.
    pub fn walk(&self, head: Address, link_offset: u64, max_valid_address: Address) -> WalkOutcome {
        self.run(self.cursor(head, ListShape::Circular { link_offset }, max_valid_address))
    }

    /// Decode the single page descriptor whose address is stored at `root`.
    pub fn walk_single(&self, root: Address, max_valid_address: Address) -> WalkOutcome {
        self.run(self.cursor(root, ListShape::Singleton, max_valid_address))
    }

    pub fn cursor(
        &self,
        head: Address,
        shape: ListShape,
        max_valid_address: Address,
    ) -> PageListCursor<'a, S> {
        PageListCursor::new(
            self.snapshot,
            head,
            shape,
            self.counters_offset,
            self.layout,
            max_valid_address,
        )
    }

    fn run(&self, mut cursor: PageListCursor<'a, S>) -> WalkOutcome {
        let mut tally = Tally::default();
        while let Some(visit) = cursor.next() {
            if let Err(violation) = tally.add(&visit) {
                return violation;
            }
        }
        tally.finish(cursor.stop().unwrap_or(WalkStop::Completed))
    }
}

/// Running sums of one walk.
///
/// Decoded counters keep each page at `free <= objects < 2^15`, so the guard
/// only fires when the running sums themselves are already inconsistent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    free: u64,
    total: u64,
    pages: usize,
}

impl Tally {
    /// Fold one page in. A sum that overflows, or free passing total, turns
    /// the whole walk into a zeroed `AccountingViolation` at that page.
    fn add(&mut self, visit: &PageVisit) -> Result<(), WalkOutcome> {
        self.pages += 1;
        let (page_free, page_total) = match visit.counters.free_objects() {
            Some(f) => (u64::from(f), u64::from(visit.counters.objects)),
            None => (0, 0),
        };
        match (
            self.free.checked_add(page_free),
            self.total.checked_add(page_total),
        ) {
            (Some(free), Some(total)) if free <= total => {
                self.free = free;
                self.total = total;
                Ok(())
            }
            _ => Err(WalkOutcome {
                pages: self.pages,
                ..WalkOutcome::empty(WalkStop::AccountingViolation {
                    address: visit.page,
                })
            }),
        }
    }

    fn finish(self, stop: WalkStop) -> WalkOutcome {
        WalkOutcome {
            free_objects: self.free,
            total_objects: self.total,
            pages: self.pages,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{KernelVersion, MemorySnapshot};

    const LINK: u64 = 8;
    const COUNTERS: u64 = 24;
    const HEAD: Address = 0x1000;
    const MAX: Address = 0xffff_ffff;

    fn packed(inuse: u32, objects: u32) -> u64 {
        u64::from((objects << 16) | inuse)
    }

    /// Circular list at `HEAD` over pages at `0x2000 + 0x100 * i`.
    fn build_list(pages: &[(u32, u32)]) -> (MemorySnapshot, Vec<Address>) {
        let mut snap = MemorySnapshot::new(KernelVersion::new(5, 4, 0));
        let addrs: Vec<Address> = (0..pages.len())
            .map(|i| 0x2000 + 0x100 * i as u64)
            .collect();
        let first = addrs.first().map_or(HEAD, |a| a + LINK);
        snap.write_word(HEAD, first);
        for (i, (&page, &(inuse, objects))) in addrs.iter().zip(pages).enumerate() {
            let next = addrs.get(i + 1).map_or(HEAD, |a| a + LINK);
            snap.write_word(page + LINK, next)
                .write_word(page + COUNTERS, packed(inuse, objects));
        }
        (snap, addrs)
    }

    fn walker(snap: &MemorySnapshot) -> BoundedListWalker<'_, MemorySnapshot> {
        BoundedListWalker::new(snap, COUNTERS, CounterLayout::Unified)
    }

    #[test]
    fn well_formed_list_sums_free_and_total() {
        let (snap, _) = build_list(&[(3, 10), (0, 8), (5, 6)]);
        let out = walker(&snap).walk(HEAD, LINK, MAX);
        assert_eq!(out.free_objects, 7 + 8 + 1);
        assert_eq!(out.total_objects, 10 + 8 + 6);
        assert_eq!(out.pages, 3);
        assert_eq!(out.stop, WalkStop::Completed);
    }

    #[test]
    fn empty_lists_return_zero() {
        let (snap, _) = build_list(&[]);
        let out = walker(&snap).walk(HEAD, LINK, MAX);
        assert_eq!((out.free_objects, out.total_objects), (0, 0));
        assert_eq!(out.stop, WalkStop::Empty);

        let mut zeroed = MemorySnapshot::new(KernelVersion::new(5, 4, 0));
        zeroed.write_word(HEAD, 0);
        let out = walker(&zeroed).walk(HEAD, LINK, MAX);
        assert_eq!((out.free_objects, out.total_objects), (0, 0));
        assert_eq!(out.stop, WalkStop::Empty);

        let out = walker(&zeroed).walk(0, LINK, MAX);
        assert_eq!(out.stop, WalkStop::Empty);
    }

    #[test]
    fn full_page_contributes_nothing() {
        let (snap, _) = build_list(&[(2, 4), (9, 9), (12, 7)]);
        let out = walker(&snap).walk(HEAD, LINK, MAX);
        assert_eq!((out.free_objects, out.total_objects), (2, 4));
        assert_eq!(out.pages, 3);
        assert_eq!(out.stop, WalkStop::Completed);
    }

    #[test]
    fn cycle_returns_totals_before_repeat() {
        let (mut snap, addrs) = build_list(&[(1, 4), (2, 4), (3, 4)]);
        // third page links back to the second instead of the head
        snap.write_word(addrs[2] + LINK, addrs[1] + LINK);
        let out = walker(&snap).walk(HEAD, LINK, MAX);
        assert_eq!((out.free_objects, out.total_objects), (3 + 2 + 1, 12));
        assert_eq!(out.stop, WalkStop::Cycle { address: addrs[1] + LINK });
    }

    #[test]
    fn out_of_range_node_stops_walk() {
        let (snap, addrs) = build_list(&[(1, 4), (2, 4), (3, 4)]);
        let bound = addrs[1];
        let out = walker(&snap).walk(HEAD, LINK, bound);
        assert_eq!((out.free_objects, out.total_objects), (3, 4));
        assert_eq!(out.stop, WalkStop::OutOfRange { address: addrs[1] + LINK });
    }

    #[test]
    fn unreadable_counters_return_partial_totals() {
        let (_, addrs) = build_list(&[(1, 4), (0, 0), (3, 4)]);
        let mut snap = MemorySnapshot::new(KernelVersion::new(5, 4, 0));
        // second page has a link but no counters word
        snap.write_word(HEAD, addrs[0] + LINK)
            .write_word(addrs[0] + LINK, addrs[1] + LINK)
            .write_word(addrs[0] + COUNTERS, packed(1, 4))
            .write_word(addrs[1] + LINK, addrs[2] + LINK);
        let out = walker(&snap).walk(HEAD, LINK, MAX);
        assert_eq!((out.free_objects, out.total_objects), (3, 4));
        assert_eq!(
            out.stop,
            WalkStop::Unavailable {
                address: addrs[1] + COUNTERS
            }
        );
    }

    #[test]
    fn broken_link_keeps_pages_already_decoded() {
        let (mut snap, addrs) = build_list(&[(1, 4), (2, 4)]);
        snap.write_word(addrs[1] + LINK, 0);
        let out = walker(&snap).walk(HEAD, LINK, MAX);
        assert_eq!((out.free_objects, out.total_objects), (5, 8));
        assert_eq!(out.stop, WalkStop::Unavailable { address: addrs[1] + LINK });
    }

    #[test]
    fn unreadable_head_is_distinguished() {
        let snap = MemorySnapshot::new(KernelVersion::new(5, 4, 0));
        let out = walker(&snap).walk(HEAD, LINK, MAX);
        assert_eq!(out.stop, WalkStop::HeadUnavailable);
        assert_eq!(out.contribution(), None);
    }

    #[test]
    fn singleton_decodes_one_page() {
        let mut snap = MemorySnapshot::new(KernelVersion::new(5, 4, 0));
        snap.write_word(0x500, 0x3000)
            .write_word(0x3000 + COUNTERS, packed(3, 10))
            // a link field that must never be followed
            .write_word(0x3000 + LINK, 0x4000 + LINK)
            .write_word(0x4000 + COUNTERS, packed(0, 50));
        let out = walker(&snap).walk_single(0x500, MAX);
        assert_eq!((out.free_objects, out.total_objects), (7, 10));
        assert_eq!(out.pages, 1);
        assert_eq!(out.stop, WalkStop::Completed);
        assert_eq!(out.contribution(), Some((7, 10)));
    }

    #[test]
    fn singleton_edge_cases() {
        let mut snap = MemorySnapshot::new(KernelVersion::new(5, 4, 0));
        snap.write_word(0x500, 0).write_word(0x600, 0x9000_0000);
        assert_eq!(walker(&snap).walk_single(0x500, MAX).stop, WalkStop::Empty);
        assert_eq!(
            walker(&snap).walk_single(0x600, 0x1000).stop,
            WalkStop::OutOfRange { address: 0x9000_0000 }
        );
        assert_eq!(
            walker(&snap).walk_single(0x700, MAX).contribution(),
            None
        );
    }

    #[test]
    fn cursor_yields_pages_in_list_order() {
        let (snap, addrs) = build_list(&[(1, 2), (3, 4)]);
        let w = walker(&snap);
        let mut cursor = w.cursor(HEAD, ListShape::Circular { link_offset: LINK }, MAX);
        let pages: Vec<Address> = cursor.by_ref().map(|v| v.page).collect();
        assert_eq!(pages, addrs);
        assert_eq!(cursor.stop(), Some(WalkStop::Completed));
        assert_eq!(cursor.next(), None);
    }

    fn visit(page: Address, inuse: u32, objects: u32) -> PageVisit {
        PageVisit {
            link: page + LINK,
            page,
            counters: PageCounters {
                inuse,
                objects,
                frozen: false,
            },
        }
    }

    #[test]
    fn overflowing_sums_zero_the_walk() {
        let mut tally = Tally {
            free: u64::MAX - 2,
            total: u64::MAX - 1,
            pages: 4,
        };
        let outcome = tally.add(&visit(0x7000, 1, 10)).unwrap_err();
        assert_eq!(outcome.free_objects, 0);
        assert_eq!(outcome.total_objects, 0);
        assert_eq!(outcome.pages, 5);
        assert_eq!(
            outcome.stop,
            WalkStop::AccountingViolation { address: 0x7000 }
        );
        assert_eq!(outcome.contribution(), Some((0, 0)));
    }

    #[test]
    fn free_exceeding_total_zeroes_the_walk() {
        let mut tally = Tally {
            free: 20,
            total: 10,
            pages: 2,
        };
        // a full page adds nothing, yet the sums are still inconsistent
        let outcome = tally.add(&visit(0x9000, 4, 4)).unwrap_err();
        assert_eq!(
            outcome.stop,
            WalkStop::AccountingViolation { address: 0x9000 }
        );
        assert_eq!((outcome.free_objects, outcome.total_objects), (0, 0));
    }

    #[test]
    fn tally_accumulates_consistent_pages() {
        let mut tally = Tally::default();
        tally.add(&visit(0x1000, 3, 10)).unwrap();
        tally.add(&visit(0x2000, 5, 5)).unwrap();
        tally.add(&visit(0x3000, 2, 4)).unwrap();
        let outcome = tally.finish(WalkStop::Completed);
        assert_eq!((outcome.free_objects, outcome.total_objects), (9, 14));
        assert_eq!(outcome.pages, 3);
    }

    #[test]
    fn stop_labels_and_anomaly_flags() {
        assert!(!WalkStop::Completed.is_anomaly());
        assert!(!WalkStop::Empty.is_anomaly());
        assert!(WalkStop::Cycle { address: 1 }.is_anomaly());
        assert_eq!(
            WalkStop::AccountingViolation { address: 1 }.label(),
            "accounting_violation"
        );
        assert_eq!(WalkStop::OutOfRange { address: 7 }.address(), Some(7));
        assert_eq!(WalkStop::HeadUnavailable.address(), None);
    }
}
