use super::replacer::{FrameId, Replacer};

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<FrameId>,
    next: Option<FrameId>,
    linked: bool,
}

/// Least-recently-unpinned eviction.
///
/// Frames live in a doubly linked list threaded through a vector indexed by
/// frame id, so pin, unpin and evict are all O(1). The head holds the most
/// recently unpinned frame, the tail the eviction candidate.
#[derive(Debug)]
pub struct LruReplacer {
    links: Vec<Link>,
    head: Option<FrameId>,
    tail: Option<FrameId>,
    len: usize,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            links: vec![Link::default(); max_size],
            head: None,
            tail: None,
            len: 0,
        }
    }

    fn push_front(&mut self, frame_id: FrameId) {
        let old_head = self.head;
        self.links[frame_id as usize] = Link {
            prev: None,
            next: old_head,
            linked: true,
        };
        match old_head {
            Some(h) => self.links[h as usize].prev = Some(frame_id),
            None => self.tail = Some(frame_id),
        }
        self.head = Some(frame_id);
        self.len += 1;
    }

    fn unlink(&mut self, frame_id: FrameId) {
        let link = self.links[frame_id as usize];
        match link.prev {
            Some(p) => self.links[p as usize].next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(n) => self.links[n as usize].prev = link.prev,
            None => self.tail = link.prev,
        }
        self.links[frame_id as usize] = Link::default();
        self.len -= 1;
    }

    fn contains(&self, frame_id: FrameId) -> bool {
        self.links
            .get(frame_id as usize)
            .is_some_and(|link| link.linked)
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let victim = self.tail?;
        self.unlink(victim);
        Some(victim)
    }

    fn pin(&mut self, frame_id: FrameId) {
        if self.contains(frame_id) {
            self.unlink(frame_id);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if (frame_id as usize) < self.links.len() && !self.contains(frame_id) {
            self.push_front(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_lru_operations() {
        let mut replacer = LruReplacer::new(4);

        // Initially empty
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 3);

        // First unpinned is first evicted
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_pin_unpin() {
        let mut replacer = LruReplacer::new(3);

        replacer.unpin(1);
        replacer.unpin(2);
        assert_eq!(replacer.size(), 2);

        replacer.pin(1);
        assert_eq!(replacer.size(), 1);

        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);

        replacer.unpin(1);
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_duplicate_unpin_keeps_position() {
        let mut replacer = LruReplacer::new(3);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(1);
        assert_eq!(replacer.size(), 2);

        // Frame 1 was not refreshed by the second unpin.
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_pin_non_existent() {
        let mut replacer = LruReplacer::new(2);

        replacer.pin(1);
        replacer.pin(999);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_out_of_range_unpin_ignored() {
        let mut replacer = LruReplacer::new(2);

        replacer.unpin(0);
        replacer.unpin(1);
        replacer.unpin(2);
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_complex_scenario() {
        let mut replacer = LruReplacer::new(5);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        // Pin middle frame
        replacer.pin(2);
        assert_eq!(replacer.size(), 2);

        assert_eq!(replacer.evict(), Some(1));

        replacer.unpin(2);
        replacer.unpin(4);

        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_pin_head_and_tail() {
        let mut replacer = LruReplacer::new(4);
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.unpin(2);

        replacer.pin(2);
        replacer.pin(0);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);

        replacer.unpin(3);
        assert_eq!(replacer.evict(), Some(3));
    }
}
