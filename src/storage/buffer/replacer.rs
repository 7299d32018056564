use std::fmt::Debug;

pub type FrameId = u32;

/// Eviction policy over the frames whose pin count dropped to zero.
pub trait Replacer: Send + Sync + Debug {
    /// Pick a victim among the evictable frames and stop tracking it.
    fn evict(&mut self) -> Option<FrameId>;

    /// The frame gained a pin; it is no longer a candidate.
    fn pin(&mut self, frame_id: FrameId);

    /// The frame's last pin was released. Idempotent.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
