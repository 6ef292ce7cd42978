use cbm_emu_core::event::EventList;

/// `frame_delta` event lists used round-robin. The current list collects
/// this frame's local events; the one to play holds the local events sent
/// `frame_delta - 1` frames ago, which is replayed together with the peer's
/// matching frame.
#[derive(Debug, Clone)]
pub struct FrameRing {
    lists: Vec<EventList>,
    current: usize,
    to_play: usize,
    full: bool,
}

impl FrameRing {
    pub fn new(frame_delta: u32) -> Self {
        let delta = frame_delta.max(1) as usize;
        Self {
            lists: vec![EventList::new(); delta],
            current: 0,
            to_play: 1 % delta,
            full: false,
        }
    }

    pub fn frame_delta(&self) -> usize {
        self.lists.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn to_play_index(&self) -> usize {
        self.to_play
    }

    pub fn current(&self) -> &EventList {
        &self.lists[self.current]
    }

    pub fn current_mut(&mut self) -> &mut EventList {
        &mut self.lists[self.current]
    }

    pub fn to_play(&self) -> &EventList {
        &self.lists[self.to_play]
    }

    /// Once the last slot has been reached the peer's frames are due every
    /// frame. Stays set until the ring is dropped.
    pub fn is_full(&mut self) -> bool {
        if self.current == self.lists.len() - 1 {
            self.full = true;
        }
        self.full
    }

    /// Move on to the next slot, discarding what it held.
    pub fn advance(&mut self) {
        let delta = self.lists.len();
        self.current = (self.current + 1) % delta;
        self.to_play = (self.current + 1) % delta;
        self.lists[self.current].clear();
    }
}
