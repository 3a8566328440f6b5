//! State shared between the control server and the radio loop.
//!
//! Two independent locks guard the two tables. When both are needed they are
//! taken colors first, then connected, and only [`SharedState::snapshot_connected_colors`]
//! ever takes both, so the order cannot be violated from outside this module.

use std::fmt;

use light_bridge_protocol::{Color, NUM_IDS};
use tokio::sync::{Mutex, MutexGuard};

/// Liveness bitmap over the 256 endpoint ids.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectedSet {
    words: [u64; 4],
}

impl ConnectedSet {
    pub const fn new() -> Self {
        Self { words: [0; 4] }
    }

    pub fn contains(&self, id: u8) -> bool {
        self.words[usize::from(id >> 6)] & (1 << (id & 63)) != 0
    }

    pub fn insert(&mut self, id: u8) {
        self.words[usize::from(id >> 6)] |= 1 << (id & 63);
    }

    pub fn remove(&mut self, id: u8) {
        self.words[usize::from(id >> 6)] &= !(1 << (id & 63));
    }

    pub fn set(&mut self, id: u8, connected: bool) {
        if connected {
            self.insert(id);
        } else {
            self.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.words = [0; 4];
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Connected ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |id| self.contains(*id))
    }

    /// The `list` reply: every id followed by a comma, e.g. `3,7,200,`.
    pub fn to_list_reply(&self) -> String {
        self.iter().map(|id| format!("{},", id)).collect()
    }
}

impl FromIterator<u8> for ConnectedSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = ConnectedSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Debug for ConnectedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

pub struct SharedState {
    colors: Mutex<[Color; NUM_IDS]>,
    connected: Mutex<ConnectedSet>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// All lights black, none connected.
    pub fn new() -> Self {
        Self {
            colors: Mutex::new([Color::BLACK; NUM_IDS]),
            connected: Mutex::new(ConnectedSet::new()),
        }
    }

    pub async fn set_color(&self, id: u8, color: Color) {
        self.colors.lock().await[usize::from(id)] = color;
    }

    /// Write the same color to every id in `ids` under one critical section.
    pub async fn set_colors<I>(&self, ids: I, color: Color)
    where
        I: IntoIterator<Item = u8>,
    {
        let mut colors = self.colors.lock().await;
        for id in ids {
            colors[usize::from(id)] = color;
        }
    }

    /// Write every `(id, color)` pair under one critical section and return
    /// how many were written.
    pub async fn set_colors_each<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (u8, Color)>,
    {
        let mut colors = self.colors.lock().await;
        let mut written = 0;
        for (id, color) in entries {
            colors[usize::from(id)] = color;
            written += 1;
        }
        written
    }

    pub async fn color(&self, id: u8) -> Color {
        self.colors.lock().await[usize::from(id)]
    }

    pub async fn is_connected(&self, id: u8) -> bool {
        self.connected.lock().await.contains(id)
    }

    pub async fn set_connected(&self, id: u8, connected: bool) {
        self.connected.lock().await.set(id, connected);
    }

    /// Copy of the liveness bitmap.
    pub async fn connected_ids(&self) -> ConnectedSet {
        *self.connected.lock().await
    }

    /// Exclusive access to the liveness bitmap, for a discovery sweep.
    /// Do not take the colors lock while holding this guard.
    pub async fn lock_connected(&self) -> MutexGuard<'_, ConnectedSet> {
        self.connected.lock().await
    }

    /// `(id, color)` for every connected endpoint, read under both locks.
    pub async fn snapshot_connected_colors(&self) -> Vec<(u8, Color)> {
        let colors = self.colors.lock().await;
        let connected = self.connected.lock().await;
        connected
            .iter()
            .map(|id| (id, colors[usize::from(id)]))
            .collect()
    }
}
