//! Stream layout.
//!
//! Remote streams are grouped into peers by socket id and arranged either
//! as a single focused peer or as a near-square grid. Nothing here touches
//! media; the output is a description the UI renders.

use crate::reconciler::RemoteStream;
use crate::signaling::messages::UserInfo;

use common::types::{MediaKind, ProducerId, SocketId, UserId};
use std::collections::{BTreeMap, HashMap};

/// How a video element fills its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Crop to fill (camera video).
    Cover,
    /// Letterbox to show everything (screen shares).
    Contain,
}

/// Layout mode selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Focus,
    Grid,
}

/// A remote participant with the streams received from it.
#[derive(Debug, Clone)]
pub struct Peer {
    pub socket_id: SocketId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub streams: Vec<RemoteStream>,
    /// Order in which the peer was first seen; higher joined later.
    pub joined_seq: u64,
}

impl Peer {
    fn stream_of(&self, kind: MediaKind) -> Option<&RemoteStream> {
        self.streams.iter().find(|s| s.kind == kind)
    }
}

/// Video to render in a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSlot {
    pub producer_id: ProducerId,
    pub fit: Fit,
}

/// One peer's place on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub socket_id: SocketId,
    pub user_id: UserId,
    pub video: Option<VideoSlot>,
    pub audio: Option<ProducerId>,
}

impl Tile {
    /// A screen share wins the video slot over the camera.
    fn for_peer(peer: &Peer) -> Self {
        let video = peer
            .stream_of(MediaKind::Screen)
            .map(|s| VideoSlot {
                producer_id: s.producer_id.clone(),
                fit: Fit::Contain,
            })
            .or_else(|| {
                peer.stream_of(MediaKind::Video).map(|s| VideoSlot {
                    producer_id: s.producer_id.clone(),
                    fit: Fit::Cover,
                })
            });
        Self {
            socket_id: peer.socket_id.clone(),
            user_id: peer.user_id.clone(),
            video,
            audio: peer
                .stream_of(MediaKind::Audio)
                .map(|s| s.producer_id.clone()),
        }
    }
}

/// Computed layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// Nobody to show yet.
    Waiting,
    Focus { main: Tile },
    Grid { columns: usize, rows: Vec<Vec<Tile>> },
}

/// Columns of a near-square grid: `ceil(sqrt(n))`.
#[must_use]
pub fn grid_columns(n: usize) -> usize {
    // Exact integer ceil(sqrt), no float rounding at perfect squares
    let mut columns = 0;
    while columns * columns < n {
        columns += 1;
    }
    columns
}

/// Row lengths of the grid, filled left to right.
#[must_use]
pub fn grid_rows(n: usize) -> Vec<usize> {
    let columns = grid_columns(n);
    if columns == 0 {
        return Vec::new();
    }
    let mut rows = vec![columns; n / columns];
    if n % columns != 0 {
        rows.push(n % columns);
    }
    rows
}

struct DirectoryEntry {
    user: Option<UserInfo>,
    joined_seq: u64,
}

/// Remote participants known to the session, in join order.
#[derive(Default)]
pub struct PeerDirectory {
    entries: HashMap<SocketId, DirectoryEntry>,
    next_seq: u64,
}

impl PeerDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the peers already in the room at join time.
    ///
    /// Their relative order is unknown, so they are ordered by socket id.
    pub fn seed(&mut self, peers: &HashMap<SocketId, UserInfo>) {
        let ordered: BTreeMap<&SocketId, &UserInfo> = peers.iter().collect();
        for (socket_id, user) in ordered {
            self.insert(socket_id.clone(), Some(user.clone()));
        }
    }

    /// Record a peer. A known peer keeps its position; its profile is
    /// updated when one is supplied.
    pub fn insert(&mut self, socket_id: SocketId, user: Option<UserInfo>) {
        if let Some(entry) = self.entries.get_mut(&socket_id) {
            if user.is_some() {
                entry.user = user;
            }
            return;
        }
        self.next_seq += 1;
        self.entries.insert(
            socket_id,
            DirectoryEntry {
                user,
                joined_seq: self.next_seq,
            },
        );
    }

    pub fn remove(&mut self, socket_id: &SocketId) {
        self.entries.remove(socket_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group streams into peers, ordered by join sequence.
    ///
    /// Sockets not seen before are registered in stream order.
    pub fn aggregate(&mut self, streams: &[RemoteStream]) -> Vec<Peer> {
        let mut grouped: BTreeMap<SocketId, Vec<RemoteStream>> = BTreeMap::new();
        for stream in streams {
            if !self.entries.contains_key(&stream.socket_id) {
                self.insert(stream.socket_id.clone(), None);
            }
            grouped
                .entry(stream.socket_id.clone())
                .or_default()
                .push(stream.clone());
        }

        let mut peers: Vec<Peer> = grouped
            .into_iter()
            .filter_map(|(socket_id, streams)| {
                let entry = self.entries.get(&socket_id)?;
                let user_id = entry
                    .user
                    .as_ref()
                    .map(|u| u.user_id.clone())
                    .or_else(|| streams.first().map(|s| s.user_id.clone()))?;
                Some(Peer {
                    display_name: entry.user.as_ref().and_then(|u| u.display_name.clone()),
                    joined_seq: entry.joined_seq,
                    socket_id,
                    user_id,
                    streams,
                })
            })
            .collect();
        peers.sort_by_key(|p| p.joined_seq);
        peers
    }
}

/// Decides what to show.
#[derive(Debug, Clone)]
pub struct StreamLayoutEngine {
    mode: LayoutMode,
    selected_main: Option<SocketId>,
}

impl StreamLayoutEngine {
    #[must_use]
    pub fn new(mode: LayoutMode) -> Self {
        Self {
            mode,
            selected_main: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LayoutMode) {
        self.mode = mode;
    }

    /// Pin a peer as the focused one. `None` returns to the default.
    pub fn select_main(&mut self, socket_id: Option<SocketId>) {
        self.selected_main = socket_id;
    }

    /// Lay out `peers` (as returned by `PeerDirectory::aggregate`).
    #[must_use]
    pub fn compute(&self, peers: &[Peer]) -> Layout {
        if peers.is_empty() {
            return Layout::Waiting;
        }

        match self.mode {
            LayoutMode::Focus => {
                let selected = self
                    .selected_main
                    .as_ref()
                    .and_then(|id| peers.iter().find(|p| &p.socket_id == id));
                let main = selected.or_else(|| peers.iter().max_by_key(|p| p.joined_seq));
                match main {
                    Some(peer) => Layout::Focus {
                        main: Tile::for_peer(peer),
                    },
                    None => Layout::Waiting,
                }
            }
            LayoutMode::Grid => {
                let mut remaining = peers.iter();
                let rows = grid_rows(peers.len())
                    .into_iter()
                    .map(|len| remaining.by_ref().take(len).map(Tile::for_peer).collect())
                    .collect();
                Layout::Grid {
                    columns: grid_columns(peers.len()),
                    rows,
                }
            }
        }
    }
}
