use std::{collections::HashSet, sync::Arc};

use shared::{
    domain::{coordinate_in_bounds, Marker, MarkerId, MAX_MESSAGE_CHARS},
    protocol::NewMarker,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::warn;

pub mod filter;
pub mod geocode;
pub mod remote;
pub mod session;

pub use filter::{distinct_countries, visible, FilterSelection};
pub use geocode::{NominatimGeocoder, ReverseGeocoder, DEFAULT_GEOCODER_URL, UNKNOWN_COUNTRY};
pub use remote::{HttpMarkerApi, InsertFeed, MarkerApi};
pub use session::{MemorySessionStore, SessionStore, HAS_PLACED_MARK_KEY};

/// The in-progress placement, if any. `country` is geocode output and never
/// user-edited; `name` and `message` are the form fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementForm {
    pub lat: f64,
    pub lng: f64,
    pub country: String,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Placement {
    #[default]
    Idle,
    AwaitingGeocode {
        lat: f64,
        lng: f64,
    },
    FormOpen(PlacementForm),
}

/// User-visible failures of the placement flow. Every variant leaves the
/// board interactive.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("this session has already placed a marker")]
    AlreadyPlaced,
    #[error("a placement is already in progress")]
    PlacementInProgress,
    #[error("no placement form is open")]
    NoOpenForm,
    #[error("coordinate is outside lat [-90,90] / lng [-180,180]")]
    InvalidCoordinate,
    #[error("name cannot be empty")]
    EmptyName,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds {} characters", MAX_MESSAGE_CHARS)]
    MessageTooLong,
    #[error("failed to save marker: {0}")]
    WriteFailed(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub enum BoardEvent {
    MarkersLoaded { count: usize },
    MarkerAdded(Marker),
    PlacementChanged(Placement),
    Error(String),
}

#[derive(Default)]
struct BoardState {
    markers: Vec<Marker>,
    known_ids: HashSet<MarkerId>,
    selection: FilterSelection,
    placement: Placement,
    feed_task: Option<JoinHandle<()>>,
}

/// The marker board: the full known marker set, the derived filtered view,
/// and the one-per-session placement flow. The remote store, the reverse
/// geocoder, and the session store are injected seams.
pub struct MarkerBoard {
    api: Arc<dyn MarkerApi>,
    geocoder: Arc<dyn ReverseGeocoder>,
    session: Arc<dyn SessionStore>,
    inner: Mutex<BoardState>,
    events: broadcast::Sender<BoardEvent>,
}

impl MarkerBoard {
    pub fn new(
        api: Arc<dyn MarkerApi>,
        geocoder: Arc<dyn ReverseGeocoder>,
        session: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            geocoder,
            session,
            inner: Mutex::new(BoardState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    /// Fetches the current marker set once and establishes the insert feed.
    /// Both are best-effort: a failed fetch leaves the board empty and a
    /// failed subscription leaves it static, but never unusable.
    pub async fn start(self: &Arc<Self>) {
        match self.api.list_markers().await {
            Ok(markers) => {
                let count = markers.len();
                {
                    let mut inner = self.inner.lock().await;
                    inner.known_ids = markers.iter().map(|marker| marker.id).collect();
                    inner.markers = markers;
                }
                let _ = self.events.send(BoardEvent::MarkersLoaded { count });
            }
            Err(err) => {
                warn!(%err, "initial marker fetch failed; starting empty");
            }
        }

        match self.api.subscribe_inserts().await {
            Ok(feed) => {
                let task = self.spawn_feed_task(feed);
                self.inner.lock().await.feed_task = Some(task);
            }
            Err(err) => {
                warn!(%err, "marker feed unavailable; live updates disabled");
            }
        }
    }

    /// Tears the insert feed down. Idempotent; the handle is taken so the
    /// abort happens exactly once.
    pub async fn shutdown(&self) {
        let task = self.inner.lock().await.feed_task.take();
        if let Some(task) = task {
            task.abort();
        }
    }

    fn spawn_feed_task(self: &Arc<Self>, mut feed: InsertFeed) -> JoinHandle<()> {
        let board = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(marker) = feed.recv().await {
                board.apply_remote_insert(marker).await;
            }
        })
    }

    async fn apply_remote_insert(&self, marker: Marker) {
        {
            let mut inner = self.inner.lock().await;
            // The echo of a marker fetched during startup is not an append.
            if !inner.known_ids.insert(marker.id) {
                return;
            }
            inner.markers.push(marker.clone());
        }
        let _ = self.events.send(BoardEvent::MarkerAdded(marker));
    }

    pub async fn markers(&self) -> Vec<Marker> {
        self.inner.lock().await.markers.clone()
    }

    /// Distinct non-empty countries across all known markers, first-seen
    /// order.
    pub async fn countries(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        distinct_countries(&inner.markers)
    }

    pub async fn selection(&self) -> FilterSelection {
        self.inner.lock().await.selection.clone()
    }

    pub async fn select_country(&self, selection: FilterSelection) {
        self.inner.lock().await.selection = selection;
    }

    /// The marker subset matching the current selection, original order.
    pub async fn visible_markers(&self) -> Vec<Marker> {
        let inner = self.inner.lock().await;
        visible(&inner.markers, &inner.selection)
    }

    pub async fn placement(&self) -> Placement {
        self.inner.lock().await.placement.clone()
    }

    /// Starts a placement at the clicked coordinate. Refused while the
    /// session flag is set or another placement is underway; otherwise the
    /// coordinate is geocoded (failure masked as "Unknown") and the form
    /// opens.
    pub async fn begin_placement(&self, lat: f64, lng: f64) -> Result<PlacementForm, BoardError> {
        if !coordinate_in_bounds(lat, lng) {
            return Err(BoardError::InvalidCoordinate);
        }

        {
            let mut inner = self.inner.lock().await;
            if self.session.has_placed_mark() {
                return Err(BoardError::AlreadyPlaced);
            }
            if inner.placement != Placement::Idle {
                return Err(BoardError::PlacementInProgress);
            }
            inner.placement = Placement::AwaitingGeocode { lat, lng };
        }
        let _ = self
            .events
            .send(BoardEvent::PlacementChanged(Placement::AwaitingGeocode {
                lat,
                lng,
            }));

        let country = match self.geocoder.country_at(lat, lng).await {
            Ok(country) if !country.trim().is_empty() => country,
            Ok(_) => UNKNOWN_COUNTRY.to_string(),
            Err(err) => {
                warn!(%err, lat, lng, "reverse geocode failed");
                UNKNOWN_COUNTRY.to_string()
            }
        };

        let form = PlacementForm {
            lat,
            lng,
            country,
            name: String::new(),
            message: String::new(),
        };
        self.inner.lock().await.placement = Placement::FormOpen(form.clone());
        let _ = self
            .events
            .send(BoardEvent::PlacementChanged(Placement::FormOpen(
                form.clone(),
            )));
        Ok(form)
    }

    pub async fn set_name(&self, name: &str) -> Result<(), BoardError> {
        let mut inner = self.inner.lock().await;
        match &mut inner.placement {
            Placement::FormOpen(form) => {
                form.name = name.to_string();
                Ok(())
            }
            _ => Err(BoardError::NoOpenForm),
        }
    }

    pub async fn set_message(&self, message: &str) -> Result<(), BoardError> {
        let mut inner = self.inner.lock().await;
        match &mut inner.placement {
            Placement::FormOpen(form) => {
                form.message = message.to_string();
                Ok(())
            }
            _ => Err(BoardError::NoOpenForm),
        }
    }

    /// Submits the open form. Validation failures and write failures leave
    /// the form (and the session flag) untouched so the user can retry; on
    /// success the flag is set, the form closes, and the new marker arrives
    /// through the insert feed rather than a local append.
    pub async fn submit(&self) -> Result<(), BoardError> {
        let new = {
            let inner = self.inner.lock().await;
            let Placement::FormOpen(form) = &inner.placement else {
                return Err(BoardError::NoOpenForm);
            };

            let name = form.name.trim();
            if name.is_empty() {
                return Err(BoardError::EmptyName);
            }
            let message = form.message.trim();
            if message.is_empty() {
                return Err(BoardError::EmptyMessage);
            }
            if message.chars().count() > MAX_MESSAGE_CHARS {
                return Err(BoardError::MessageTooLong);
            }

            NewMarker {
                lat: form.lat,
                lng: form.lng,
                name: name.to_string(),
                message: message.to_string(),
                country: form.country.clone(),
            }
        };

        if let Err(err) = self.api.insert_marker(&new).await {
            let _ = self
                .events
                .send(BoardEvent::Error(format!("failed to save marker: {err}")));
            return Err(BoardError::WriteFailed(err));
        }

        self.session.mark_placed();
        self.inner.lock().await.placement = Placement::Idle;
        let _ = self
            .events
            .send(BoardEvent::PlacementChanged(Placement::Idle));
        Ok(())
    }

    /// Discards the open form without writing or touching the session flag.
    pub async fn cancel(&self) -> Result<(), BoardError> {
        {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.placement, Placement::FormOpen(_)) {
                return Err(BoardError::NoOpenForm);
            }
            inner.placement = Placement::Idle;
        }
        let _ = self
            .events
            .send(BoardEvent::PlacementChanged(Placement::Idle));
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
