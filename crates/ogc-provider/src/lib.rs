//! WMS / WMS-C / WMTS raster provider.
//!
//! The crate exposes [`RasterProvider`], a client for OGC map servers that
//! plans tile requests against a parsed capabilities document, fetches
//! tiles concurrently with generation-stamped requests, and composites the
//! responses into a cached raster. Stale responses from superseded draw
//! calls are discarded on arrival; late responses refine the raster and
//! emit [`ProviderEvent::DataChanged`].

pub mod cache;
pub mod extent;
pub mod fetch;
pub mod planner;
pub mod provider;
pub mod render;
pub mod selector;
pub mod session;
pub mod uri;

pub use cache::{CacheLoadControl, HttpTileCache};
pub use fetch::{FetchCoordinator, ProviderEvent, TileAttributes, DEFAULT_MAX_RETRY, WMS_THRESHOLD};
pub use provider::{IdentifyLayerResult, IdentifyResult, RasterProvider};
pub use render::CachedRender;
pub use selector::{PlannedTile, TilePlan, MAX_TILES_PER_DRAW};
pub use session::{DpiMode, SessionState};
pub use uri::SourceUri;
