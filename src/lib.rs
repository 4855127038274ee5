// Unified entity model and geometry validation
pub mod entity;

// Viewport and grid partitioning math
pub mod grid;

// Per-provider schema unification and dedup
pub mod unify;

// Pull-based upstream providers
pub mod providers;

// Push-based stream ingestion (AIS websocket)
pub mod stream;

// Viewport TTL cache with stale-while-revalidate
pub mod cache;

// Grid probability aggregation
pub mod aggregate;

// PNG heat-tile rendering
pub mod raster;

// The aggregation engine tying the above together
pub mod engine;

// Lifetime counters
pub mod metrics;

// Configuration loading
pub mod config;

// HTTP API
pub mod api;
