//! Core engine: tiered resolution of a series through caches and fetchers.

pub mod alerts;
pub mod chain;
pub mod clock;
pub mod memory;
pub mod normalizer;
pub mod service;

pub use alerts::{AlertLevel, AlertReport, AlertThresholds, ChangeAlert, Comparison};
pub use chain::{ChainSettings, ChainStats, SourceChain};
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryCache;
pub use service::{DataService, SeriesSummary, ServiceStats};
