//! Collection orchestration: the ticket registry, the live broadcast hub,
//! the active poller, the archive scraper, and the facade tying them
//! together.

pub mod active;
pub mod archive;
pub mod config;
pub mod error;
pub mod hub;
pub mod orchestrator;
pub mod registry;

pub use active::ActivePoller;
pub use archive::{ArchiveScraper, ScrapeReport};
pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use hub::{HubHandle, LiveUpdate, Subscription};
pub use orchestrator::{ActivePage, Orchestrator, Outcome};
pub use registry::{CollectionRegistry, Ticket};
