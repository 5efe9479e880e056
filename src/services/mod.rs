pub mod aggregator;
pub mod fetcher;
pub mod genres;
pub mod preferences;
pub mod providers;
pub mod recommendations;
pub mod sampler;
pub mod scoring;

pub use aggregator::{Aggregation, Aggregator};
pub use fetcher::{Fetcher, RetryPolicy};
pub use genres::GenreMap;
pub use preferences::PreferencesStore;
pub use recommendations::RecommendationService;
