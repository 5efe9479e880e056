pub mod movie;
pub mod preferences;

pub use movie::{sanitize_movies, Candidate, ScoredCandidate};
pub use preferences::{validate_preferences, DiversifyBy, Preferences, Weights};
