//! Collection Query - ask questions about an MTG card collection
//!
//! Loads a ManaBox CSV export into an in-memory store, enriches it with
//! Scryfall metadata and answers structured queries through a planner,
//! an execution engine and a response formatter.

pub mod archetypes;
pub mod config;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod import;
pub mod knowledge;
pub mod models;
pub mod planner;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use archetypes::{parse_decklist, ArchetypeLibrary};
pub use config::EngineConfig;
pub use engine::{execute, ResultPayload, ResultValue};
pub use error::{FetchError, QueryError, Result};
pub use formatter::{format, format_summary, FormattedResponse};
pub use import::{read_collection, read_collection_csv, RawCardRow};
pub use knowledge::{CardFetcher, KnowledgeBase, Lookup, ScryfallFetcher};
pub use models::{CardEntry, CardIdentity, CardMetadata, Currency, DeckArchetype};
pub use planner::{ClassifiedQuery, Intent, Parameters, Plan, QueryPlanner};
pub use session::{Answer, IntentClassifier, JsonIntentClassifier, QuerySession};
pub use store::{CollectionStore, Snapshot};
