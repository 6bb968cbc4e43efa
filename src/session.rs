//! End-to-end query flow: classify, plan, execute, format.
//!
//! The natural-language step sits behind [`IntentClassifier`]; the engine
//! never depends on how a request was classified.

use crate::archetypes::ArchetypeLibrary;
use crate::engine::{self, ResultPayload};
use crate::error::{QueryError, Result};
use crate::formatter::{self, FormattedResponse};
use crate::knowledge::KnowledgeBase;
use crate::models::Currency;
use crate::planner::{ClassifiedQuery, Plan, QueryPlanner};
use crate::store::CollectionStore;

/// Maps a request text onto an intent and its parameters
pub trait IntentClassifier {
    fn classify(&self, text: &str) -> Result<ClassifiedQuery>;
}

/// Accepts a classifier's JSON output as the request text
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonIntentClassifier;

impl IntentClassifier for JsonIntentClassifier {
    fn classify(&self, text: &str) -> Result<ClassifiedQuery> {
        serde_json::from_str(text).map_err(|e| QueryError::invalid("intent", e.to_string()))
    }
}

/// Everything produced while answering one query
#[derive(Debug, Clone)]
pub struct Answer {
    pub plan: Plan,
    pub payload: ResultPayload,
    pub response: FormattedResponse,
}

/// Borrowed view of the collaborators one query runs against
pub struct QuerySession<'a> {
    store: &'a CollectionStore,
    kb: &'a KnowledgeBase,
    archetypes: &'a ArchetypeLibrary,
    currency: Currency,
}

impl<'a> QuerySession<'a> {
    pub fn new(
        store: &'a CollectionStore,
        kb: &'a KnowledgeBase,
        archetypes: &'a ArchetypeLibrary,
        currency: Currency,
    ) -> Self {
        Self {
            store,
            kb,
            archetypes,
            currency,
        }
    }

    /// Answer an already classified query
    pub async fn run(&self, query: &ClassifiedQuery) -> Result<Answer> {
        let plan = QueryPlanner::new(self.archetypes, self.currency)
            .plan(&query.intent, &query.parameters)?;
        log::info!("Executing plan: {}", plan.describe().join(" -> "));

        let payload = engine::execute(&plan, self.store, self.kb).await?;
        let response = formatter::format(&payload);
        Ok(Answer {
            plan,
            payload,
            response,
        })
    }

    /// Classify `text` and answer it
    pub async fn ask(&self, text: &str, classifier: &dyn IntentClassifier) -> Result<Answer> {
        let query = classifier.classify(text)?;
        log::debug!("Classified request as {:?}", query.intent);
        self.run(&query).await
    }
}
