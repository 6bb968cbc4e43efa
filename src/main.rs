//! Collection Query - answer questions about a ManaBox collection export
//!
//! Reads the collection CSV, optionally refreshes market values from
//! Scryfall, then answers one classified query or prints a summary.

use clap::Parser;
use collection_query::{
    format_summary, ArchetypeLibrary, CollectionStore, Currency, EngineConfig, IntentClassifier,
    JsonIntentClassifier, KnowledgeBase, QuerySession, ScryfallFetcher,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Query an MTG collection with structured intents
#[derive(Parser, Debug)]
#[command(name = "collection_query")]
#[command(version, about, long_about = None)]
struct Args {
    /// ManaBox collection CSV export
    #[arg(short, long)]
    collection: PathBuf,

    /// Deck archetypes: a JSON file, a decklist file or a directory of decklists
    #[arg(short, long)]
    archetypes: Option<PathBuf>,

    /// Classified query as JSON, e.g. '{"intent":{"kind":"filter"},"parameters":{...}}'
    #[arg(short, long, conflicts_with = "intent_file")]
    intent: Option<String>,

    /// Read the classified query JSON from a file
    #[arg(long)]
    intent_file: Option<PathBuf>,

    /// Engine config JSON; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Currency for market values (USD or EUR)
    #[arg(long)]
    currency: Option<String>,

    /// Refresh market values from Scryfall before answering
    #[arg(long, default_value_t = false)]
    enrich: bool,

    /// Print a collection summary instead of answering a query
    #[arg(long, default_value_t = false)]
    summary: bool,

    /// Print the structured result as JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Metadata cache file (default: ~/.cache/collection_query/metadata_cache.json)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Hours before cached metadata counts as stale
    #[arg(long)]
    ttl_hours: Option<u64>,

    /// Seconds one query may wait on Scryfall
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig, String> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)
                .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?,
            None => EngineConfig::default(),
        };
        if let Some(code) = &self.currency {
            config.currency =
                Currency::parse(code).ok_or_else(|| format!("Unsupported currency: {code}"))?;
        }
        if let Some(hours) = self.ttl_hours {
            config.metadata_ttl_secs = hours.saturating_mul(3600);
        }
        if let Some(secs) = self.timeout_secs {
            config.enrichment_timeout_ms = secs.saturating_mul(1000);
        }
        if self.cache.is_some() {
            config.cache_path = self.cache.clone();
        }
        Ok(config)
    }

    fn query_text(&self) -> Result<Option<String>, String> {
        if let Some(text) = &self.intent {
            return Ok(Some(text.clone()));
        }
        match &self.intent_file {
            Some(path) => std::fs::read_to_string(path)
                .map(Some)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e)),
            None => Ok(None),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let config = args.engine_config()?;
    let query_text = args.query_text()?;
    if query_text.is_none() && !args.summary {
        return Err("Nothing to do: pass --intent, --intent-file or --summary".to_string());
    }

    let store = CollectionStore::new(config.currency);
    store
        .load_csv(&args.collection)
        .map_err(|e| format!("Failed to load {}: {}", args.collection.display(), e))?;

    let archetypes = match &args.archetypes {
        Some(path) => ArchetypeLibrary::load(path)
            .map_err(|e| format!("Failed to load archetypes from {}: {}", path.display(), e))?,
        None => ArchetypeLibrary::new(),
    };

    let kb = KnowledgeBase::new(Arc::new(ScryfallFetcher::new()), &config);
    let cache_path = config.resolved_cache_path();
    kb.load_cache(&cache_path);

    if args.enrich {
        let summary = store
            .enrich(&kb, config.currency)
            .await
            .map_err(|e| format!("Enrichment failed: {}", e))?;
        log::info!(
            "Enriched collection: {} valued, {} without a price, {} stale",
            summary.valued,
            summary.unvalued,
            summary.stale
        );
    }

    if args.summary {
        let summary = store.snapshot().summary(config.currency, config.summary_top_n);
        if args.json {
            let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
            println!("{json}");
        } else {
            print!("{}", format_summary(&summary));
        }
    }

    if let Some(text) = query_text {
        let session = QuerySession::new(&store, &kb, &archetypes, config.currency);
        let classifier: &dyn IntentClassifier = &JsonIntentClassifier;
        let answer = session.ask(&text, classifier).await.map_err(|e| e.to_string())?;
        if args.json {
            let json =
                serde_json::to_string_pretty(&answer.response.structured).map_err(|e| e.to_string())?;
            println!("{json}");
        } else {
            print!("{}", answer.response.text);
        }
    }

    if let Err(e) = kb.save_cache(&cache_path) {
        log::warn!("Failed to save metadata cache: {}", e);
    }
    Ok(())
}
