//! Tests for plan execution

use super::*;
use crate::archetypes::ArchetypeLibrary;
use crate::config::EngineConfig;
use crate::models::DeckCard;
use crate::planner::{Intent, Parameters, PredicateSpec, QueryPlanner, Shape};
use crate::test_support::{fast_config, metadata, row, StaticFetcher};
use std::sync::Arc;
use std::time::Duration;

fn value_store() -> CollectionStore {
    CollectionStore::from_rows(
        vec![
            row("Lightning Bolt", "LEA", "161", 1, Some(5.0)),
            row("Sol Ring", "C21", "263", 1, None),
            row("Opt", "XLN", "65", 1, Some(10.0)),
        ],
        Currency::Usd,
    )
    .unwrap()
}

fn empty_kb() -> KnowledgeBase {
    KnowledgeBase::new(Arc::new(StaticFetcher::new()), &fast_config())
}

fn plan_for(intent: Intent, params: Parameters) -> Plan {
    let archetypes = ArchetypeLibrary::new();
    QueryPlanner::new(&archetypes, Currency::Usd)
        .plan(&intent, &params)
        .unwrap()
}

fn scalar(payload: &ResultPayload) -> &ScalarResult {
    match &payload.value {
        ResultValue::Scalar(result) => result,
        other => panic!("expected a scalar, got {other:?}"),
    }
}

fn entry_names(payload: &ResultPayload) -> Vec<&str> {
    match &payload.value {
        ResultValue::Entries(entries) => entries.iter().map(|e| e.name.as_str()).collect(),
        other => panic!("expected entries, got {other:?}"),
    }
}

fn scores(payload: &ResultPayload) -> &[ArchetypeScore] {
    match &payload.value {
        ResultValue::ArchetypeScores(scores) => scores,
        other => panic!("expected archetype scores, got {other:?}"),
    }
}

fn sum_of(field: &str) -> Plan {
    plan_for(
        Intent::Aggregate {
            function: AggregateFn::Sum,
        },
        Parameters::default().with_field(field),
    )
}

#[tokio::test]
async fn sum_excludes_unknown_values() {
    let payload = execute(&sum_of("value"), &value_store(), &empty_kb()).await.unwrap();

    let result = scalar(&payload);
    assert_eq!(result.value, Some(15.0));
    assert_eq!(result.rows_counted, 2);
    assert_eq!(result.currency, Some(Currency::Usd));
    assert_eq!(payload.provenance.excluded_unknown, 1);
    assert_eq!(payload.provenance.rows_scanned, 3);
}

#[tokio::test]
async fn monetary_sum_and_avg_weight_by_quantity() {
    let store = CollectionStore::from_rows(
        vec![
            row("Lightning Bolt", "LEA", "161", 3, Some(2.0)),
            row("Opt", "XLN", "65", 1, Some(6.0)),
        ],
        Currency::Usd,
    )
    .unwrap();
    let kb = empty_kb();

    let sum = execute(&sum_of("value"), &store, &kb).await.unwrap();
    assert_eq!(scalar(&sum).value, Some(12.0));

    let avg_plan = plan_for(
        Intent::Aggregate {
            function: AggregateFn::Avg,
        },
        Parameters::default().with_field("value"),
    );
    let avg = execute(&avg_plan, &store, &kb).await.unwrap();
    assert_eq!(scalar(&avg).value, Some(3.0));

    // total value is already per holding
    let total = execute(&sum_of("total_value"), &store, &kb).await.unwrap();
    assert_eq!(scalar(&total).value, Some(12.0));
}

#[tokio::test]
async fn sum_over_only_unknown_values_is_unknown() {
    let store = CollectionStore::from_rows(vec![row("Sol Ring", "C21", "263", 1, None)], Currency::Usd).unwrap();

    let payload = execute(&sum_of("value"), &store, &empty_kb()).await.unwrap();

    assert_eq!(scalar(&payload).value, None);
    assert_eq!(payload.provenance.excluded_unknown, 1);
}

#[tokio::test]
async fn purchase_price_in_other_currency_is_unknown() {
    let mut dollars = row("Opt", "XLN", "65", 1, None);
    dollars.purchase_price = "1.00".to_string();
    let mut euros = row("Sol Ring", "C21", "263", 1, None);
    euros.purchase_price = "2.00".to_string();
    euros.purchase_currency = "EUR".to_string();
    let store = CollectionStore::from_rows(vec![dollars, euros], Currency::Usd).unwrap();

    let payload = execute(&sum_of("purchase_price"), &store, &empty_kb()).await.unwrap();

    assert_eq!(scalar(&payload).value, Some(1.0));
    assert_eq!(payload.provenance.excluded_unknown, 1);
}

#[tokio::test]
async fn count_rows_with_and_without_field() {
    let kb = empty_kb();
    let count_all = plan_for(
        Intent::Aggregate {
            function: AggregateFn::Count,
        },
        Parameters::default(),
    );
    let payload = execute(&count_all, &value_store(), &kb).await.unwrap();
    assert_eq!(scalar(&payload).value, Some(3.0));
    assert_eq!(scalar(&payload).currency, None);

    let count_valued = plan_for(
        Intent::Aggregate {
            function: AggregateFn::Count,
        },
        Parameters::default().with_field("value"),
    );
    let payload = execute(&count_valued, &value_store(), &kb).await.unwrap();
    assert_eq!(scalar(&payload).value, Some(2.0));
    assert_eq!(payload.provenance.excluded_unknown, 1);
}

const CREATURE_FIXTURE: &[(&str, &str, &str, &str)] = &[
    ("Atraxa, Praetors' Voice", "2XM", "190", "Legendary Creature — Phyrexian Angel Horror"),
    ("Llanowar Elves", "M19", "314", "Creature — Elf Druid"),
    ("Sol Ring", "C21", "263", "Artifact"),
    ("Krenko, Mob Boss", "M13", "141", "Legendary Creature — Goblin Warrior"),
    ("Lightning Bolt", "LEA", "161", "Instant"),
    ("Opt", "XLN", "65", "Instant"),
    ("Thalia, Guardian of Thraben", "DKA", "24", "Legendary Creature — Human Soldier"),
    ("Island", "UNH", "137", "Basic Land — Island"),
    ("Counterspell", "7ED", "67", "Instant"),
    ("Goblin Guide", "ZEN", "126", "Creature — Goblin Scout"),
    ("Arcane Signet", "C21", "237", "Artifact"),
    ("Karn Liberated", "NPH", "1", "Legendary Planeswalker — Karn"),
    ("Doubling Season", "RAV", "155", "Enchantment"),
];

/// Three legendary creatures among thirteen cards
fn creature_fixture() -> (CollectionStore, Arc<StaticFetcher>) {
    let mut fetcher = StaticFetcher::new();
    let mut rows = Vec::new();
    for (name, set, cn, type_line) in CREATURE_FIXTURE {
        fetcher = fetcher.with_card(CardIdentity::new(name, set, cn), metadata(name, type_line, Some(1.0)));
        rows.push(row(name, set, cn, 1, Some(1.0)));
    }
    let store = CollectionStore::from_rows(rows, Currency::Usd).unwrap();
    (store, Arc::new(fetcher))
}

fn legendary_creatures_by(field: &str, order: Option<&str>) -> Plan {
    plan_for(
        Intent::ListBy {
            field: field.to_string(),
            order: order.map(str::to_string),
        },
        Parameters::default().with_predicate(PredicateSpec::new("type", "contains", "legendary creature")),
    )
}

#[tokio::test]
async fn filter_on_type_line_lists_legendary_creatures() {
    let (store, fetcher) = creature_fixture();
    let kb = KnowledgeBase::new(fetcher.clone(), &fast_config());

    let payload = execute(&legendary_creatures_by("name", None), &store, &kb).await.unwrap();

    assert_eq!(
        entry_names(&payload),
        vec!["Atraxa, Praetors' Voice", "Krenko, Mob Boss", "Thalia, Guardian of Thraben"]
    );
    assert_eq!(payload.provenance.rows_scanned, 13);
    assert_eq!(payload.provenance.rows_matched, 3);
    // one fetch per distinct card
    assert_eq!(fetcher.calls(), 13);
}

#[tokio::test]
async fn same_plan_gives_identical_payload() {
    let (store, fetcher) = creature_fixture();
    let kb = KnowledgeBase::new(fetcher.clone(), &fast_config());
    let plan = legendary_creatures_by("value", Some("desc"));

    let first = execute(&plan, &store, &kb).await.unwrap();
    let second = execute(&plan, &store, &kb).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    // second run served from the cache
    assert_eq!(fetcher.calls(), 13);
    // equal values fall back to identity order
    assert_eq!(entry_names(&first)[0], "Atraxa, Praetors' Voice");
}

#[tokio::test]
async fn list_by_puts_unknown_values_last_in_both_orders() {
    let store = CollectionStore::from_rows(
        vec![
            row("Sol Ring", "C21", "263", 1, None),
            row("Opt", "XLN", "65", 1, Some(0.25)),
            row("Lightning Bolt", "LEA", "161", 1, Some(400.0)),
            row("Counterspell", "7ED", "67", 1, Some(1.0)),
        ],
        Currency::Usd,
    )
    .unwrap();
    let kb = empty_kb();
    let list = |order: &str| {
        plan_for(
            Intent::ListBy {
                field: "value".to_string(),
                order: Some(order.to_string()),
            },
            Parameters::default(),
        )
    };

    let desc = execute(&list("desc"), &store, &kb).await.unwrap();
    assert_eq!(entry_names(&desc), vec!["Lightning Bolt", "Counterspell", "Opt", "Sol Ring"]);

    let asc = execute(&list("asc"), &store, &kb).await.unwrap();
    assert_eq!(entry_names(&asc), vec!["Opt", "Counterspell", "Lightning Bolt", "Sol Ring"]);
}

#[tokio::test]
async fn list_by_applies_limit_after_sorting() {
    let plan = plan_for(
        Intent::ListBy {
            field: "value".to_string(),
            order: None,
        },
        Parameters {
            limit: Some(1),
            ..Parameters::default()
        },
    );

    let payload = execute(&plan, &value_store(), &empty_kb()).await.unwrap();

    assert_eq!(entry_names(&payload), vec!["Opt"]);
    assert_eq!(payload.provenance.rows_matched, 3);
}

#[tokio::test]
async fn filter_keeps_import_order_and_skips_unknown() {
    let plan = plan_for(
        Intent::Filter,
        Parameters::default().with_predicate(PredicateSpec::new("value", "lt", "$100")),
    );

    let payload = execute(&plan, &value_store(), &empty_kb()).await.unwrap();

    assert_eq!(entry_names(&payload), vec!["Lightning Bolt", "Opt"]);
}

#[tokio::test]
async fn missing_metadata_is_reported_not_raised() {
    let (store, _) = creature_fixture();
    let kb = empty_kb();

    let payload = execute(&legendary_creatures_by("name", None), &store, &kb).await.unwrap();

    assert!(entry_names(&payload).is_empty());
    assert_eq!(payload.provenance.metadata_missing, 13);
}

#[tokio::test]
async fn must_be_current_fails_on_missing_metadata() {
    let (store, _) = creature_fixture();
    let mut plan = legendary_creatures_by("name", None);
    plan.must_be_current = true;

    let result = execute(&plan, &store, &empty_kb()).await;

    assert!(matches!(result, Err(QueryError::EnrichmentUnavailable(_))));
}

#[tokio::test]
async fn enrichment_timeout_fails_the_query() {
    let (store, _) = creature_fixture();
    let slow = StaticFetcher::new().with_delay(Duration::from_millis(500));
    let config = EngineConfig {
        enrichment_timeout_ms: 20,
        ..fast_config()
    };
    let kb = KnowledgeBase::new(Arc::new(slow), &config);

    let result = execute(&legendary_creatures_by("name", None), &store, &kb).await;

    assert!(matches!(result, Err(QueryError::EnrichmentUnavailable(_))));
}

#[tokio::test]
async fn plan_that_does_not_type_check_is_execution_error() {
    let plan = Plan {
        operations: vec![Operation::Filter {
            predicates: vec![Predicate {
                field: Field::TypeLine,
                op: CompareOp::Contains,
                value: Operand::Text("creature".to_string()),
            }],
        }],
        expected: Shape::Entries,
        currency: Currency::Usd,
        must_be_current: false,
    };

    let result = execute(&plan, &value_store(), &empty_kb()).await;

    assert!(matches!(result, Err(QueryError::Execution(_))));
}

fn deck(name: &str, cards: Vec<DeckCard>) -> DeckArchetype {
    DeckArchetype {
        name: name.to_string(),
        format: Some("commander".to_string()),
        cards,
    }
}

fn overlap_plan(archetypes: Vec<DeckArchetype>, min_score: Option<f64>) -> Plan {
    Plan {
        operations: vec![Operation::OverlapScore { archetypes, min_score }],
        expected: Shape::ArchetypeScores,
        currency: Currency::Usd,
        must_be_current: false,
    }
}

#[tokio::test]
async fn overlap_caps_owned_copies_per_card() {
    let store = CollectionStore::from_rows(
        vec![
            row("Sol Ring", "C21", "263", 4, None),
            row("Lightning Bolt", "LEA", "161", 1, None),
        ],
        Currency::Usd,
    )
    .unwrap();
    let decks = vec![deck(
        "Artifacts",
        vec![DeckCard::named("Sol Ring", 1), DeckCard::named("Arcane Signet", 1)],
    )];

    let payload = execute(&overlap_plan(decks, None), &store, &empty_kb()).await.unwrap();
    let scores = scores(&payload);

    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].score, 0.5);
    assert_eq!(scores[0].owned, 1);
    assert_eq!(scores[0].required, 2);
    assert_eq!(
        scores[0].missing,
        vec![MissingCard {
            name: "Arcane Signet".to_string(),
            needed: 1
        }]
    );
}

#[tokio::test]
async fn overlap_counts_every_printing_for_name_only_lines() {
    let store = CollectionStore::from_rows(
        vec![
            row("Sol Ring", "C21", "263", 1, None),
            row("Sol Ring", "CMR", "472", 1, None),
        ],
        Currency::Usd,
    )
    .unwrap();
    let exact = DeckCard {
        name: "Sol Ring".to_string(),
        set_code: Some("c21".to_string()),
        collector_number: Some("263".to_string()),
        quantity: 2,
    };
    let decks = vec![
        deck("By Name", vec![DeckCard::named("sol ring", 2)]),
        deck("Exact", vec![exact]),
    ];

    let payload = execute(&overlap_plan(decks, None), &store, &empty_kb()).await.unwrap();
    let scores = scores(&payload);

    assert_eq!(scores[0].archetype, "By Name");
    assert_eq!(scores[0].score, 1.0);
    assert_eq!(scores[1].archetype, "Exact");
    assert_eq!(scores[1].score, 0.5);
}

#[tokio::test]
async fn overlap_never_counts_one_copy_for_two_lines() {
    let store = CollectionStore::from_rows(vec![row("Sol Ring", "C21", "263", 1, None)], Currency::Usd).unwrap();
    let exact = DeckCard {
        name: "Sol Ring".to_string(),
        set_code: Some("C21".to_string()),
        collector_number: Some("263".to_string()),
        quantity: 1,
    };
    let decks = vec![deck("Rings", vec![exact, DeckCard::named("Sol Ring", 1)])];

    let payload = execute(&overlap_plan(decks, None), &store, &empty_kb()).await.unwrap();
    let scores = scores(&payload);

    assert_eq!(scores[0].owned, 1);
    assert_eq!(scores[0].required, 2);
    assert_eq!(scores[0].score, 0.5);
    assert_eq!(
        scores[0].missing,
        vec![MissingCard {
            name: "Sol Ring".to_string(),
            needed: 1
        }]
    );
}

#[tokio::test]
async fn overlap_name_lines_use_copies_left_by_exact_lines() {
    let store = CollectionStore::from_rows(
        vec![
            row("Sol Ring", "C21", "263", 2, None),
            row("Sol Ring", "CMR", "472", 1, None),
        ],
        Currency::Usd,
    )
    .unwrap();
    // the name-only line comes first but the exact line still gets its printing
    let exact = DeckCard {
        name: "Sol Ring".to_string(),
        set_code: Some("CMR".to_string()),
        collector_number: Some("472".to_string()),
        quantity: 1,
    };
    let decks = vec![deck("Rings", vec![DeckCard::named("Sol Ring", 3), exact])];

    let payload = execute(&overlap_plan(decks, None), &store, &empty_kb()).await.unwrap();
    let scores = scores(&payload);

    assert_eq!(scores[0].owned, 3);
    assert_eq!(scores[0].required, 4);
    assert_eq!(
        scores[0].missing,
        vec![MissingCard {
            name: "Sol Ring".to_string(),
            needed: 1
        }]
    );
}

#[tokio::test]
async fn overlap_ranks_by_score_then_name_and_applies_threshold() {
    let store = CollectionStore::from_rows(vec![row("Sol Ring", "C21", "263", 1, None)], Currency::Usd).unwrap();
    let decks = vec![
        deck("Zeta", vec![DeckCard::named("Sol Ring", 1)]),
        deck("Alpha", vec![DeckCard::named("Sol Ring", 1)]),
        deck("Nothing Owned", vec![DeckCard::named("Mana Crypt", 1)]),
        deck("Empty", vec![]),
    ];
    let kb = empty_kb();

    let all = execute(&overlap_plan(decks.clone(), None), &store, &kb).await.unwrap();
    let names: Vec<&str> = scores(&all).iter().map(|s| s.archetype.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Zeta", "Empty", "Nothing Owned"]);
    assert!(scores(&all).iter().all(|s| (0.0..=1.0).contains(&s.score)));

    let above = execute(&overlap_plan(decks, Some(0.3)), &store, &kb).await.unwrap();
    assert_eq!(scores(&above).len(), 2);
}

#[tokio::test]
async fn overlap_merges_repeated_deck_lines_before_capping() {
    let store = CollectionStore::from_rows(vec![row("Island", "UNH", "137", 30, None)], Currency::Usd).unwrap();
    let decks = vec![deck(
        "Mono Blue",
        vec![
            DeckCard::named("Island", 10),
            DeckCard::named("Brainstorm", 4),
            DeckCard::named("Island", 6),
        ],
    )];

    let payload = execute(&overlap_plan(decks, None), &store, &empty_kb()).await.unwrap();
    let scores = scores(&payload);

    assert_eq!(scores[0].owned, 16);
    assert_eq!(scores[0].required, 20);
    assert_eq!(scores[0].score, 0.8);
}

#[tokio::test]
async fn overlap_uses_only_filtered_rows() {
    let mut foil = row("Sol Ring", "C21", "263", 1, None);
    foil.foil = "foil".to_string();
    let store = CollectionStore::from_rows(
        vec![foil, row("Arcane Signet", "C21", "237", 1, None)],
        Currency::Usd,
    )
    .unwrap();
    let plan = Plan {
        operations: vec![
            Operation::Filter {
                predicates: vec![Predicate {
                    field: Field::Finish,
                    op: CompareOp::Eq,
                    value: Operand::Text("foil".to_string()),
                }],
            },
            Operation::OverlapScore {
                archetypes: vec![deck(
                    "Artifacts",
                    vec![DeckCard::named("Sol Ring", 1), DeckCard::named("Arcane Signet", 1)],
                )],
                min_score: None,
            },
        ],
        expected: Shape::ArchetypeScores,
        currency: Currency::Usd,
        must_be_current: false,
    };

    let payload = execute(&plan, &store, &empty_kb()).await.unwrap();

    assert_eq!(scores(&payload)[0].score, 0.5);
    assert_eq!(payload.provenance.rows_matched, 1);
}
