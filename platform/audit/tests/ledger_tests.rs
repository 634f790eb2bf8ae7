use async_trait::async_trait;
use audit::stats::{ActorCount, CategoryCount, DailyCount, EventTypeCount};
use audit::{
    ActorRef, AuditFilter, AuditInput, AuditLedger, AuditRecord, AuditSort, AuditStore, DateRange,
    InMemoryAuditStore, LedgerError, Pagination, PendingRecord, RepositoryError,
    RepositoryErrorKind, RepositoryResult, ResourceRef, SortField, SortOrder,
};
use chrono::{Duration, TimeZone, Timelike, Utc};
use event_bus::ActorType;
use serde_json::json;
use uuid::Uuid;

fn input(event_type: &str, actor_id: &str, resource_id: &str) -> AuditInput {
    let action = event_type.rsplit('.').next().unwrap_or(event_type).to_string();
    AuditInput::new(
        event_type,
        ActorRef::new(ActorType::User, actor_id),
        ResourceRef::new("trip", resource_id),
        action,
        "itineraries",
    )
}

fn ledger() -> AuditLedger<InMemoryAuditStore> {
    AuditLedger::new(InMemoryAuditStore::new())
}

#[tokio::test]
async fn test_sequence_numbers_strictly_increase() {
    let ledger = ledger();

    let mut sequences = Vec::new();
    for n in 0..3 {
        let record = ledger
            .store(input("trip.created", "user-1", &format!("trip-{n}")))
            .await
            .unwrap();
        sequences.push(record.sequence_number);
    }

    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_store_fills_defaults_and_seals_record() {
    let ledger = ledger();
    let record = ledger
        .store(input("trip.created", "user-1", "trip-1").with_metadata("channel", json!("web")))
        .await
        .unwrap();

    assert_eq!(record.category, "trip");
    assert!(Uuid::parse_str(&record.correlation_id).is_ok());
    assert_eq!(record.checksum.len(), 64);
    assert!(record.verify_checksum());
    assert!(ledger.verify(&record));

    let found = ledger.find_by_id(record.id).await.unwrap();
    assert_eq!(found, Some(record));
}

#[tokio::test]
async fn test_timestamp_truncated_to_microseconds() {
    let ledger = ledger();
    let occurred = Utc
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .unwrap()
        .with_nanosecond(123_456_789)
        .unwrap();

    let record = ledger
        .store(input("trip.created", "user-1", "trip-1").with_timestamp(occurred))
        .await
        .unwrap();

    assert_eq!(record.timestamp.nanosecond(), 123_456_000);
    assert!(record.verify_checksum());
}

#[tokio::test]
async fn test_tampering_is_detected() {
    let ledger = ledger();
    let admin = AuditInput::new(
        "booking.refunded",
        ActorRef::new(ActorType::Admin, "admin-7"),
        ResourceRef::new("booking", "bk_1"),
        "refunded",
        "payments",
    )
    .with_reason("chargeback");
    let record = ledger.store(admin).await.unwrap();

    let mut tampered = record.clone();
    tampered.reason = Some("customer request".to_string());
    assert!(!ledger.verify(&tampered));

    let mut tampered = record;
    tampered.actor.id = "admin-8".to_string();
    assert!(!tampered.verify_checksum());

    let unjustified = ledger.store(input("trip.created", "user-1", "trip-1")).await.unwrap();
    assert!(unjustified.reason.is_none());
    let mut blanked = unjustified.clone();
    blanked.reason = Some(String::new());
    assert!(!blanked.verify_checksum());

    let mut shifted = unjustified;
    shifted.action = "created|".to_string();
    shifted.reason = Some(String::new());
    assert!(!shifted.verify_checksum());
}

#[tokio::test]
async fn test_admin_without_reason_is_rejected() {
    let ledger = ledger();
    let admin = AuditInput::new(
        "booking.refunded",
        ActorRef::new(ActorType::Admin, "admin-7"),
        ResourceRef::new("booking", "bk_1"),
        "refunded",
        "payments",
    );

    match ledger.store(admin).await {
        Err(LedgerError::Validation(err)) => {
            assert_eq!(err.violations.len(), 1);
            assert_eq!(err.violations[0].field, "reason");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(ledger.store_backend().is_empty());
}

#[tokio::test]
async fn test_batch_is_all_or_nothing() {
    let ledger = ledger();
    let mut broken = input("trip.updated", "user-1", "trip-1");
    broken.action = String::new();

    let err = ledger
        .store_batch(vec![
            input("trip.created", "user-1", "trip-1"),
            broken,
            input("trip.deleted", "user-1", "trip-1"),
        ])
        .await
        .unwrap_err();

    match err {
        LedgerError::Validation(err) => {
            assert_eq!(err.violations.len(), 1);
            assert_eq!(err.violations[0].index, Some(1));
            assert_eq!(err.violations[0].field, "action");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(ledger.store_backend().is_empty());

    let stored = ledger
        .store_batch(vec![
            input("trip.created", "user-1", "trip-1"),
            input("trip.updated", "user-1", "trip-1"),
        ])
        .await
        .unwrap();
    let sequences: Vec<i64> = stored.iter().map(|r| r.sequence_number).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(stored[0].stored_at, stored[1].stored_at);
}

#[tokio::test]
async fn test_duplicate_id_rejected_without_partial_write() {
    let ledger = ledger();
    let id = Uuid::new_v4();
    ledger
        .store(input("trip.created", "user-1", "trip-1").with_id(id))
        .await
        .unwrap();

    let err = ledger
        .store_batch(vec![
            input("trip.updated", "user-1", "trip-1"),
            input("trip.updated", "user-1", "trip-1").with_id(id),
        ])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LedgerError::Repository(RepositoryError {
            kind: RepositoryErrorKind::Constraint,
            ..
        })
    ));
    assert_eq!(ledger.store_backend().len(), 1);
}

#[tokio::test]
async fn test_correlation_group_in_causal_order() {
    let ledger = ledger();
    let base = Utc::now();

    // Occurrence times deliberately out of write order
    for (offset, event_type) in [(30, "trip.created"), (10, "trip.priced"), (20, "trip.booked")] {
        ledger
            .store(
                input(event_type, "user-1", "trip-1")
                    .with_correlation_id("txn-1")
                    .with_timestamp(base + Duration::seconds(offset)),
            )
            .await
            .unwrap();
    }
    ledger
        .store(input("trip.created", "user-2", "trip-2").with_correlation_id("txn-2"))
        .await
        .unwrap();

    let page = ledger
        .find_by_correlation_id("txn-1", Pagination::default())
        .await
        .unwrap();

    let types: Vec<&str> = page.data.iter().map(|r| r.event_type.as_str()).collect();
    assert_eq!(types, vec!["trip.created", "trip.priced", "trip.booked"]);
    assert_eq!(page.pagination.total_items, 3);
}

#[tokio::test]
async fn test_resource_and_actor_history_most_recent_first() {
    let ledger = ledger();
    let base = Utc::now() - Duration::hours(3);

    for hours in 0..3 {
        ledger
            .store(
                input("trip.updated", "user-1", "trip-1")
                    .with_description(format!("revision {hours}"))
                    .with_timestamp(base + Duration::hours(hours)),
            )
            .await
            .unwrap();
    }

    let by_resource = ledger
        .find_by_resource("trip", "trip-1", Pagination::default())
        .await
        .unwrap();
    let descriptions: Vec<&str> = by_resource
        .data
        .iter()
        .filter_map(|r| r.description.as_deref())
        .collect();
    assert_eq!(descriptions, vec!["revision 2", "revision 1", "revision 0"]);

    let by_actor = ledger.find_by_actor("user-1", Pagination::new(1, 2)).await.unwrap();
    assert_eq!(by_actor.data.len(), 2);
    assert!(by_actor.pagination.has_next_page);
    assert_eq!(by_actor.data[0].description.as_deref(), Some("revision 2"));

    let missing = ledger
        .find_by_resource("trip", "trip-404", Pagination::default())
        .await
        .unwrap();
    assert!(missing.is_empty());
    assert_eq!(missing.pagination.total_items, 0);
    assert_eq!(missing.pagination.total_pages, 0);
}

#[tokio::test]
async fn test_query_pagination_arithmetic() {
    let ledger = ledger();
    let inputs: Vec<AuditInput> = (0..25)
        .map(|n| input("trip.created", "user-1", &format!("trip-{n}")))
        .collect();
    ledger.store_batch(inputs).await.unwrap();

    let page = ledger
        .query(AuditFilter::default(), Pagination::new(3, 10), AuditSort::causal())
        .await
        .unwrap();

    assert_eq!(page.data.len(), 5);
    assert_eq!(page.data[0].sequence_number, 21);
    assert_eq!(page.pagination.total_items, 25);
    assert_eq!(page.pagination.total_pages, 3);
    assert!(!page.pagination.has_next_page);
    assert!(page.pagination.has_previous_page);

    let beyond = ledger
        .query(AuditFilter::default(), Pagination::new(9, 10), AuditSort::causal())
        .await
        .unwrap();
    assert!(beyond.is_empty());
    assert_eq!(beyond.pagination.total_items, 25);
}

#[tokio::test]
async fn test_query_rejects_bad_pagination_and_ranges() {
    let ledger = ledger();

    for pagination in [Pagination::new(0, 10), Pagination::new(1, 0), Pagination::new(1, 101)] {
        let result = ledger
            .query(AuditFilter::default(), pagination, AuditSort::default())
            .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))), "{pagination:?}");
    }

    let now = Utc::now();
    let inverted = AuditFilter {
        date_from: Some(now),
        date_to: Some(now - Duration::days(1)),
        ..AuditFilter::default()
    };
    let result = ledger
        .query(inverted, Pagination::default(), AuditSort::default())
        .await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn test_query_filters_combine() {
    let ledger = ledger();
    let admin = AuditInput::new(
        "booking.refunded",
        ActorRef::new(ActorType::Admin, "admin-7"),
        ResourceRef::new("booking", "bk_1"),
        "refunded",
        "payments",
    )
    .with_reason("Chargeback dispute")
    .with_metadata("ticket", json!("SUP-991"));

    ledger
        .store_batch(vec![
            input("trip.created", "user-1", "trip-1"),
            input("trip.cancelled", "user-2", "trip-2").with_description("weather"),
            input("tripleg.added", "user-1", "trip-1"),
            admin,
        ])
        .await
        .unwrap();

    let run = |filter: AuditFilter| {
        let ledger = &ledger;
        async move {
            ledger
                .query(filter, Pagination::default(), AuditSort::new(SortField::SequenceNumber, SortOrder::Asc))
                .await
                .unwrap()
                .data
                .into_iter()
                .map(|r| r.event_type)
                .collect::<Vec<_>>()
        }
    };

    // Category is a prefix match
    let by_category = run(AuditFilter {
        category: Some("trip".into()),
        ..AuditFilter::default()
    })
    .await;
    assert_eq!(by_category, vec!["trip.created", "trip.cancelled", "tripleg.added"]);

    let by_actor_type = run(AuditFilter {
        actor_types: vec![ActorType::Admin],
        ..AuditFilter::default()
    })
    .await;
    assert_eq!(by_actor_type, vec!["booking.refunded"]);

    let search_reason = run(AuditFilter {
        search: Some("chargeback".into()),
        ..AuditFilter::default()
    })
    .await;
    assert_eq!(search_reason, vec!["booking.refunded"]);

    let search_metadata = run(AuditFilter {
        search: Some("sup-991".into()),
        ..AuditFilter::default()
    })
    .await;
    assert_eq!(search_metadata, vec!["booking.refunded"]);

    // only values are searched, never the serialized JSON around them
    for needle in ["ticket", "\"ticket\":\"sup", "\":\""] {
        let hits = run(AuditFilter {
            search: Some(needle.into()),
            ..AuditFilter::default()
        })
        .await;
        assert!(hits.is_empty(), "{needle} matched {hits:?}");
    }

    let combined = run(AuditFilter {
        actor_ids: vec!["user-1".into(), "user-2".into()],
        event_types: vec!["trip.cancelled".into(), "tripleg.added".into()],
        source_services: vec!["itineraries".into()],
        ..AuditFilter::default()
    })
    .await;
    assert_eq!(combined, vec!["trip.cancelled", "tripleg.added"]);

    let sorted = ledger
        .query(
            AuditFilter::default(),
            Pagination::default(),
            AuditSort::new(SortField::EventType, SortOrder::Asc),
        )
        .await
        .unwrap();
    let types: Vec<&str> = sorted.data.iter().map(|r| r.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec!["booking.refunded", "trip.cancelled", "trip.created", "tripleg.added"]
    );
}

#[tokio::test]
async fn test_statistics_over_range() {
    let ledger = ledger();
    let day = |d: u32| Utc.with_ymd_and_hms(2026, 5, d, 9, 0, 0).unwrap();

    let mut inputs = Vec::new();
    for (d, event_type, actor) in [
        (3, "trip.created", "user-1"),
        (3, "trip.created", "user-2"),
        (1, "trip.cancelled", "user-1"),
        (2, "booking.confirmed", "user-1"),
        (20, "trip.created", "user-3"),
    ] {
        inputs.push(input(event_type, actor, "trip-1").with_timestamp(day(d)));
    }
    ledger.store_batch(inputs).await.unwrap();

    let range = DateRange::new(day(1), day(10)).unwrap();
    let stats = ledger.get_statistics(Some(range)).await.unwrap();

    assert_eq!(stats.date_range, range);
    assert_eq!(stats.total_events, 4);
    assert_eq!(
        stats.events_by_category,
        vec![
            CategoryCount { category: "trip".into(), count: 3 },
            CategoryCount { category: "booking".into(), count: 1 },
        ]
    );
    let dates: Vec<u32> = stats
        .daily_series
        .iter()
        .map(|d| chrono::Datelike::day(&d.date))
        .collect();
    assert_eq!(dates, vec![1, 2, 3]);
    assert_eq!(stats.daily_series[2].count, 2);
    assert_eq!(
        stats.top_event_types[0],
        EventTypeCount { event_type: "trip.created".into(), count: 2 }
    );
    assert_eq!(
        stats.top_actors[0],
        ActorCount {
            actor_id: "user-1".into(),
            actor_type: ActorType::User,
            count: 3
        }
    );
}

#[tokio::test]
async fn test_statistics_caps_top_lists_and_daily_series() {
    let ledger = ledger();
    let first_day = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();

    // twelve types and actors: the last of each leads with 5, the rest tie at 3
    let mut inputs = Vec::new();
    for i in 0..12 {
        let repeats = if i == 11 { 5 } else { 3 };
        for _ in 0..repeats {
            let day = first_day + Duration::days(inputs.len() as i64);
            inputs.push(
                input(&format!("fleet.t{i:02}"), &format!("actor-{i:02}"), "trip-1").with_timestamp(day),
            );
        }
    }
    assert_eq!(inputs.len(), 38);
    ledger.store_batch(inputs).await.unwrap();

    let range = DateRange::new(first_day, first_day + Duration::days(90)).unwrap();
    let stats = ledger.get_statistics(Some(range)).await.unwrap();
    assert_eq!(stats.total_events, 38);

    let expected_keys: Vec<String> = std::iter::once(11).chain(0..9).map(|i| format!("{i:02}")).collect();

    assert_eq!(stats.top_event_types.len(), 10);
    let types: Vec<String> = stats.top_event_types.iter().map(|t| t.event_type.clone()).collect();
    let expected_types: Vec<String> = expected_keys.iter().map(|k| format!("fleet.t{k}")).collect();
    assert_eq!(types, expected_types);
    assert_eq!(stats.top_event_types[0].count, 5);
    assert!(stats.top_event_types[1..].iter().all(|t| t.count == 3));

    assert_eq!(stats.top_actors.len(), 10);
    let actors: Vec<String> = stats.top_actors.iter().map(|a| a.actor_id.clone()).collect();
    let expected_actors: Vec<String> = expected_keys.iter().map(|k| format!("actor-{k}")).collect();
    assert_eq!(actors, expected_actors);

    // 38 active days, only the newest 30 are kept, oldest first
    assert_eq!(stats.daily_series.len(), 30);
    assert!(stats.daily_series.windows(2).all(|w| w[0].date < w[1].date));
    assert_eq!(stats.daily_series[0].date, (first_day + Duration::days(8)).date_naive());
    assert_eq!(stats.daily_series[29].date, (first_day + Duration::days(37)).date_naive());
    assert!(stats.daily_series.iter().all(|d| d.count == 1));
}

#[tokio::test]
async fn test_statistics_default_window() {
    let ledger = ledger();
    ledger.store(input("trip.created", "user-1", "trip-1")).await.unwrap();
    ledger
        .store(
            input("trip.created", "user-1", "trip-2").with_timestamp(Utc::now() - Duration::days(45)),
        )
        .await
        .unwrap();

    let stats = ledger.get_statistics(None).await.unwrap();
    assert_eq!(stats.total_events, 1);
    assert_eq!(stats.date_range.to - stats.date_range.from, Duration::days(30));
}

/// Delegates to an in-memory store but cannot rank actors
struct BrokenAggregates {
    inner: InMemoryAuditStore,
}

#[async_trait]
impl AuditStore for BrokenAggregates {
    async fn append(&self, rows: Vec<PendingRecord>) -> RepositoryResult<Vec<AuditRecord>> {
        self.inner.append(rows).await
    }

    async fn fetch_by_id(&self, id: Uuid) -> RepositoryResult<Option<AuditRecord>> {
        self.inner.fetch_by_id(id).await
    }

    async fn fetch_page(
        &self,
        filter: &AuditFilter,
        sort: AuditSort,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<AuditRecord>> {
        self.inner.fetch_page(filter, sort, limit, offset).await
    }

    async fn count(&self, filter: &AuditFilter) -> RepositoryResult<i64> {
        self.inner.count(filter).await
    }

    async fn count_by_category(&self, range: DateRange) -> RepositoryResult<Vec<CategoryCount>> {
        self.inner.count_by_category(range).await
    }

    async fn daily_counts(&self, range: DateRange, limit: usize) -> RepositoryResult<Vec<DailyCount>> {
        self.inner.daily_counts(range, limit).await
    }

    async fn top_event_types(
        &self,
        range: DateRange,
        limit: usize,
    ) -> RepositoryResult<Vec<EventTypeCount>> {
        self.inner.top_event_types(range, limit).await
    }

    async fn top_actors(&self, _range: DateRange, _limit: usize) -> RepositoryResult<Vec<ActorCount>> {
        Err(RepositoryError::new(RepositoryErrorKind::Unavailable, "replica offline"))
    }
}

#[tokio::test]
async fn test_statistics_fail_as_a_whole() {
    let ledger = AuditLedger::new(BrokenAggregates {
        inner: InMemoryAuditStore::new(),
    });
    ledger.store(input("trip.created", "user-1", "trip-1")).await.unwrap();

    let err = ledger.get_statistics(None).await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("replica offline"));
}
