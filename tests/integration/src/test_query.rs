//! Query, find and pagination integration tests.

#[cfg(test)]
mod tests {
    use dynarecord_core::{
        FindOptions, Filters, QueryOptions, RecordConfig, RecordError, StoreClient, Value,
        records_to_json,
    };
    use dynarecord_model::input::PutItemInput;
    use dynarecord_model::{AttributeValue, DynamoDBOperation, Item};
    use serde_json::json;

    use crate::{memory_context, scripted_context, seed_users, user_item};

    fn page(range: std::ops::Range<usize>) -> Vec<Item> {
        range.map(|i| user_item(&format!("u{i:03}"), "t1")).collect()
    }

    #[tokio::test]
    async fn test_should_follow_continuation_keys_until_exhausted() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        store.push_page(page(0..40), true);
        store.push_page(page(40..80), true);
        store.push_page(page(80..100), false);

        let repo = ctx.repository("user").unwrap();
        let records = repo
            .query("tenantId", "t1", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 100);
        assert_eq!(records[99].id(), Some("u099"));
        assert!(records.iter().all(|r| !r.is_new()));

        let queries = store.requests_of(DynamoDBOperation::Query);
        assert_eq!(queries.len(), 3);
        assert!(queries[0].get("ExclusiveStartKey").is_none());
        assert!(queries[0].get("Limit").is_none());
        assert_eq!(queries[1]["ExclusiveStartKey"], json!({"id": {"S": "u039"}}));
        assert_eq!(queries[2]["ExclusiveStartKey"], json!({"id": {"S": "u079"}}));
    }

    #[tokio::test]
    async fn test_should_stop_paging_once_limit_is_reached() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        store.push_page(page(0..40), true);
        store.push_page(page(40..80), true);
        store.push_page(page(80..100), false);

        let repo = ctx.repository("user").unwrap();
        let records = repo
            .query("tenantId", "t1", QueryOptions::default().limit(50))
            .await
            .unwrap();
        assert_eq!(records.len(), 50);
        assert_eq!(records[49].id(), Some("u049"));

        let queries = store.requests_of(DynamoDBOperation::Query);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0]["Limit"], 50);
        assert_eq!(queries[1]["Limit"], 10);
    }

    #[tokio::test]
    async fn test_should_issue_nothing_for_zero_limit() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let records = repo
            .query("tenantId", "t1", QueryOptions::default().limit(0))
            .await
            .unwrap();
        assert!(records.is_empty());
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_build_tenant_query_with_filter() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        repo.query(
            "tenantId",
            "t1",
            QueryOptions::default().filter("status", "active"),
        )
        .await
        .unwrap();

        let query = &store.requests_of(DynamoDBOperation::Query)[0];
        assert_eq!(query["TableName"], "users");
        assert_eq!(query["IndexName"], "tenantId-idx");
        assert_eq!(query["KeyConditionExpression"], "#tenantId = :tenantId");
        assert_eq!(query["FilterExpression"], "#status = :status");
        assert_eq!(query["ScanIndexForward"], false);
        assert_eq!(
            query["ExpressionAttributeNames"],
            json!({"#tenantId": "tenantId", "#status": "status"})
        );
        assert_eq!(
            query["ExpressionAttributeValues"],
            json!({":tenantId": {"S": "t1"}, ":status": {"S": "active"}})
        );
    }

    #[tokio::test]
    async fn test_should_bind_values_for_custom_filter_expression() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let options = QueryOptions::default()
            .on_table()
            .key_condition("#id = :id")
            .filter_expression("#age >= :minAge")
            .bind("minAge", 18)
            .scan_index_forward(true);
        let options = QueryOptions {
            filters: vec!["age".to_owned()],
            ..options
        };
        repo.query("id", "u1", options).await.unwrap();

        let query = &store.requests_of(DynamoDBOperation::Query)[0];
        assert!(query.get("IndexName").is_none());
        assert_eq!(query["KeyConditionExpression"], "#id = :id");
        assert_eq!(query["FilterExpression"], "#age >= :minAge");
        assert_eq!(query["ExpressionAttributeNames"]["#age"], "age");
        assert_eq!(query["ExpressionAttributeValues"][":minAge"], json!({"N": "18"}));
        assert_eq!(query["ScanIndexForward"], true);
    }

    #[tokio::test]
    async fn test_should_reject_query_without_value() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let err = repo
            .query("tenantId", "", QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::MalformedRequest(_)));
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_reject_list_valued_key_before_sending() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let err = repo
            .query(
                "tenantId",
                Value::from(vec!["t1", "t2"]),
                QueryOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::MalformedRequest(_)));
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_send_only_bindings_used_by_key_condition_override() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let options = QueryOptions::default()
            .key_condition("#tenantId = :t")
            .filter_expression("#status = :s")
            .bind(":t", "t1")
            .bind(":s", "active");
        let options = QueryOptions {
            filters: vec!["status".to_owned()],
            ..options
        };
        repo.query("tenantId", "t1", options).await.unwrap();

        let query = &store.requests_of(DynamoDBOperation::Query)[0];
        assert_eq!(query["KeyConditionExpression"], "#tenantId = :t");
        assert_eq!(query["FilterExpression"], "#status = :s");
        assert_eq!(
            query["ExpressionAttributeNames"],
            json!({"#tenantId": "tenantId", "#status": "status"})
        );
        assert_eq!(
            query["ExpressionAttributeValues"],
            json!({":t": {"S": "t1"}, ":s": {"S": "active"}})
        );
    }

    #[tokio::test]
    async fn test_should_bind_placeholders_for_override_with_generated_filter() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let options = QueryOptions::default()
            .key_condition("#tenantId = :tenant")
            .bind(":tenant", "t1")
            .filter("status", "active");
        repo.query("tenantId", "t1", options).await.unwrap();

        let query = &store.requests_of(DynamoDBOperation::Query)[0];
        assert_eq!(query["KeyConditionExpression"], "#tenantId = :tenant");
        assert_eq!(query["FilterExpression"], "#status = :status");
        assert_eq!(
            query["ExpressionAttributeValues"],
            json!({":tenant": {"S": "t1"}, ":status": {"S": "active"}})
        );
    }

    #[tokio::test]
    async fn test_should_apply_configured_page_size_and_prefix() {
        let config = RecordConfig {
            page_size: Some(25),
            table_prefix: "dev-".to_owned(),
            ..RecordConfig::default()
        };
        let (store, ctx) = scripted_context(config);
        let repo = ctx.repository("user").unwrap();
        assert_eq!(repo.table_name(), "dev-users");
        repo.query("tenantId", "t1", QueryOptions::default().limit(100))
            .await
            .unwrap();

        let query = &store.requests_of(DynamoDBOperation::Query)[0];
        assert_eq!(query["TableName"], "dev-users");
        assert_eq!(query["Limit"], 25);
    }

    #[tokio::test]
    async fn test_should_pick_first_indexed_equality_for_find() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let filters = Filters::new()
            .eq("status", "active")
            .eq("email", "a@b.com")
            .eq("tenantId", "t1");
        repo.find(&filters, FindOptions::default()).await.unwrap();

        let query = &store.requests_of(DynamoDBOperation::Query)[0];
        assert_eq!(query["IndexName"], "email-idx");
        assert_eq!(query["KeyConditionExpression"], "#email = :email");
        assert_eq!(
            query["FilterExpression"],
            "#status = :status AND #tenantId = :tenantId"
        );
    }

    #[tokio::test]
    async fn test_should_scan_when_no_index_matches() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        let filters = Filters::new().any_of("status", ["active", "pending"]);
        repo.find(&filters, FindOptions::default()).await.unwrap();
        repo.find(
            &filters,
            FindOptions {
                structured: true,
                ..FindOptions::default()
            },
        )
        .await
        .unwrap();

        let scans = store.requests_of(DynamoDBOperation::Scan);
        assert_eq!(scans.len(), 2);
        assert!(store.requests_of(DynamoDBOperation::Query).is_empty());
        assert_eq!(scans[0]["FilterExpression"], "#status IN (:status0, :status1)");
        assert_eq!(
            scans[1]["ScanFilter"],
            json!({
                "status": {
                    "ComparisonOperator": "IN",
                    "AttributeValueList": [{"S": "active"}, {"S": "pending"}]
                }
            })
        );
        assert!(scans[1].get("FilterExpression").is_none());
    }

    #[tokio::test]
    async fn test_should_validate_named_index_lookups() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();

        let err = repo
            .find_by_index("phone-idx", &Filters::new(), FindOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::UnknownIndex { ref index, .. } if index == "phone-idx"));

        let err = repo
            .find_by_index(
                "email-idx",
                &Filters::new().eq("tenantId", "t1"),
                FindOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::MalformedRequest(_)));
        assert!(store.requests().is_empty());

        repo.find_by_index(
            "tenantId-idx",
            &Filters::new().eq("email", "a@b.com").eq("tenantId", "t1"),
            FindOptions::default(),
        )
        .await
        .unwrap();
        let query = &store.requests_of(DynamoDBOperation::Query)[0];
        assert_eq!(query["IndexName"], "tenantId-idx");
        assert_eq!(query["FilterExpression"], "#email = :email");
    }

    fn created_at(i: i64) -> i64 {
        1_700_000_000 + i
    }

    fn dated_user(i: i64, tenant: &str) -> Item {
        let mut item = user_item(&format!("u{i:02}"), tenant);
        item.insert("created".to_owned(), AttributeValue::n(created_at(i)));
        item
    }

    #[tokio::test]
    async fn test_should_return_newest_items_first_under_limit() {
        let (store, ctx) = memory_context();
        let repo = ctx.repository("user").unwrap();
        for (i, tenant) in (0..15).map(|i| (i, "t1")).chain([(20, "t2")]) {
            store
                .put_item(PutItemInput {
                    table_name: repo.table_name().to_owned(),
                    item: dated_user(i, tenant),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let records = repo
            .query(
                "tenantId",
                "t1",
                QueryOptions::default().limit(10).scan_index_forward(false),
            )
            .await
            .unwrap();
        let created: Vec<i64> = records.iter().filter_map(|r| r.created()).collect();
        let expected: Vec<i64> = (5..15).rev().map(created_at).collect();
        assert_eq!(created, expected);
        assert_eq!(records[0].id(), Some("u14"));
    }

    #[tokio::test]
    async fn test_should_request_newest_page_with_limit() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        store.push_page((5..15).rev().map(|i| dated_user(i, "t1")).collect(), true);

        let repo = ctx.repository("user").unwrap();
        let records = repo
            .query(
                "tenantId",
                "t1",
                QueryOptions::default().limit(10).scan_index_forward(false),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].created(), Some(created_at(14)));
        assert_eq!(records[9].created(), Some(created_at(5)));

        let queries = store.requests_of(DynamoDBOperation::Query);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0]["Limit"], 10);
        assert_eq!(queries[0]["ScanIndexForward"], false);
    }

    const USERS: &[(&str, &str, &str)] = &[
        ("u1", "t1", "active"),
        ("u2", "t1", "inactive"),
        ("u3", "t1", "pending"),
        ("u4", "t2", "active"),
        ("u5", "t1", "active"),
    ];

    fn ids(records: &[dynarecord_core::Record]) -> Vec<String> {
        let mut ids: Vec<String> = records
            .iter()
            .filter_map(|r| r.id().map(str::to_owned))
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_should_query_and_find_against_memory_store() {
        let (_store, ctx) = memory_context();
        let repo = ctx.repository("user").unwrap();
        seed_users(&repo, USERS).await.unwrap();

        let active = repo
            .query(
                "tenantId",
                "t1",
                QueryOptions::default().filter("status", "active"),
            )
            .await
            .unwrap();
        assert_eq!(ids(&active), ["u1", "u5"]);

        let open = repo
            .find(
                &Filters::new().any_of("status", ["active", "pending"]),
                FindOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&open), ["u1", "u3", "u4", "u5"]);

        let structured = repo
            .find(
                &Filters::new().any_of("status", ["active", "pending"]),
                FindOptions {
                    structured: true,
                    ..FindOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ids(&structured), ids(&open));

        let limited = repo
            .query("tenantId", "t1", QueryOptions::default().limit(3))
            .await
            .unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[tokio::test]
    async fn test_should_page_through_memory_store_with_small_pages() {
        let (store, ctx) = memory_context();
        let repo = ctx.repository("user").unwrap();
        seed_users(&repo, USERS).await.unwrap();
        assert_eq!(store.item_count(repo.table_name()), 5);

        let paged_ctx = dynarecord_core::RecordContext::with_config(
            store.clone(),
            RecordConfig {
                page_size: Some(2),
                ..ctx.config().clone()
            },
        );
        paged_ctx.register(crate::user_entity());
        let paged = paged_ctx.repository("user").unwrap();
        let all = paged
            .query("tenantId", "t1", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(&all), ["u1", "u2", "u3", "u5"]);
    }

    #[tokio::test]
    async fn test_should_dump_records_as_json() {
        let (_store, ctx) = memory_context();
        let repo = ctx.repository("user").unwrap();
        seed_users(&repo, USERS).await.unwrap();

        let records = repo
            .find(&Filters::new().eq("tenantId", "t2"), FindOptions::default())
            .await
            .unwrap();
        let dump = records_to_json(&records);
        assert_eq!(dump[0]["id"], "u4");
        assert_eq!(dump[0]["status"], "active");
        assert!(dump[0]["created"].is_i64());
        assert_eq!(records[0].get("status"), Some(&Value::from("active")));
    }
}
