//! Transaction buffer integration tests.

#[cfg(test)]
mod tests {
    use dynarecord_core::{Dispatch, RecordConfig, RecordError, SaveOutcome};
    use dynarecord_model::types::CancellationReason;
    use dynarecord_model::{DynamoDBError, DynamoDBErrorCode, DynamoDBOperation};

    use crate::{memory_context, scripted_context, user_item};

    #[tokio::test]
    async fn test_should_defer_writes_until_commit() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        store.push_item(Some(user_item("u1", "t1")));
        let mut existing = repo.get_by_id("u1").await.unwrap().unwrap();

        ctx.use_transaction();
        let mut created = repo.new_record_with_id("u2");
        created.set("tenantId", "t1").unwrap();
        assert_eq!(
            created.save().await.unwrap(),
            SaveOutcome::Created(Dispatch::Enqueued)
        );
        existing.set("status", "active").unwrap();
        assert!(matches!(
            existing.save().await.unwrap(),
            SaveOutcome::Updated {
                dispatch: Dispatch::Enqueued,
                ..
            }
        ));
        assert!(!created.is_new());
        assert_eq!(ctx.pending_operations(), 2);
        assert_eq!(store.write_count(), 0);

        ctx.commit().await.unwrap();
        assert!(!ctx.in_transaction());
        assert_eq!(ctx.pending_operations(), 0);

        let commits = store.requests_of(DynamoDBOperation::TransactWriteItems);
        assert_eq!(commits.len(), 1);
        assert_eq!(store.write_count(), 1);
        let items = commits[0]["TransactItems"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0]["Put"]["ConditionExpression"],
            "attribute_not_exists(id)"
        );
        assert_eq!(
            items[1]["Update"]["UpdateExpression"],
            "SET #status = :status, #modified = :modified"
        );
        let token = commits[0]["ClientRequestToken"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(token).is_ok());
    }

    #[tokio::test]
    async fn test_should_reset_buffer_when_commit_fails() {
        let (store, ctx) = scripted_context(RecordConfig::default());
        let repo = ctx.repository("user").unwrap();
        ctx.use_transaction();
        let mut user = repo.new_record_with_id("u1");
        user.save().await.unwrap();

        store.fail_next(DynamoDBError::transaction_canceled(vec![
            CancellationReason {
                code: Some("ConditionalCheckFailed".to_owned()),
                message: None,
            },
        ]));
        let err = ctx.commit().await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            err.store_code(),
            Some(DynamoDBErrorCode::TransactionCanceledException)
        );
        assert!(!ctx.in_transaction());
        assert_eq!(ctx.pending_operations(), 0);

        let mut later = repo.new_record_with_id("u2");
        assert_eq!(
            later.save().await.unwrap(),
            SaveOutcome::Created(Dispatch::Executed)
        );
    }

    #[tokio::test]
    async fn test_should_drop_buffer_on_discard() {
        let (store, ctx) = memory_context();
        let repo = ctx.repository("user").unwrap();
        ctx.use_transaction();
        let mut user = repo.new_record_with_id("u1");
        user.save().await.unwrap();
        assert_eq!(ctx.discard_transaction(), 1);

        assert_eq!(store.item_count(repo.table_name()), 0);
        assert!(matches!(
            ctx.commit().await.unwrap_err(),
            RecordError::NoActiveTransaction
        ));
    }

    #[tokio::test]
    async fn test_should_apply_transaction_atomically() {
        let (store, ctx) = memory_context();
        let repo = ctx.repository("user").unwrap();
        let mut seeded = repo.new_record_with_id("u1");
        seeded.set("tenantId", "t1").unwrap();
        seeded.save().await.unwrap();

        ctx.use_transaction();
        for id in ["u2", "u3"] {
            let mut user = repo.new_record_with_id(id);
            user.set("tenantId", "t1").unwrap();
            user.save().await.unwrap();
        }
        seeded.delete().await.unwrap();
        ctx.commit().await.unwrap();

        assert_eq!(store.item_count(repo.table_name()), 2);
        assert!(repo.get_by_id("u1").await.unwrap().is_none());
        assert!(repo.get_by_id("u3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_should_cancel_whole_transaction_on_conflict() {
        let (store, ctx) = memory_context();
        let repo = ctx.repository("user").unwrap();
        let mut seeded = repo.new_record_with_id("u1");
        seeded.save().await.unwrap();

        ctx.use_transaction();
        let mut fresh = repo.new_record_with_id("u2");
        fresh.save().await.unwrap();
        let mut duplicate = repo.new_record_with_id("u1");
        duplicate.save().await.unwrap();

        let err = ctx.commit().await.unwrap_err();
        assert!(err.is_conflict(), "{err}");
        match err {
            RecordError::Store(e) => {
                assert_eq!(e.cancellation_reasons.len(), 2);
                assert!(e.cancellation_reasons[0].code.is_none());
                assert_eq!(
                    e.cancellation_reasons[1].code.as_deref(),
                    Some("ConditionalCheckFailed")
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.item_count(repo.table_name()), 1);
        assert!(repo.get_by_id("u2").await.unwrap().is_none());
    }
}
