use sea_orm::{ConnectionTrait, DbConn, DbErr, Schema};
use tracing::{info, instrument};

#[allow(warnings, clippy::all)]
pub(crate) mod url_mapping {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "urls")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(unique)]
        pub short_code: String,
        pub original_url: String,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Creates the `urls` table unless it already exists.
///
/// # Errors
/// Will return [`Err`] if the statement fails to execute.
#[instrument(skip(db))]
pub async fn create_tables_if_absent(db: &DbConn) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());
    let mut create_urls = schema.create_table_from_entity(url_mapping::Entity);
    create_urls.if_not_exists();

    db.execute(&create_urls).await?;
    info!("Ensured urls table exists");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;

    #[tokio::test]
    async fn test_create_tables_if_absent_is_idempotent_ddl() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        create_tables_if_absent(&db).await.unwrap();

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1);
        let logged = format!("{log:?}");
        assert!(logged.contains("CREATE TABLE IF NOT EXISTS"), "{logged}");
        assert!(logged.contains("urls"), "{logged}");
        assert!(logged.contains("UNIQUE"), "{logged}");
    }
}
