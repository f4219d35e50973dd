use serde_json::json;
use sqlpad_adapters::mysql::{MysqlPools, MysqlQueryEngine, MysqlSchemaProvider};
use sqlpad_core::config::ConnectionProfile;
use sqlpad_core::query_result::{QueryEngine, QueryRequest, QueryResult, ResultKind};
use sqlpad_core::schema::SchemaProvider;

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("SQLPAD_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_profile(id: i64, database: Option<&str>) -> ConnectionProfile {
    let host = std::env::var("SQLPAD_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("SQLPAD_TEST_DB_USER").unwrap_or_else(|_| "root".to_string());
    let port = std::env::var("SQLPAD_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(3306);

    let mut profile = ConnectionProfile::new(id, "adapters-integration", host, user);
    profile.port = port;
    profile.database = database.map(str::to_string);
    profile
}

fn request(sql: &str, page: u32) -> QueryRequest {
    QueryRequest {
        connection_id: 2,
        sql: sql.to_string(),
        page,
        page_size: 2,
        allow_multiple: false,
        confirm_dangerous: false,
    }
}

async fn run(engine: &MysqlQueryEngine, request: QueryRequest) -> QueryResult {
    let result = engine.execute(&request).await.expect("query should run");
    assert!(!result.is_error(), "unexpected error result: {result:?}");
    result
}

#[tokio::test(flavor = "current_thread")]
async fn mysql_engine_pages_writes_and_describes_schema() {
    if !mysql_integration_enabled() {
        return;
    }

    let database = "sqlpad_adapters_cov";
    let pools = MysqlPools::from_profiles(&[
        integration_profile(1, None),
        integration_profile(2, Some(database)),
    ]);
    let engine = MysqlQueryEngine::new(pools.clone(), 10_000);

    let mut create_database = request(&format!("CREATE DATABASE IF NOT EXISTS `{database}`"), 1);
    create_database.connection_id = 1;
    run(&engine, create_database).await;

    let mut reset = request("DROP TABLE IF EXISTS integration_users", 1);
    reset.confirm_dangerous = true;
    run(&engine, reset.clone()).await;
    run(
        &engine,
        request(
            "CREATE TABLE integration_users (\
             id BIGINT NOT NULL PRIMARY KEY,\
             email VARCHAR(64) NOT NULL,\
             age INT NULL\
             )",
            1,
        ),
    )
    .await;

    let insert = run(
        &engine,
        request(
            "INSERT INTO integration_users (id, email, age) VALUES \
             (1, 'a@example.com', 22), (2, 'b@example.com', NULL), (3, 'c@example.com', 41)",
            1,
        ),
    )
    .await;
    assert_eq!(insert.kind, ResultKind::Write);
    assert_eq!(insert.affected_rows, Some(3));

    let second_page = run(
        &engine,
        request("SELECT id, email, age FROM integration_users ORDER BY id", 2),
    )
    .await;
    assert_eq!(second_page.total_rows, Some(3));
    assert_eq!(second_page.total_pages, Some(2));
    assert_eq!(second_page.rows, vec![vec![json!(3), json!("c@example.com"), json!(41)]]);

    let mut batch = request(
        "UPDATE integration_users SET age = 30 WHERE id = 2; SELECT age FROM integration_users WHERE id = 2",
        1,
    );
    batch.allow_multiple = true;
    let batch = run(&engine, batch).await;
    assert_eq!(batch.kind, ResultKind::Multi);
    assert_eq!(batch.affected_rows, Some(1));
    assert_eq!(batch.rows, vec![vec![json!(30)]]);

    let refused = engine
        .execute(&request("DELETE FROM integration_users", 1))
        .await
        .expect("refusal is a result");
    assert!(refused.is_error());

    let missing = engine
        .execute(&request("SELECT * FROM not_a_table", 1))
        .await;
    assert!(missing.is_err());

    let provider = MysqlSchemaProvider::new(pools.clone());
    let schema = provider.get_schema(2).await.expect("schema should load");
    let table = schema
        .table("integration_users")
        .expect("table should be listed");
    let column_names = table
        .columns
        .iter()
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(column_names, vec!["id", "email", "age"]);
    assert!(table.columns[2].nullable);

    run(&engine, reset).await;
    pools.disconnect().await.expect("pools should disconnect");
}
