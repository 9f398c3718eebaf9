use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use sea_orm::DatabaseConnection;
use sea_orm::DbErr;
use sea_orm::FromQueryResult;
use sea_orm::JsonValue;
use sea_orm::Statement;
use sea_orm::Value;
use tracing::instrument;

use super::QueryCatalog;
use crate::traits::DataSource;
use crate::types::TagSet;

/// Raw SQL over a SeaORM connection.
///
/// Rows come back as JSON objects. Queries the catalog lists as writing something are executed without fetching
/// rows; their result is a single `{"rows_affected": N}` object.
#[derive(Debug, Clone)]
pub struct SeaOrmSource {
    connection: DatabaseConnection,
    catalog:    QueryCatalog,
}

impl SeaOrmSource {
    pub fn new(connection: DatabaseConnection, catalog: QueryCatalog) -> Self {
        Self { connection, catalog }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    fn bind_value(param: &JsonValue) -> Value {
        match param {
            JsonValue::Null => Value::String(None),
            JsonValue::Bool(b) => Value::from(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::from(i)
                }
                else if let Some(u) = n.as_u64() {
                    Value::from(u)
                }
                else {
                    Value::from(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => Value::from(s.clone()),
            other => Value::Json(Some(Box::new(other.clone()))),
        }
    }
}

#[async_trait]
impl DataSource for SeaOrmSource {
    type Error = DbErr;
    type Output = Vec<JsonValue>;
    type Params = Vec<JsonValue>;

    #[instrument(level = "trace", skip(self, params))]
    async fn execute(&self, query: &str, params: &Self::Params) -> Result<Self::Output, Self::Error> {
        let statement = Statement::from_sql_and_values(
            self.connection.get_database_backend(),
            query,
            params.iter().map(Self::bind_value),
        );

        if self.catalog.tables_written(query).is_empty() {
            JsonValue::find_by_statement(statement).all(&self.connection).await
        }
        else {
            let result = self.connection.execute(statement).await?;
            Ok(vec![serde_json::json!({ "rows_affected": result.rows_affected() })])
        }
    }

    fn tables_read(&self, query: &str) -> TagSet {
        self.catalog.tables_read(query)
    }

    fn tables_written(&self, query: &str) -> TagSet {
        self.catalog.tables_written(query)
    }
}
