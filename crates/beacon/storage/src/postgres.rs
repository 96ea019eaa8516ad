//! PostgreSQL engine for the wide-column session.
//!
//! Each table keeps its partition key (`user_id`) as the leading primary-key
//! column so listing reads stay partition-local. Conditional statements map to
//! `ON CONFLICT DO NOTHING` and guarded `UPDATE`s, with the affected-row count
//! deciding whether the condition held. A batch runs as one transaction.

use crate::session::Session;
use crate::statement::{Batch, SetOp, Statement};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use beacon_types::{
    Beacon, BeaconKey, BeaconName, DeploymentMetadata, Message, Provider, User, UserId, UserLookup,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

/// PostgreSQL-backed session.
#[derive(Clone)]
pub struct PostgresSession {
    pool: PgPool,
}

impl PostgresSession {
    /// Connect and create the schema if needed.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let session = Self { pool };
        session.init_schema().await?;
        Ok(session)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL,
                given_name TEXT NOT NULL DEFAULT '',
                family_name TEXT NOT NULL DEFAULT '',
                public_picture_url TEXT NOT NULL DEFAULT '',
                provider SMALLINT,
                created_at TIMESTAMPTZ
            )
            "#,
            "CREATE INDEX IF NOT EXISTS users_by_email ON users (email)",
            r#"
            CREATE TABLE IF NOT EXISTS beacons (
                user_id UUID NOT NULL,
                name BYTEA NOT NULL,
                deploy_name TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (user_id, name)
            )
            "#,
            // Serves the (user_id, deploy_name) beacon index.
            "CREATE INDEX IF NOT EXISTS beacon_deployments ON beacons (user_id, deploy_name, name)",
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                user_id UUID NOT NULL,
                name TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                lang TEXT NOT NULL DEFAULT 'en',
                deployments TEXT[] NOT NULL DEFAULT '{}',
                PRIMARY KEY (user_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS deployments_metadata (
                user_id UUID NOT NULL,
                name TEXT NOT NULL,
                message_name TEXT NOT NULL,
                PRIMARY KEY (user_id, name)
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

/// Run one statement on a connection, enforcing its condition.
async fn apply(conn: &mut PgConnection, statement: &Statement) -> StorageResult<()> {
    match statement {
        Statement::UpsertUser(user) => {
            sqlx::query(
                r#"
                INSERT INTO users
                    (id, email, given_name, family_name, public_picture_url, provider, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    email = EXCLUDED.email,
                    given_name = EXCLUDED.given_name,
                    family_name = EXCLUDED.family_name,
                    public_picture_url = EXCLUDED.public_picture_url,
                    provider = EXCLUDED.provider,
                    created_at = EXCLUDED.created_at
                "#,
            )
            .bind(*user.id.as_uuid())
            .bind(&user.email)
            .bind(&user.given_name)
            .bind(&user.family_name)
            .bind(&user.public_picture_url)
            .bind(user.provider.map(|p| i16::from(p.id())))
            .bind(user.created_at)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        }
        Statement::InsertBeacon(beacon) => {
            let result = sqlx::query(
                r#"
                INSERT INTO beacons (user_id, name, deploy_name)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, name) DO NOTHING
                "#,
            )
            .bind(*beacon.user_id.as_uuid())
            .bind(beacon.name.as_bytes())
            .bind(&beacon.deploy_name)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
            if result.rows_affected() == 0 {
                return Err(StorageError::ConditionNotMet(format!(
                    "beacon {}/{} already exists",
                    beacon.user_id, beacon.name
                )));
            }
        }
        Statement::UpdateBeaconDeployment { key, deploy_name } => {
            let result = sqlx::query(
                "UPDATE beacons SET deploy_name = $3 WHERE user_id = $1 AND name = $2",
            )
            .bind(*key.user_id.as_uuid())
            .bind(key.name.as_bytes())
            .bind(deploy_name)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
            if result.rows_affected() == 0 {
                return Err(StorageError::ConditionNotMet(format!(
                    "beacon {}/{} does not exist",
                    key.user_id, key.name
                )));
            }
        }
        Statement::InsertMessage { user_id, message } => {
            let result = sqlx::query(
                r#"
                INSERT INTO messages (user_id, name, title, url, lang, deployments)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, name) DO NOTHING
                "#,
            )
            .bind(*user_id.as_uuid())
            .bind(&message.name)
            .bind(&message.title)
            .bind(&message.url)
            .bind(&message.lang)
            .bind(message.deployments.iter().cloned().collect::<Vec<_>>())
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
            if result.rows_affected() == 0 {
                return Err(StorageError::ConditionNotMet(format!(
                    "message {user_id}/{} already exists",
                    message.name
                )));
            }
        }
        Statement::UpdateMessageDeployments {
            user_id,
            name,
            op,
            changes,
        } => {
            let sql = match op {
                SetOp::Add => {
                    r#"
                    UPDATE messages
                       SET deployments = ARRAY(
                            SELECT DISTINCT d FROM unnest(deployments || $3::TEXT[]) AS d ORDER BY d
                       )
                     WHERE user_id = $1 AND name = $2
                    "#
                }
                SetOp::Remove => {
                    r#"
                    UPDATE messages
                       SET deployments = ARRAY(
                            SELECT d FROM unnest(deployments) AS d WHERE d <> ALL($3::TEXT[]) ORDER BY d
                       )
                     WHERE user_id = $1 AND name = $2
                    "#
                }
            };
            let result = sqlx::query(sql)
                .bind(*user_id.as_uuid())
                .bind(name)
                .bind(changes.iter().cloned().collect::<Vec<_>>())
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            if result.rows_affected() == 0 {
                return Err(StorageError::ConditionNotMet(format!(
                    "message {user_id}/{name} does not exist"
                )));
            }
        }
        Statement::UpsertDeploymentMetadata(metadata) => {
            sqlx::query(
                r#"
                INSERT INTO deployments_metadata (user_id, name, message_name)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, name) DO UPDATE SET message_name = EXCLUDED.message_name
                "#,
            )
            .bind(*metadata.user_id.as_uuid())
            .bind(&metadata.deploy_name)
            .bind(&metadata.message_name)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Session for PostgresSession {
    async fn execute(&self, statement: Statement) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        apply(&mut conn, &statement).await
    }

    async fn execute_batch(&self, batch: Batch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for statement in batch.statements() {
            // Dropping the transaction on error rolls it back.
            apply(&mut tx, statement).await?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn get_user(&self, lookup: &UserLookup) -> StorageResult<Option<User>> {
        let query = match lookup {
            UserLookup::Id(id) => sqlx::query("SELECT * FROM users WHERE id = $1").bind(*id.as_uuid()),
            UserLookup::Email(email) => {
                sqlx::query("SELECT * FROM users WHERE email = $1 LIMIT 1").bind(email.clone())
            }
        };
        let row = query.fetch_optional(&self.pool).await.map_err(backend)?;
        row.map(user_from_row).transpose()
    }

    async fn get_beacon(&self, key: &BeaconKey) -> StorageResult<Option<Beacon>> {
        let row = sqlx::query("SELECT * FROM beacons WHERE user_id = $1 AND name = $2")
            .bind(*key.user_id.as_uuid())
            .bind(key.name.as_bytes())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(beacon_from_row).transpose()
    }

    async fn list_user_beacons(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<Beacon>> {
        let rows = sqlx::query("SELECT * FROM beacons WHERE user_id = $1 ORDER BY name LIMIT $2")
            .bind(*user_id.as_uuid())
            .bind(to_i64(limit)?)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(beacon_from_row).collect()
    }

    async fn get_message(&self, user_id: &UserId, name: &str) -> StorageResult<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE user_id = $1 AND name = $2")
            .bind(*user_id.as_uuid())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(message_from_row).transpose()
    }

    async fn list_messages(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE user_id = $1 ORDER BY name LIMIT $2")
            .bind(*user_id.as_uuid())
            .bind(to_i64(limit)?)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn get_deployment_metadata(
        &self,
        user_id: &UserId,
        deploy_name: &str,
    ) -> StorageResult<Option<DeploymentMetadata>> {
        let row = sqlx::query("SELECT * FROM deployments_metadata WHERE user_id = $1 AND name = $2")
            .bind(*user_id.as_uuid())
            .bind(deploy_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(metadata_from_row).transpose()
    }

    async fn list_deployments_metadata(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> StorageResult<Vec<DeploymentMetadata>> {
        let rows = sqlx::query(
            "SELECT * FROM deployments_metadata WHERE user_id = $1 ORDER BY name LIMIT $2",
        )
        .bind(*user_id.as_uuid())
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(metadata_from_row).collect()
    }

    async fn list_deployment_beacons(
        &self,
        user_id: &UserId,
        deploy_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<Beacon>> {
        if deploy_name.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT * FROM beacons WHERE user_id = $1 AND deploy_name = $2 ORDER BY name LIMIT $3",
        )
        .bind(*user_id.as_uuid())
        .bind(deploy_name)
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(beacon_from_row).collect()
    }
}

fn user_from_row(row: PgRow) -> StorageResult<User> {
    let provider: Option<i16> = row.try_get("provider").map_err(backend)?;
    let created_at: Option<DateTime<Utc>> = row.try_get("created_at").map_err(backend)?;
    Ok(User {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id").map_err(backend)?),
        email: row.try_get("email").map_err(backend)?,
        given_name: row.try_get("given_name").map_err(backend)?,
        family_name: row.try_get("family_name").map_err(backend)?,
        public_picture_url: row.try_get("public_picture_url").map_err(backend)?,
        provider: provider
            .and_then(|id| u8::try_from(id).ok())
            .and_then(Provider::from_id),
        created_at,
    })
}

fn beacon_from_row(row: PgRow) -> StorageResult<Beacon> {
    Ok(Beacon {
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(backend)?),
        deploy_name: row.try_get("deploy_name").map_err(backend)?,
        name: BeaconName::new(row.try_get::<Vec<u8>, _>("name").map_err(backend)?),
    })
}

fn message_from_row(row: PgRow) -> StorageResult<Message> {
    let deployments: Vec<String> = row.try_get("deployments").map_err(backend)?;
    Ok(Message {
        user_id: Some(UserId::from_uuid(
            row.try_get::<Uuid, _>("user_id").map_err(backend)?,
        )),
        name: row.try_get("name").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        url: row.try_get("url").map_err(backend)?,
        lang: row.try_get("lang").map_err(backend)?,
        deployments: deployments.into_iter().collect(),
    })
}

fn metadata_from_row(row: PgRow) -> StorageResult<DeploymentMetadata> {
    Ok(DeploymentMetadata {
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(backend)?),
        deploy_name: row.try_get("name").map_err(backend)?,
        message_name: row.try_get("message_name").map_err(backend)?,
    })
}

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::InvalidInput("limit too large".to_string()))
}
