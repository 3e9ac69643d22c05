mod catalog;
pub mod ledger;
pub mod models;
mod progress;
mod redemption;
pub mod schema;

pub use catalog::{HabitDraft, RewardDraft};
pub use progress::{CompletionOutcome, HabitState};
pub use redemption::RedemptionWithReward;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use habitquest_shared::domain::{DomainError, validate_child_age};
use habitquest_shared::rules::RuleViolation;
use models::{Child, NewChild, NewProfile, NewSession, Profile};
use tracing::{debug, trace, warn};

use crate::server::ParentConfig;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Input or stored value violates a domain constraint.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The habit or reward rules refuse the operation; nothing was written.
    #[error(transparent)]
    Rule(#[from] RuleViolation),
}

impl StorageError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Runs blocking diesel work on the blocking pool with a configured connection.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut conn)
        })
        .await?
    }

    /// Upserts configured parents by email. Existing profiles keep their id, PIN and
    /// any timezone changed at runtime.
    pub async fn seed_parents(
        &self,
        parents: &[ParentConfig],
        default_timezone: &str,
    ) -> Result<(), StorageError> {
        use schema::profiles;

        let parents_owned = parents.to_owned();
        let default_tz = default_timezone.to_string();
        self.with_conn(move |conn| {
            for p in &parents_owned {
                let id = uuid::Uuid::new_v4().to_string();
                let tz = p.timezone.as_deref().unwrap_or(&default_tz);
                let new_profile = NewProfile {
                    id: &id,
                    email: &p.email,
                    name: &p.name,
                    timezone: tz,
                };
                diesel::insert_into(profiles::table)
                    .values(&new_profile)
                    .on_conflict(profiles::email)
                    .do_update()
                    .set(profiles::name.eq(new_profile.name))
                    .execute(conn)?;
                debug!(email = %p.email, "seeded parent profile");
            }
            Ok(())
        })
        .await
    }

    pub async fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>, StorageError> {
        use schema::profiles::dsl::*;
        let pid = profile_id.to_string();
        self.with_conn(move |conn| {
            Ok(profiles
                .filter(id.eq(&pid))
                .select(Profile::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn get_profile_by_email(
        &self,
        email_: &str,
    ) -> Result<Option<Profile>, StorageError> {
        use schema::profiles::dsl::*;
        let e = email_.to_string();
        self.with_conn(move |conn| {
            Ok(profiles
                .filter(email.eq(&e))
                .select(Profile::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn set_pin_hash(&self, profile_id: &str, hash: &str) -> Result<(), StorageError> {
        use schema::profiles::dsl::*;
        let pid = profile_id.to_string();
        let h = hash.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(profiles.filter(id.eq(&pid)))
                .set(pin_hash.eq(Some(&h)))
                .execute(conn)?;
            if updated == 0 {
                return Err(StorageError::not_found("profile", &pid));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_timezone(&self, profile_id: &str, tz_name: &str) -> Result<(), StorageError> {
        use schema::profiles::dsl::*;
        if tz_name.parse::<Tz>().is_err() {
            return Err(StorageError::InvalidInput(format!(
                "unknown timezone: {tz_name}"
            )));
        }
        let pid = profile_id.to_string();
        let tz = tz_name.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(profiles.filter(id.eq(&pid)))
                .set(timezone.eq(&tz))
                .execute(conn)?;
            if updated == 0 {
                return Err(StorageError::not_found("profile", &pid));
            }
            Ok(())
        })
        .await
    }

    pub async fn list_children(&self, parent: &str) -> Result<Vec<Child>, StorageError> {
        use schema::children::dsl::*;
        let parent_owned = parent.to_string();
        self.with_conn(move |conn| {
            Ok(children
                .filter(parent_id.eq(&parent_owned))
                .order((created_at.asc(), name.asc()))
                .select(Child::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn get_child(&self, child: &str) -> Result<Option<Child>, StorageError> {
        let child_owned = child.to_string();
        self.with_conn(move |conn| find_child(conn, &child_owned)).await
    }

    pub async fn child_belongs_to(&self, child: &str, parent: &str) -> Result<bool, StorageError> {
        use schema::children::dsl::*;
        let child_owned = child.to_string();
        let parent_owned = parent.to_string();
        self.with_conn(move |conn| {
            let count: i64 = children
                .filter(id.eq(&child_owned))
                .filter(parent_id.eq(&parent_owned))
                .count()
                .get_result(conn)?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn create_child(
        &self,
        parent: &str,
        child_name: &str,
        child_age: i32,
        avatar: Option<&str>,
    ) -> Result<Child, StorageError> {
        use schema::children;
        validate_child_age(child_age)?;
        let name_owned = non_empty("name", child_name)?;
        let parent_owned = parent.to_string();
        let avatar_owned = avatar.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let new_id = uuid::Uuid::new_v4().to_string();
            let row = NewChild {
                id: &new_id,
                parent_id: &parent_owned,
                name: &name_owned,
                age: child_age,
                avatar_url: avatar_owned.as_deref(),
            };
            Ok(diesel::insert_into(children::table)
                .values(&row)
                .returning(Child::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    /// Edits profile fields only; balance and streak are owned by the ledger.
    pub async fn update_child(
        &self,
        child: &str,
        child_name: &str,
        child_age: i32,
        avatar: Option<&str>,
    ) -> Result<Child, StorageError> {
        use schema::children::dsl::*;
        validate_child_age(child_age)?;
        let name_owned = non_empty("name", child_name)?;
        let child_owned = child.to_string();
        let avatar_owned = avatar.map(|s| s.to_string());
        self.with_conn(move |conn| {
            diesel::update(children.filter(id.eq(&child_owned)))
                .set((
                    name.eq(&name_owned),
                    age.eq(child_age),
                    avatar_url.eq(avatar_owned.as_deref()),
                ))
                .returning(Child::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(|| StorageError::not_found("child", &child_owned))
        })
        .await
    }

    pub async fn delete_child(&self, child: &str) -> Result<bool, StorageError> {
        use schema::children::dsl::*;
        let child_owned = child.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(children.filter(id.eq(&child_owned))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Session helpers for JWT inactivity windows
    pub async fn create_session(&self, jti_: &str, profile: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let j = jti_.to_string();
        let p = profile.to_string();
        self.with_conn(move |conn| {
            let new = NewSession {
                jti: &j,
                profile_id: &p,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(conn)?;
            trace!(jti = %j, updated, "touch_session_with_cutoff");
            Ok(updated > 0)
        })
        .await
    }
}

pub(crate) fn find_child(
    conn: &mut SqliteConnection,
    child: &str,
) -> Result<Option<Child>, StorageError> {
    use schema::children::dsl::*;
    Ok(children
        .filter(id.eq(child))
        .select(Child::as_select())
        .first(conn)
        .optional()?)
}

pub(crate) fn require_child(conn: &mut SqliteConnection, child: &str) -> Result<Child, StorageError> {
    find_child(conn, child)?.ok_or_else(|| StorageError::not_found("child", child))
}

/// Calendar day of `now` in the owning parent's timezone.
pub(crate) fn local_today(
    conn: &mut SqliteConnection,
    child: &Child,
    now: DateTime<Utc>,
) -> Result<NaiveDate, StorageError> {
    use schema::profiles::dsl::*;
    let tz_name: String = profiles
        .filter(id.eq(&child.parent_id))
        .select(timezone)
        .first(conn)?;
    let tz = tz_name.parse::<Tz>().unwrap_or_else(|_| {
        warn!(parent_id = %child.parent_id, timezone = %tz_name, "unknown timezone, using UTC");
        Tz::UTC
    });
    Ok(now.with_timezone(&tz).date_naive())
}

pub(crate) fn non_empty(field: &'static str, value: &str) -> Result<String, StorageError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}
