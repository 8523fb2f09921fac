pub mod models;
pub mod schema;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{Device, LinkCode, NewDevice, NewLinkCode, NewTutorChildLink, NewUser, User};
use tracing::trace;

use crate::linkcode::{DeviceInfo, LinkError, ROLE_CHILD, ROLE_TUTOR, RedeemedLink};

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
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
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

    /// Upsert a tutor account, keyed by email. Used for config seeding at
    /// startup and by tests.
    pub async fn upsert_tutor(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StorageError> {
        use schema::users;
        let pool = self.pool.clone();
        let name_owned = name.to_string();
        let email_owned = email.to_string();
        let hash_owned = password_hash.to_string();
        tokio::task::spawn_blocking(move || -> Result<User, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = chrono::Utc::now().naive_utc();
            let new_user = NewUser {
                name: &name_owned,
                email: &email_owned,
                role: ROLE_TUTOR,
                password_hash: &hash_owned,
                created_at: now,
            };
            diesel::insert_into(users::table)
                .values(&new_user)
                .on_conflict(users::email)
                .do_update()
                .set((
                    users::name.eq(&name_owned),
                    users::role.eq(ROLE_TUTOR),
                    users::password_hash.eq(&hash_owned),
                ))
                .execute(&mut conn)?;
            Ok(users::table
                .filter(users::email.eq(&email_owned))
                .first::<User>(&mut conn)?)
        })
        .await?
    }

    pub async fn find_user_by_id(&self, user_id: i32) -> Result<Option<User>, StorageError> {
        use schema::users::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<User>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(users
                .filter(id.eq(user_id))
                .first::<User>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Insert a fresh link code. The unique index on `code` is the collision
    /// authority; a duplicate surfaces as [`LinkError::Conflict`] so the
    /// generator can retry with a new value.
    pub async fn create_link_code(
        &self,
        code: &str,
        tutor_id: i32,
        created_at: chrono::NaiveDateTime,
        expires_at: chrono::NaiveDateTime,
    ) -> Result<LinkCode, LinkError> {
        use schema::link_codes;
        let pool = self.pool.clone();
        let code_owned = code.to_string();
        tokio::task::spawn_blocking(move || -> Result<LinkCode, LinkError> {
            let mut conn = pool.get().map_err(StorageError::from)?;
            configure_sqlite_conn(&mut conn).map_err(StorageError::from)?;
            let new_code = NewLinkCode {
                code: &code_owned,
                tutor_id,
                created_at,
                expires_at,
            };
            Ok(diesel::insert_into(link_codes::table)
                .values(&new_code)
                .returning(LinkCode::as_returning())
                .get_result::<LinkCode>(&mut conn)?)
        })
        .await
        .map_err(StorageError::from)?
    }

    /// Look up a code together with the owning tutor's display name.
    /// Read-only; redemption re-validates inside its own transaction.
    pub async fn find_link_code(
        &self,
        code: &str,
    ) -> Result<Option<(LinkCode, String)>, StorageError> {
        use schema::{link_codes, users};
        let pool = self.pool.clone();
        let code_owned = code.to_string();
        tokio::task::spawn_blocking(
            move || -> Result<Option<(LinkCode, String)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                Ok(link_codes::table
                    .inner_join(users::table)
                    .filter(link_codes::code.eq(&code_owned))
                    .select((LinkCode::as_select(), users::name))
                    .first::<(LinkCode, String)>(&mut conn)
                    .optional()?)
            },
        )
        .await?
    }

    /// Consume a link code: provision the child account, the guardianship
    /// link and the device row, then flip `used` — all inside one immediate
    /// transaction so a failure in any step leaves no orphan rows and the
    /// code stays redeemable.
    ///
    /// The final conditional update (`... WHERE id = ? AND used = 0`) is the
    /// per-code compare-and-set: of two concurrent redemptions exactly one
    /// sees a row updated, the other gets [`LinkError::AlreadyUsed`].
    pub async fn redeem_link_code(
        &self,
        code: &str,
        device: DeviceInfo,
        child_email: String,
        now: chrono::NaiveDateTime,
    ) -> Result<RedeemedLink, LinkError> {
        use schema::{devices, link_codes, tutor_child_links, users};
        let pool = self.pool.clone();
        let code_owned = code.to_string();
        trace!(code = %code_owned, device_uuid = %device.uuid, "redeem_link_code starting");
        tokio::task::spawn_blocking(move || -> Result<RedeemedLink, LinkError> {
            let mut conn = pool.get().map_err(StorageError::from)?;
            configure_sqlite_conn(&mut conn).map_err(StorageError::from)?;
            conn.immediate_transaction(|conn| -> Result<RedeemedLink, LinkError> {
                let row: Option<(LinkCode, String)> = link_codes::table
                    .inner_join(users::table)
                    .filter(link_codes::code.eq(&code_owned))
                    .select((LinkCode::as_select(), users::name))
                    .first::<(LinkCode, String)>(conn)
                    .optional()?;
                let Some((link, tutor_name)) = row else {
                    return Err(LinkError::NotFound);
                };
                if link.used {
                    return Err(LinkError::AlreadyUsed);
                }
                if link.expires_at < now {
                    return Err(LinkError::Expired);
                }

                // Child account, named after the tutor. The unique index on
                // users.email aborts the whole transaction on a collision.
                let child_name = format!("child of {tutor_name}");
                let new_child = NewUser {
                    name: &child_name,
                    email: &child_email,
                    role: ROLE_CHILD,
                    password_hash: "",
                    created_at: now,
                };
                let child_id: i32 = diesel::insert_into(users::table)
                    .values(&new_child)
                    .returning(users::id)
                    .get_result(conn)?;

                diesel::insert_into(tutor_child_links::table)
                    .values(&NewTutorChildLink {
                        tutor_id: link.tutor_id,
                        child_id,
                        created_at: now,
                    })
                    .execute(conn)?;

                diesel::insert_into(devices::table)
                    .values(&NewDevice {
                        uuid: &device.uuid,
                        name: &device.name,
                        model: &device.model,
                        os_version: &device.os_version,
                        last_sync: now,
                        user_id: child_id,
                    })
                    .execute(conn)?;

                let updated = diesel::update(
                    link_codes::table
                        .filter(link_codes::id.eq(link.id))
                        .filter(link_codes::used.eq(false)),
                )
                .set((
                    link_codes::used.eq(true),
                    link_codes::child_id.eq(child_id),
                ))
                .execute(conn)?;
                if updated == 0 {
                    // Lost the race to a concurrent redemption.
                    return Err(LinkError::AlreadyUsed);
                }

                Ok(RedeemedLink {
                    tutor_id: link.tutor_id,
                    child_id,
                })
            })
        })
        .await
        .map_err(StorageError::from)?
    }

    /// Children linked to a tutor through redeemed codes, oldest link first.
    pub async fn list_children_of_tutor(&self, tutor: i32) -> Result<Vec<User>, StorageError> {
        use schema::{tutor_child_links as tcl, users};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<User>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(tcl::table
                .inner_join(users::table.on(users::id.eq(tcl::child_id)))
                .filter(tcl::tutor_id.eq(tutor))
                .order(tcl::created_at.asc())
                .select(User::as_select())
                .load::<User>(&mut conn)?)
        })
        .await?
    }

    pub async fn list_devices_for_user(&self, user: i32) -> Result<Vec<Device>, StorageError> {
        use schema::devices::dsl as d;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Device>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(d::devices
                .filter(d::user_id.eq(user))
                .order(d::last_sync.desc())
                .load::<Device>(&mut conn)?)
        })
        .await?
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
