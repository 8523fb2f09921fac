//! Device linking via short-lived one-time codes.
//!
//! A tutor requests a code; a child device redeems it exactly once before
//! expiry. Redemption provisions the child account, the guardianship link and
//! the device record as a single storage transaction (see
//! [`Store::redeem_link_code`]). This module owns validation, code
//! generation and the error taxonomy; the storage layer owns atomicity.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{Store, StorageError};

/// Fixed width of a link code, uppercase hex.
pub const CODE_LEN: usize = 6;
/// Codes expire exactly this long after generation.
pub const CODE_TTL_MINUTES: i64 = 10;
/// How often the generator retries after a code collision before giving up.
const GENERATE_MAX_ATTEMPTS: u32 = 5;

pub const ROLE_TUTOR: &str = "tutor";
pub const ROLE_CHILD: &str = "child";

/// Time source, injected so tests can control expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of link codes and child email tokens, injected for the same
/// reason as [`Clock`]: collision and rollback paths need fixed values.
pub trait RandomSource: Send + Sync {
    /// A fresh candidate link code: [`CODE_LEN`] uppercase hex characters.
    fn link_code(&self) -> String;
    /// Token embedded in a synthesized child email address.
    fn email_token(&self) -> String;
}

/// CSPRNG-backed production implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn link_code(&self) -> String {
        let mut buf = [0u8; CODE_LEN / 2];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        hex::encode_upper(buf)
    }

    fn email_token(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("only tutors can generate link codes")]
    NotAuthorized,

    #[error("unknown link code")]
    NotFound,

    #[error("link code was already used; ask the tutor for a new one")]
    AlreadyUsed,

    #[error("link code has expired; ask the tutor for a new one")]
    Expired,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("could not allocate a unique link code, retry budget exhausted")]
    ResourceExhausted,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LinkError {
    /// Stable machine-readable kind, exposed in error response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkError::InvalidArgument(_) => "invalid_argument",
            LinkError::NotAuthorized => "not_authorized",
            LinkError::NotFound => "not_found",
            LinkError::AlreadyUsed => "already_used",
            LinkError::Expired => "expired",
            LinkError::Conflict(_) => "conflict",
            LinkError::ResourceExhausted => "resource_exhausted",
            LinkError::Storage(_) => "internal",
        }
    }
}

// Lets storage transaction closures use `?` on Diesel errors while still
// distinguishing uniqueness violations from other database failures.
impl From<diesel::result::Error> for LinkError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => LinkError::Conflict(info.message().to_string()),
            other => LinkError::Storage(StorageError::Database(other)),
        }
    }
}

/// Client-supplied metadata of the device being linked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub uuid: String,
    pub name: String,
    pub model: String,
    pub os_version: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedeemedLink {
    pub tutor_id: i32,
    pub child_id: i32,
}

#[derive(Clone)]
pub struct LinkService {
    store: Store,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl LinkService {
    pub fn new(store: Store) -> Self {
        Self::with_parts(store, Arc::new(SystemClock), Arc::new(OsRandom))
    }

    pub fn with_parts(
        store: Store,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            store,
            clock,
            random,
        }
    }

    /// Issue a fresh one-time code bound to `tutor_id`, valid for
    /// [`CODE_TTL_MINUTES`] from now.
    pub async fn generate(&self, tutor_id: i32) -> Result<GeneratedCode, LinkError> {
        match self.store.find_user_by_id(tutor_id).await? {
            Some(user) if user.role == ROLE_TUTOR => {}
            _ => {
                warn!(tutor_id, "generate: requester is not a tutor");
                return Err(LinkError::NotAuthorized);
            }
        }

        for attempt in 1..=GENERATE_MAX_ATTEMPTS {
            let code = self.random.link_code();
            let now = self.clock.now();
            let expires_at = now + Duration::minutes(CODE_TTL_MINUTES);
            match self
                .store
                .create_link_code(&code, tutor_id, now.naive_utc(), expires_at.naive_utc())
                .await
            {
                Ok(link) => {
                    debug!(tutor_id, attempt, "generate: link code issued");
                    return Ok(GeneratedCode {
                        code: link.code,
                        expires_at,
                    });
                }
                Err(LinkError::Conflict(_)) => {
                    warn!(tutor_id, attempt, "generate: code collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(LinkError::ResourceExhausted)
    }

    /// Redeem a code: validate shape, then hand the whole provisioning step
    /// to the storage transaction. Validation failures never touch storage.
    pub async fn redeem(
        &self,
        code: &str,
        device: DeviceInfo,
    ) -> Result<RedeemedLink, LinkError> {
        if code.len() != CODE_LEN {
            return Err(LinkError::InvalidArgument(format!(
                "code must be exactly {CODE_LEN} characters"
            )));
        }
        for (field, value) in [
            ("uuid", &device.uuid),
            ("name", &device.name),
            ("model", &device.model),
            ("os_version", &device.os_version),
        ] {
            if value.trim().is_empty() {
                return Err(LinkError::InvalidArgument(format!(
                    "device_info.{field} must not be empty"
                )));
            }
        }

        let email = format!("child-{}@tutelink.local", self.random.email_token());
        let now = self.clock.now().naive_utc();
        let redeemed = self.store.redeem_link_code(code, device, email, now).await;
        match &redeemed {
            Ok(r) => debug!(
                tutor_id = r.tutor_id,
                child_id = r.child_id,
                "redeem: code consumed, child and device provisioned"
            ),
            Err(e) => warn!(code, kind = e.kind(), "redeem: rejected"),
        }
        redeemed
    }
}
