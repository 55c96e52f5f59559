//! Invite and shared-trip token minting.
//!
//! Tokens are 32 bytes of CSPRNG output, base64url-encoded without padding.
//! Expired, revoked, or nonexistent tokens must all look identical to a
//! caller — the HTTP surface that would enforce the opaque-404 contract is
//! out of scope here, but every lookup below already collapses those three
//! cases into a single `None`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;

pub const INVITE_TOKEN_TTL_DAYS: i64 = 7;
pub const SHARED_TRIP_TOKEN_TTL_DAYS: i64 = 90;

pub const ROLE_MEMBER: &str = "member";
pub const ROLE_VIEWER: &str = "viewer";

/// Generate a URL-safe, unpadded, 32-byte CSPRNG token (43 chars).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteToken {
    pub id: String,
    pub token: String,
    pub trip_id: String,
    pub created_by: String,
    pub role: String,
    pub max_uses: i32,
    pub used_count: i32,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InviteToken {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now && self.used_count < self.max_uses
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let expires_at: String = row.get("expires_at")?;
        let revoked_at: Option<String> = row.get("revoked_at")?;
        let created_at: String = row.get("created_at")?;
        Ok(Self {
            id: row.get("id")?,
            token: row.get("token")?,
            trip_id: row.get("trip_id")?,
            created_by: row.get("created_by")?,
            role: row.get("role")?,
            max_uses: row.get("max_uses")?,
            used_count: row.get("used_count")?,
            expires_at: DateTime::parse_from_rfc3339(&expires_at)
                .unwrap()
                .with_timezone(&Utc),
            revoked_at: revoked_at.map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)),
            created_at: DateTime::parse_from_rfc3339(&created_at).unwrap().with_timezone(&Utc),
        })
    }
}

fn mint(db: &Db, trip_id: &str, created_by: &str, role: &str, max_uses: i32, ttl_days: i64) -> anyhow::Result<InviteToken> {
    let now = Utc::now();
    let token = InviteToken {
        id: Uuid::new_v4().to_string(),
        token: generate_token(),
        trip_id: trip_id.to_string(),
        created_by: created_by.to_string(),
        role: role.to_string(),
        max_uses,
        used_count: 0,
        expires_at: now + Duration::days(ttl_days),
        revoked_at: None,
        created_at: now,
    };

    db.with_conn_mut(|conn| {
        conn.execute(
            r#"INSERT INTO invite_tokens (
                   id, token, trip_id, created_by, role, max_uses, used_count,
                   expires_at, revoked_at, created_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                token.id,
                token.token,
                token.trip_id,
                token.created_by,
                token.role,
                token.max_uses,
                token.used_count,
                token.expires_at.to_rfc3339(),
                None::<String>,
                token.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })?;

    tracing::info!(trip_id, created_by, role, token_id = %token.id, "minted token");
    Ok(token)
}

/// Mint a single-use, 7-day, member-role invite token. Never grants the
/// organizer role — that decision belongs entirely to the caller.
pub fn mint_invite_token(db: &Db, trip_id: &str, created_by: &str) -> anyhow::Result<InviteToken> {
    mint(db, trip_id, created_by, ROLE_MEMBER, 1, INVITE_TOKEN_TTL_DAYS)
}

/// Mint a reusable, 90-day, read-only shared-trip link.
pub fn mint_shared_trip_token(db: &Db, trip_id: &str, created_by: &str) -> anyhow::Result<InviteToken> {
    mint(db, trip_id, created_by, ROLE_VIEWER, i32::MAX, SHARED_TRIP_TOKEN_TTL_DAYS)
}

/// Look up a token by its value, scoped to a trip. Returns `None` for a
/// nonexistent, revoked, expired, or fully-used token — all identically,
/// by design.
pub fn fetch_valid_token(db: &Db, token: &str, trip_id: &str) -> anyhow::Result<Option<InviteToken>> {
    let now = Utc::now();
    db.with_conn(|conn| {
        let found: Option<InviteToken> = conn
            .query_row(
                "SELECT * FROM invite_tokens WHERE token = ?1 AND trip_id = ?2",
                params![token, trip_id],
                InviteToken::from_row,
            )
            .optional()?;
        Ok(found.filter(|t| t.is_valid(now)))
    })
}

/// Redeem a token: atomically increments `used_count` if the token is
/// still valid at the moment of redemption. Returns `None` under the same
/// opaque conditions as `fetch_valid_token`.
pub fn redeem_invite_token(db: &Db, token: &str, trip_id: &str) -> anyhow::Result<Option<InviteToken>> {
    let now = Utc::now();
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let found: Option<InviteToken> = tx
            .query_row(
                "SELECT * FROM invite_tokens WHERE token = ?1 AND trip_id = ?2",
                params![token, trip_id],
                InviteToken::from_row,
            )
            .optional()?;

        let Some(mut found) = found.filter(|t| t.is_valid(now)) else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE invite_tokens SET used_count = used_count + 1 WHERE id = ?1",
            params![found.id],
        )?;
        tx.commit()?;

        found.used_count += 1;
        tracing::info!(trip_id, token_id = %found.id, "token redeemed");
        Ok(Some(found))
    })
}

/// Revoke a token. Idempotent — revoking an already-revoked token succeeds
/// without changing its `revoked_at`.
pub fn revoke_token(db: &Db, token_id: &str) -> anyhow::Result<bool> {
    let now = Utc::now();
    db.with_conn_mut(|conn| {
        let updated = conn.execute(
            "UPDATE invite_tokens SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
            params![now.to_rfc3339(), token_id],
        )?;
        if updated == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM invite_tokens WHERE id = ?1",
                    params![token_id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            return Ok(exists);
        }
        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_and_unpadded() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(!a.contains('='));
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn invite_token_is_single_use_member_role() {
        let db = Db::open_in_memory().unwrap();
        let trip_id = Uuid::new_v4().to_string();
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO trips (id, user_id, city, timezone, start_date, end_date) VALUES (?1, 'u1', 'Tokyo', 'UTC', '2026-01-01', '2026-01-05')",
                params![trip_id],
            )?;
            Ok(())
        })
        .unwrap();

        let minted = mint_invite_token(&db, &trip_id, "organizer-1").unwrap();
        assert_eq!(minted.role, ROLE_MEMBER);
        assert_eq!(minted.max_uses, 1);

        let first = redeem_invite_token(&db, &minted.token, &trip_id).unwrap();
        assert!(first.is_some());

        let second = redeem_invite_token(&db, &minted.token, &trip_id).unwrap();
        assert!(second.is_none(), "a single-use token must not redeem twice");
    }

    #[test]
    fn nonexistent_token_is_a_clean_miss() {
        let db = Db::open_in_memory().unwrap();
        assert!(fetch_valid_token(&db, "does-not-exist", "trip-1").unwrap().is_none());
    }

    #[test]
    fn revoked_token_cannot_be_redeemed() {
        let db = Db::open_in_memory().unwrap();
        let trip_id = Uuid::new_v4().to_string();
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO trips (id, user_id, city, timezone, start_date, end_date) VALUES (?1, 'u1', 'Tokyo', 'UTC', '2026-01-01', '2026-01-05')",
                params![trip_id],
            )?;
            Ok(())
        })
        .unwrap();

        let minted = mint_invite_token(&db, &trip_id, "organizer-1").unwrap();
        assert!(revoke_token(&db, &minted.id).unwrap());
        assert!(revoke_token(&db, &minted.id).unwrap(), "revoke is idempotent");
        assert!(redeem_invite_token(&db, &minted.token, &trip_id).unwrap().is_none());
    }

    #[test]
    fn shared_trip_token_is_reusable_and_read_only() {
        let db = Db::open_in_memory().unwrap();
        let trip_id = Uuid::new_v4().to_string();
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO trips (id, user_id, city, timezone, start_date, end_date) VALUES (?1, 'u1', 'Tokyo', 'UTC', '2026-01-01', '2026-01-05')",
                params![trip_id],
            )?;
            Ok(())
        })
        .unwrap();

        let minted = mint_shared_trip_token(&db, &trip_id, "organizer-1").unwrap();
        assert_eq!(minted.role, ROLE_VIEWER);

        assert!(redeem_invite_token(&db, &minted.token, &trip_id).unwrap().is_some());
        assert!(redeem_invite_token(&db, &minted.token, &trip_id).unwrap().is_some());
    }
}
