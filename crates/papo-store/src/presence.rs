//! Presence directory queries.
//!
//! The `online_users` table is multi-writer: every participant upserts its
//! own row and reads everyone else's. Liveness is time-based, not push-based;
//! [`Database::list_online`] filters on `last_seen` against the TTL, so a
//! crashed client disappears from queries without ever deregistering.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;

use papo_shared::{Gender, Identity, PresenceStatus};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::Result;
use crate::models::{PresenceAttrs, PresenceRecord};

impl Database {
    /// Register (or refresh) a presence record.
    ///
    /// Keyed by identity: re-registering replaces the display attributes and
    /// refreshes `last_seen`; it never creates a duplicate row.
    pub fn upsert_presence(
        &self,
        identity: &Identity,
        attrs: &PresenceAttrs,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO online_users
                 (identity, display_name, avatar_url, gender, country, bio,
                  is_anonymous, status, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(identity) DO UPDATE SET
                 display_name = excluded.display_name,
                 avatar_url   = excluded.avatar_url,
                 gender       = excluded.gender,
                 country      = excluded.country,
                 bio          = excluded.bio,
                 is_anonymous = excluded.is_anonymous,
                 status       = excluded.status,
                 last_seen    = excluded.last_seen",
            params![
                identity.as_str(),
                attrs.display_name,
                attrs.avatar_url,
                attrs.gender.map(|g| g.as_str()),
                attrs.country,
                attrs.bio,
                attrs.is_anonymous,
                attrs.status.as_str(),
                encode_ts(now),
            ],
        )?;
        Ok(())
    }

    /// Heartbeat: refresh `last_seen` only.
    ///
    /// Returns `false` if no record exists for the identity (e.g. it was
    /// deregistered concurrently); callers re-register in that case.
    pub fn touch_presence(&self, identity: &Identity, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE online_users SET last_seen = ?2 WHERE identity = ?1",
            params![identity.as_str(), encode_ts(now)],
        )?;
        Ok(affected > 0)
    }

    /// All records seen within `ttl` of `now`, most recent first, excluding
    /// the caller's own identity.
    ///
    /// Stale rows are excluded here even if not yet physically deleted.
    pub fn list_online(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        excluding: Option<&Identity>,
    ) -> Result<Vec<PresenceRecord>> {
        let cutoff = now - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let excluded = excluding.map(Identity::as_str).unwrap_or("");

        let mut stmt = self.conn().prepare(
            "SELECT identity, display_name, avatar_url, gender, country, bio,
                    is_anonymous, status, last_seen
             FROM online_users
             WHERE last_seen >= ?1 AND identity <> ?2
             ORDER BY last_seen DESC",
        )?;

        let rows = stmt.query_map(params![encode_ts(cutoff), excluded], row_to_presence)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Remove a presence record. Idempotent: deleting a missing identity is
    /// a no-op, not an error.
    pub fn delete_presence(&self, identity: &Identity) -> Result<()> {
        self.conn().execute(
            "DELETE FROM online_users WHERE identity = ?1",
            params![identity.as_str()],
        )?;
        Ok(())
    }
}

fn row_to_presence(row: &rusqlite::Row<'_>) -> rusqlite::Result<PresenceRecord> {
    let identity: String = row.get(0)?;
    let gender: Option<String> = row.get(3)?;
    let status: String = row.get(7)?;
    let last_seen_str: String = row.get(8)?;

    let last_seen = decode_ts(&last_seen_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(PresenceRecord {
        identity: Identity::new(identity),
        display_name: row.get(1)?,
        avatar_url: row.get(2)?,
        gender: gender.as_deref().and_then(Gender::parse),
        country: row.get(4)?,
        bio: row.get(5)?,
        is_anonymous: row.get(6)?,
        status: PresenceStatus::parse(&status).unwrap_or(PresenceStatus::Online),
        last_seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(120);

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn reregistering_replaces_instead_of_duplicating() {
        let (_dir, db) = test_db();
        let id = Identity::new("anon-aa");
        let now = Utc::now();

        db.upsert_presence(&id, &PresenceAttrs::anonymous("Ana"), now).unwrap();
        let mut attrs = PresenceAttrs::anonymous("Ana Clara");
        attrs.bio = "oi".into();
        db.upsert_presence(&id, &attrs, now).unwrap();

        let online = db.list_online(now, TTL, None).unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].display_name, "Ana Clara");
        assert_eq!(online[0].bio, "oi");
    }

    #[test]
    fn ttl_boundary_included_at_119s_excluded_at_121s() {
        let (_dir, db) = test_db();
        let id = Identity::new("anon-aa");
        let t = Utc::now();

        db.upsert_presence(&id, &PresenceAttrs::anonymous("Ana"), t).unwrap();

        let at_119 = t + chrono::Duration::seconds(119);
        assert_eq!(db.list_online(at_119, TTL, None).unwrap().len(), 1);

        let at_121 = t + chrono::Duration::seconds(121);
        assert!(db.list_online(at_121, TTL, None).unwrap().is_empty());
    }

    #[test]
    fn heartbeat_refreshes_liveness_without_touching_attributes() {
        let (_dir, db) = test_db();
        let id = Identity::new("anon-aa");
        let t = Utc::now();

        let mut attrs = PresenceAttrs::anonymous("Ana");
        attrs.country = "PT".into();
        db.upsert_presence(&id, &attrs, t).unwrap();

        let t2 = t + chrono::Duration::seconds(110);
        assert!(db.touch_presence(&id, t2).unwrap());

        // Alive well past the original registration's TTL.
        let t3 = t + chrono::Duration::seconds(200);
        let online = db.list_online(t3, TTL, None).unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].country, "PT");
    }

    #[test]
    fn heartbeat_on_missing_record_reports_absence() {
        let (_dir, db) = test_db();
        assert!(!db.touch_presence(&Identity::new("anon-gone"), Utc::now()).unwrap());
    }

    #[test]
    fn listing_excludes_self_and_orders_by_recency() {
        let (_dir, db) = test_db();
        let me = Identity::new("anon-me");
        let t = Utc::now();

        db.upsert_presence(&me, &PresenceAttrs::anonymous("Eu"), t).unwrap();
        db.upsert_presence(&Identity::new("anon-old"), &PresenceAttrs::anonymous("Old"), t)
            .unwrap();
        db.upsert_presence(
            &Identity::new("anon-new"),
            &PresenceAttrs::anonymous("New"),
            t + chrono::Duration::seconds(5),
        )
        .unwrap();

        let online = db.list_online(t + chrono::Duration::seconds(10), TTL, Some(&me)).unwrap();
        let names: Vec<_> = online.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["New", "Old"]);
    }

    #[test]
    fn deregister_is_idempotent() {
        let (_dir, db) = test_db();
        let id = Identity::new("anon-aa");
        let now = Utc::now();

        db.upsert_presence(&id, &PresenceAttrs::anonymous("Ana"), now).unwrap();
        db.delete_presence(&id).unwrap();
        db.delete_presence(&id).unwrap();
        db.delete_presence(&Identity::new("anon-never-existed")).unwrap();

        assert!(db.list_online(now, TTL, None).unwrap().is_empty());
    }
}
