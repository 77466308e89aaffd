use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{DueSite, SiteCursor, Subscription, TagFilter, UpdateStatus};

use super::schema::SCHEMA;

// Matches SQLite's datetime('now') output so stored timestamps compare
// lexicographically against it.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Site operations

    /// Insert-or-select a site row by slug. The unique constraint plus the
    /// re-select makes concurrent duplicate inserts safe.
    pub async fn upsert_site(&self, slug: &str) -> Result<i64> {
        let slug = slug.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO sites (api_site_parameter) VALUES (?1)",
                    params![slug],
                )?;
                let id = conn.query_row(
                    "SELECT id FROM sites WHERE api_site_parameter = ?1",
                    params![slug],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    // Update cursor operations

    /// Sites due for a refresh: `next_update_at` elapsed or never set, and at
    /// least one subscription exists. Sites never polled come first.
    pub async fn due_sites(&self) -> Result<Vec<DueSite>> {
        let sites = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT u.id, u.last_question_id, u.last_question_time,
                              s.api_site_parameter, s.id, u.status
                       FROM sites s
                       LEFT JOIN site_updates u ON u.site_id = s.id
                       WHERE (u.next_update_at IS NULL OR u.next_update_at <= datetime('now'))
                         AND EXISTS (SELECT 1 FROM subscriptions sub WHERE sub.site_id = s.id)
                       ORDER BY u.next_update_at, s.id"#,
                )?;
                let sites = stmt
                    .query_map([], |row| Ok(due_site_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sites)
            })
            .await?;
        Ok(sites)
    }

    /// First-time activation: record a cursor due immediately, so the first
    /// real fetch happens on the following cycle.
    pub async fn create_cursor(&self, site_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO site_updates (site_id, next_update_at)
                     VALUES (?1, datetime('now'))",
                    params![site_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn begin_update(&self, cursor_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE site_updates SET status = ?1 WHERE id = ?2",
                    params![UpdateStatus::Updating.as_i64(), cursor_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Advance the cursor and reset the status to idle. The watermark columns
    /// keep their previous values when the cycle saw no new items, so a no-op
    /// cycle only moves `next_update_at`.
    pub async fn complete_update(
        &self,
        cursor_id: i64,
        next_update_at: DateTime<Utc>,
        max_question_id: Option<i64>,
        max_question_time: Option<i64>,
    ) -> Result<()> {
        let next_update = next_update_at.format(DATETIME_FORMAT).to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE site_updates
                       SET status = ?1,
                           next_update_at = ?2,
                           last_question_id = COALESCE(?3, last_question_id),
                           last_question_time = COALESCE(?4, last_question_time)
                       WHERE id = ?5"#,
                    params![
                        UpdateStatus::Idle.as_i64(),
                        next_update,
                        max_question_id,
                        max_question_time,
                        cursor_id,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn cursor_for_site(&self, site_id: i64) -> Result<Option<SiteCursor>> {
        let cursor = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, site_id, last_question_id, last_question_time,
                              next_update_at, status
                       FROM site_updates WHERE site_id = ?1"#,
                )?;
                let cursor = stmt
                    .query_row(params![site_id], |row| Ok(cursor_from_row(row)))
                    .optional()?;
                Ok(cursor)
            })
            .await?;
        Ok(cursor)
    }

    // Subscription operations

    pub async fn insert_subscription(
        &self,
        chat_id: i64,
        site_id: i64,
        filter: &TagFilter,
    ) -> Result<i64> {
        let tags = serde_json::to_string(filter)?;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO subscriptions (chat_id, site_id, tags) VALUES (?1, ?2, ?3)",
                    params![chat_id, site_id, tags],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// One page of a site's subscribers, keyset-paged by row id so deletions
    /// during the cycle cannot shift later pages.
    pub async fn subscriptions_for_site(
        &self,
        site_id: i64,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<Subscription>> {
        let limit = limit as i64;
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, chat_id, tags FROM subscriptions
                       WHERE site_id = ?1 AND id > ?2
                       ORDER BY id
                       LIMIT ?3"#,
                )?;
                let rows = stmt
                    .query_map(params![site_id, after_id, limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for (id, chat_id, tags) in rows {
            subscriptions.push(Subscription {
                id,
                chat_id,
                site_id,
                filter: serde_json::from_str(&tags)?,
            });
        }
        Ok(subscriptions)
    }

    /// A chat's subscriptions in creation order, for the list command.
    pub async fn list_subscriptions(&self, chat_id: i64) -> Result<Vec<(String, TagFilter)>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT s.api_site_parameter, sub.tags
                       FROM subscriptions sub
                       JOIN sites s ON s.id = sub.site_id
                       WHERE sub.chat_id = ?1
                       ORDER BY sub.id"#,
                )?;
                let rows = stmt
                    .query_map(params![chat_id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for (slug, tags) in rows {
            subscriptions.push((slug, serde_json::from_str(&tags)?));
        }
        Ok(subscriptions)
    }

    /// Remove every subscription of a chat. Used for the delete-all command
    /// and for cleanup when a recipient turns out to be unreachable.
    pub async fn delete_subscriptions_for_chat(&self, chat_id: i64) -> Result<usize> {
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM subscriptions WHERE chat_id = ?1",
                    params![chat_id],
                )?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    /// Remove the n-th (1-based, creation order) subscription of a chat.
    pub async fn delete_subscription_by_ordinal(&self, chat_id: i64, ordinal: u32) -> Result<bool> {
        if ordinal == 0 {
            return Ok(false);
        }
        let offset = (ordinal - 1) as i64;
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    r#"DELETE FROM subscriptions
                       WHERE id = (
                           SELECT id FROM subscriptions
                           WHERE chat_id = ?1
                           ORDER BY id
                           LIMIT 1 OFFSET ?2
                       )"#,
                    params![chat_id, offset],
                )?;
                Ok(removed)
            })
            .await?;
        Ok(removed > 0)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
        return Some(naive.and_utc());
    }
    None
}

fn due_site_from_row(row: &Row) -> DueSite {
    DueSite {
        cursor_id: row.get(0).unwrap(),
        last_question_id: row.get(1).unwrap(),
        last_question_time: row.get(2).unwrap(),
        site_slug: row.get(3).unwrap(),
        site_id: row.get(4).unwrap(),
        status: row
            .get::<_, Option<i64>>(5)
            .unwrap()
            .map(UpdateStatus::from_i64),
    }
}

fn cursor_from_row(row: &Row) -> SiteCursor {
    SiteCursor {
        id: row.get(0).unwrap(),
        site_id: row.get(1).unwrap(),
        last_question_id: row.get(2).unwrap(),
        last_question_time: row.get(3).unwrap(),
        next_update_at: row
            .get::<_, Option<String>>(4)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        status: UpdateStatus::from_i64(row.get(5).unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn open_repo() -> (Repository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watcher.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (repo, dir)
    }

    fn any_filter(tag: &str) -> TagFilter {
        TagFilter {
            any: vec![tag.to_string()],
            ..TagFilter::default()
        }
    }

    #[tokio::test]
    async fn upsert_site_returns_same_id_for_same_slug() {
        let (repo, _dir) = open_repo().await;
        let a = repo.upsert_site("stackoverflow").await.unwrap();
        let b = repo.upsert_site("stackoverflow").await.unwrap();
        let c = repo.upsert_site("askubuntu").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn sites_without_subscriptions_are_never_due() {
        let (repo, _dir) = open_repo().await;
        repo.upsert_site("stackoverflow").await.unwrap();
        assert!(repo.due_sites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_activation_creates_cursor_due_immediately() {
        let (repo, _dir) = open_repo().await;
        let site_id = repo.upsert_site("stackoverflow").await.unwrap();
        repo.insert_subscription(7, site_id, &any_filter("rust"))
            .await
            .unwrap();

        let due = repo.due_sites().await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].cursor_id.is_none());
        assert_eq!(due[0].site_slug, "stackoverflow");

        repo.create_cursor(site_id).await.unwrap();
        let due = repo.due_sites().await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].cursor_id.is_some());
        assert!(due[0].last_question_id.is_none());
        assert_eq!(due[0].status, Some(UpdateStatus::Idle));
    }

    #[tokio::test]
    async fn unpolled_sites_come_before_overdue_ones() {
        let (repo, _dir) = open_repo().await;
        let polled = repo.upsert_site("askubuntu").await.unwrap();
        let fresh = repo.upsert_site("superuser").await.unwrap();
        repo.insert_subscription(1, polled, &any_filter("bash"))
            .await
            .unwrap();
        repo.insert_subscription(2, fresh, &any_filter("windows"))
            .await
            .unwrap();

        repo.create_cursor(polled).await.unwrap();
        let cursor = repo.cursor_for_site(polled).await.unwrap().unwrap();
        repo.complete_update(
            cursor.id,
            Utc::now() - Duration::minutes(10),
            Some(100),
            Some(1_700_000_000),
        )
        .await
        .unwrap();

        let due = repo.due_sites().await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].site_slug, "superuser");
        assert_eq!(due[1].site_slug, "askubuntu");
    }

    #[tokio::test]
    async fn status_transitions_round_trip() {
        let (repo, _dir) = open_repo().await;
        let site_id = repo.upsert_site("stackoverflow").await.unwrap();
        repo.insert_subscription(7, site_id, &any_filter("rust"))
            .await
            .unwrap();
        repo.create_cursor(site_id).await.unwrap();
        let cursor_id = repo.cursor_for_site(site_id).await.unwrap().unwrap().id;

        repo.begin_update(cursor_id).await.unwrap();
        let cursor = repo.cursor_for_site(site_id).await.unwrap().unwrap();
        assert_eq!(cursor.status, UpdateStatus::Updating);
        assert_eq!(cursor.site_id, site_id);

        // A row stuck in Updating is still re-picked once due.
        let due = repo.due_sites().await.unwrap();
        assert_eq!(due[0].status, Some(UpdateStatus::Updating));

        repo.complete_update(
            cursor_id,
            Utc::now() + Duration::minutes(5),
            Some(42),
            Some(1_700_000_000),
        )
        .await
        .unwrap();
        let cursor = repo.cursor_for_site(site_id).await.unwrap().unwrap();
        assert_eq!(cursor.status, UpdateStatus::Idle);
        assert_eq!(cursor.last_question_id, Some(42));
        assert!(cursor.next_update_at.unwrap() > Utc::now());

        // The cursor now points into the future, so the site is not due.
        assert!(repo.due_sites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completing_with_no_items_preserves_watermark() {
        let (repo, _dir) = open_repo().await;
        let site_id = repo.upsert_site("stackoverflow").await.unwrap();
        repo.insert_subscription(7, site_id, &any_filter("rust"))
            .await
            .unwrap();
        repo.create_cursor(site_id).await.unwrap();
        let cursor_id = repo.cursor_for_site(site_id).await.unwrap().unwrap().id;

        repo.complete_update(
            cursor_id,
            Utc::now() - Duration::minutes(10),
            Some(42),
            Some(1_700_000_000),
        )
        .await
        .unwrap();
        repo.complete_update(cursor_id, Utc::now() + Duration::minutes(5), None, None)
            .await
            .unwrap();

        let cursor = repo.cursor_for_site(site_id).await.unwrap().unwrap();
        assert_eq!(cursor.last_question_id, Some(42));
        assert_eq!(cursor.last_question_time, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn subscription_pages_are_stable_under_deletion() {
        let (repo, _dir) = open_repo().await;
        let site_id = repo.upsert_site("stackoverflow").await.unwrap();
        for chat_id in 1..=5 {
            repo.insert_subscription(chat_id, site_id, &any_filter("rust"))
                .await
                .unwrap();
        }

        let page = repo.subscriptions_for_site(site_id, 0, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        let last_seen = page[1].id;

        // A deletion between pages must not shift the remaining ones.
        repo.delete_subscriptions_for_chat(page[0].chat_id)
            .await
            .unwrap();

        let page = repo
            .subscriptions_for_site(site_id, last_seen, 2)
            .await
            .unwrap();
        let chats: Vec<i64> = page.iter().map(|s| s.chat_id).collect();
        assert_eq!(chats, vec![3, 4]);

        let page = repo
            .subscriptions_for_site(site_id, page[1].id, 2)
            .await
            .unwrap();
        let chats: Vec<i64> = page.iter().map(|s| s.chat_id).collect();
        assert_eq!(chats, vec![5]);
    }

    #[tokio::test]
    async fn ordinal_delete_removes_nth_subscription() {
        let (repo, _dir) = open_repo().await;
        let site_id = repo.upsert_site("stackoverflow").await.unwrap();
        for tag in ["rust", "go", "zig"] {
            repo.insert_subscription(7, site_id, &any_filter(tag))
                .await
                .unwrap();
        }

        assert!(repo.delete_subscription_by_ordinal(7, 2).await.unwrap());
        let remaining = repo.list_subscriptions(7).await.unwrap();
        let tags: Vec<&str> = remaining
            .iter()
            .map(|(_, f)| f.any[0].as_str())
            .collect();
        assert_eq!(tags, vec!["rust", "zig"]);

        assert!(!repo.delete_subscription_by_ordinal(7, 9).await.unwrap());
        assert!(!repo.delete_subscription_by_ordinal(7, 0).await.unwrap());
    }

    #[tokio::test]
    async fn chat_wide_delete_leaves_other_chats_alone() {
        let (repo, _dir) = open_repo().await;
        let site_id = repo.upsert_site("stackoverflow").await.unwrap();
        repo.insert_subscription(7, site_id, &any_filter("rust"))
            .await
            .unwrap();
        repo.insert_subscription(7, site_id, &any_filter("go"))
            .await
            .unwrap();
        repo.insert_subscription(8, site_id, &any_filter("zig"))
            .await
            .unwrap();

        assert_eq!(repo.delete_subscriptions_for_chat(7).await.unwrap(), 2);
        assert_eq!(repo.list_subscriptions(7).await.unwrap().len(), 0);
        assert_eq!(repo.list_subscriptions(8).await.unwrap().len(), 1);
    }
}
