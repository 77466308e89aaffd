pub const SCHEMA: &str = r#"
-- sites table
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_site_parameter TEXT NOT NULL UNIQUE
);

-- subscriptions table
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    tags TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_site_id ON subscriptions(site_id);
CREATE INDEX IF NOT EXISTS idx_subscriptions_chat_id ON subscriptions(chat_id);

-- site_updates table (one cursor row per watched site)
CREATE TABLE IF NOT EXISTS site_updates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL UNIQUE REFERENCES sites(id),
    last_question_id INTEGER,
    last_question_time INTEGER,
    next_update_at TEXT,
    status INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_site_updates_next_update_at ON site_updates(next_update_at);
"#;
