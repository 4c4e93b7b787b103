use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, sessions, moderation)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY,
                username        TEXT,
                gender          TEXT,
                province        TEXT,
                city            TEXT,
                status          TEXT NOT NULL DEFAULT 'idle'
                                CHECK (status IN ('idle', 'searching', 'chatting')),
                partner_id      INTEGER,
                credits         INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
                created_at      INTEGER NOT NULL,
                queued_seq      INTEGER,
                search_gender   TEXT,
                search_province TEXT,
                search_city     TEXT,
                CHECK ((status = 'chatting') = (partner_id IS NOT NULL))
            );

            CREATE INDEX idx_users_queue ON users(status, queued_seq);

            CREATE TABLE sessions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_a          INTEGER NOT NULL REFERENCES users(id),
                user_b          INTEGER NOT NULL REFERENCES users(id),
                started_at      INTEGER NOT NULL,
                last_activity   INTEGER NOT NULL,
                ended_at        INTEGER,
                status          TEXT NOT NULL DEFAULT 'active'
                                CHECK (status IN ('active', 'ended', 'cancelled')),
                CHECK (user_a <> user_b)
            );

            CREATE INDEX idx_sessions_user_a ON sessions(user_a, status);
            CREATE INDEX idx_sessions_user_b ON sessions(user_b, status);
            CREATE INDEX idx_sessions_activity ON sessions(status, last_activity);

            -- A user can sit on each side of at most one active session.
            CREATE UNIQUE INDEX uq_sessions_active_a ON sessions(user_a) WHERE status = 'active';
            CREATE UNIQUE INDEX uq_sessions_active_b ON sessions(user_b) WHERE status = 'active';

            CREATE TABLE blocks (
                blocker_id  INTEGER NOT NULL,
                blocked_id  INTEGER NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (blocker_id, blocked_id)
            );

            CREATE INDEX idx_blocks_reverse ON blocks(blocked_id, blocker_id);

            CREATE TABLE reports (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                reporter_id INTEGER NOT NULL,
                reported_id INTEGER NOT NULL,
                reason      TEXT NOT NULL DEFAULT '',
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_reports_reported ON reports(reported_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (chat requests)");
        conn.execute_batch(
            "
            CREATE TABLE chat_requests (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                from_id     INTEGER NOT NULL REFERENCES users(id),
                to_id       INTEGER NOT NULL REFERENCES users(id),
                status      TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'accepted', 'declined')),
                created_at  INTEGER NOT NULL,
                resolved_at INTEGER,
                CHECK (from_id <> to_id)
            );

            -- One open request per direction.
            CREATE UNIQUE INDEX uq_chat_requests_pending
                ON chat_requests(from_id, to_id) WHERE status = 'pending';
            CREATE INDEX idx_chat_requests_to ON chat_requests(to_id, status);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
