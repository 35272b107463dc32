//! The tables Haven expects to find in its database.
//!
//! [`tables`] lists them in creation order: every table comes after the
//! tables it references. Columns the application grew after a table first
//! shipped are listed as required columns so older databases pick them up.
//!
//! Call [`ensure_schema`] once at startup, before serving requests.

use haven_reconcile::{ColumnSpec, Connection, ReconciliationResult, TableSpec};

/// Every table, parents before children.
pub fn tables() -> Vec<TableSpec> {
    vec![
        profiles(),
        counselor_profiles(),
        counseling_sessions(),
        session_messages(),
        mood_checkins(),
        discussion_posts(),
        discussion_comments(),
        post_reactions(),
        moderation_reports(),
        admin_audit_log(),
    ]
}

/// Reconcile [`tables`] against the connection's current schema.
pub async fn ensure_schema<C: Connection>(conn: &C) -> haven_reconcile::Result<ReconciliationResult> {
    let result = haven_reconcile::reconcile(conn, &tables()).await?;
    if result.success {
        tracing::info!(
            operations = result.operations.len(),
            "database schema is up to date"
        );
    } else {
        for error in &result.errors {
            tracing::error!(
                table = %error.table,
                column = ?error.column,
                error = %error.error,
                "schema repair failed"
            );
        }
    }
    Ok(result)
}

fn profiles() -> TableSpec {
    TableSpec::new(
        "profiles",
        "CREATE TABLE IF NOT EXISTS profiles (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            email TEXT NOT NULL UNIQUE,
            full_name TEXT,
            role TEXT NOT NULL DEFAULT 'member'
                CHECK (role IN ('member', 'counselor', 'admin')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("display_name", "TEXT"))
    .column(ColumnSpec::new("avatar_url", "TEXT"))
    .column(ColumnSpec::new("is_banned", "BOOLEAN").with_default("FALSE"))
    .column(ColumnSpec::new("last_seen_at", "TIMESTAMPTZ"))
}

fn counselor_profiles() -> TableSpec {
    TableSpec::new(
        "counselor_profiles",
        "CREATE TABLE IF NOT EXISTS counselor_profiles (
            profile_id UUID PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
            bio TEXT,
            specialties TEXT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("is_verified", "BOOLEAN").with_default("FALSE"))
    .column(ColumnSpec::new("is_accepting_clients", "BOOLEAN").with_default("TRUE"))
    .column(ColumnSpec::new("license_number", "TEXT"))
}

fn counseling_sessions() -> TableSpec {
    TableSpec::new(
        "counseling_sessions",
        "CREATE TABLE IF NOT EXISTS counseling_sessions (
            id BIGSERIAL PRIMARY KEY,
            client_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            counselor_id UUID REFERENCES profiles(id) ON DELETE SET NULL,
            status TEXT NOT NULL DEFAULT 'requested',
            scheduled_for TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("topic", "TEXT"))
    .column(ColumnSpec::new("duration_minutes", "INTEGER").with_default("50"))
    .column(ColumnSpec::new("ended_at", "TIMESTAMPTZ"))
    .column(ColumnSpec::new("counselor_notes", "TEXT"))
}

fn session_messages() -> TableSpec {
    TableSpec::new(
        "session_messages",
        "CREATE TABLE IF NOT EXISTS session_messages (
            id BIGSERIAL PRIMARY KEY,
            session_id BIGINT NOT NULL REFERENCES counseling_sessions(id) ON DELETE CASCADE,
            sender_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            body TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("read_at", "TIMESTAMPTZ"))
}

fn mood_checkins() -> TableSpec {
    TableSpec::new(
        "mood_checkins",
        "CREATE TABLE IF NOT EXISTS mood_checkins (
            id BIGSERIAL PRIMARY KEY,
            profile_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            mood SMALLINT NOT NULL CHECK (mood BETWEEN 1 AND 5),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("note", "TEXT"))
    .column(ColumnSpec::new("energy_level", "SMALLINT"))
    .column(ColumnSpec::new("tags", "TEXT[]").with_default("'{}'"))
    .column(ColumnSpec::new("is_private", "BOOLEAN").with_default("TRUE"))
}

fn discussion_posts() -> TableSpec {
    TableSpec::new(
        "discussion_posts",
        "CREATE TABLE IF NOT EXISTS discussion_posts (
            id BIGSERIAL PRIMARY KEY,
            author_id UUID REFERENCES profiles(id) ON DELETE SET NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("category", "TEXT").with_default("'general'"))
    .column(ColumnSpec::new("is_anonymous", "BOOLEAN").with_default("FALSE"))
    .column(ColumnSpec::new("is_pinned", "BOOLEAN").with_default("FALSE"))
    .column(ColumnSpec::new("is_locked", "BOOLEAN").with_default("FALSE"))
    .column(ColumnSpec::new("is_hidden", "BOOLEAN").with_default("FALSE"))
    .column(ColumnSpec::new("updated_at", "TIMESTAMPTZ"))
}

fn discussion_comments() -> TableSpec {
    TableSpec::new(
        "discussion_comments",
        "CREATE TABLE IF NOT EXISTS discussion_comments (
            id BIGSERIAL PRIMARY KEY,
            post_id BIGINT NOT NULL REFERENCES discussion_posts(id) ON DELETE CASCADE,
            author_id UUID REFERENCES profiles(id) ON DELETE SET NULL,
            body TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("parent_id", "BIGINT"))
    .column(ColumnSpec::new("is_anonymous", "BOOLEAN").with_default("FALSE"))
    .column(ColumnSpec::new("is_hidden", "BOOLEAN").with_default("FALSE"))
}

fn post_reactions() -> TableSpec {
    TableSpec::new(
        "post_reactions",
        "CREATE TABLE IF NOT EXISTS post_reactions (
            post_id BIGINT NOT NULL REFERENCES discussion_posts(id) ON DELETE CASCADE,
            profile_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            kind TEXT NOT NULL DEFAULT 'support',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (post_id, profile_id, kind)
        )",
    )
}

fn moderation_reports() -> TableSpec {
    TableSpec::new(
        "moderation_reports",
        "CREATE TABLE IF NOT EXISTS moderation_reports (
            id BIGSERIAL PRIMARY KEY,
            reporter_id UUID REFERENCES profiles(id) ON DELETE SET NULL,
            post_id BIGINT REFERENCES discussion_posts(id) ON DELETE CASCADE,
            comment_id BIGINT REFERENCES discussion_comments(id) ON DELETE CASCADE,
            reason TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("resolved_by", "UUID"))
    .column(ColumnSpec::new("resolved_at", "TIMESTAMPTZ"))
    .column(ColumnSpec::new("resolution_note", "TEXT"))
}

fn admin_audit_log() -> TableSpec {
    TableSpec::new(
        "admin_audit_log",
        "CREATE TABLE IF NOT EXISTS admin_audit_log (
            id BIGSERIAL PRIMARY KEY,
            actor_id UUID REFERENCES profiles(id) ON DELETE SET NULL,
            action TEXT NOT NULL,
            target_table TEXT,
            target_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .column(ColumnSpec::new("details", "JSONB").with_default("'{}'::jsonb"))
}
