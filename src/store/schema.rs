// SQL schema for the metadata store, matching spec.md §6's "Metadata
// store schema (SQL, essential)" literally. Applied with `sqlx::migrate!`
// against a Postgres database.

pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS collection_mappings (
        name TEXT PRIMARY KEY,
        primary_id TEXT,
        replica_id TEXT,
        status TEXT NOT NULL DEFAULT 'partial',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wal_writes (
        write_id TEXT PRIMARY KEY,
        "timestamp" TIMESTAMPTZ NOT NULL,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        data BYTEA NOT NULL,
        headers JSONB NOT NULL DEFAULT '{}',
        executed_on TEXT NOT NULL,
        target_instance TEXT NOT NULL,
        status TEXT NOT NULL,
        synced_instances JSONB NOT NULL DEFAULT '[]',
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS wal_writes_status_timestamp_idx
        ON wal_writes (status, "timestamp");
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS wal_writes_target_status_idx
        ON wal_writes (target_instance, status);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transaction_attempts (
        transaction_id TEXT PRIMARY KEY,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        data BYTEA NOT NULL,
        headers JSONB NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        completed_at TIMESTAMPTZ,
        retry_count INTEGER NOT NULL DEFAULT 0,
        client_session TEXT,
        failure_reason TEXT
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS transaction_attempts_status_idx
        ON transaction_attempts (status, created_at);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS engine_metrics (
        id BIGSERIAL PRIMARY KEY,
        metric_name TEXT NOT NULL,
        metric_value DOUBLE PRECISION NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS engine_metrics_name_time_idx
        ON engine_metrics (metric_name, recorded_at);
    "#,
];
