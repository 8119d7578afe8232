use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::AppConfig;

/// Schema is defined once at start-up. The two partial unique indexes on
/// `payables` carry the natural key of each ledger line variant.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS app_users (
        id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        email text NOT NULL UNIQUE,
        full_name text,
        role text NOT NULL DEFAULT 'viewer',
        created_at timestamptz NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS clients (
        id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        code text,
        name text NOT NULL,
        company text,
        created_at timestamptz NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS collaborators (
        id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        code text,
        name text NOT NULL,
        company text,
        bank text,
        pix text,
        created_at timestamptz NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS actions (
        id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        name text NOT NULL,
        event text,
        client text,
        date date,
        start_date date,
        end_date date,
        due_date date,
        payment_method text,
        created_by text,
        staff jsonb NOT NULL DEFAULT '[]'::jsonb,
        costs jsonb NOT NULL DEFAULT '[]'::jsonb,
        created_at timestamptz NOT NULL DEFAULT now(),
        updated_at timestamptz NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS payables (
        id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        action_id uuid NOT NULL REFERENCES actions(id),
        staff_name text,
        pix text,
        bank text,
        cost_id text,
        description text,
        collaborator_id uuid,
        vendor_name text,
        vendor_company text,
        value double precision NOT NULL DEFAULT 0,
        payment_method text,
        due_date date,
        report_date date NOT NULL,
        status text NOT NULL DEFAULT 'OPEN' CHECK (status IN ('OPEN', 'PAID')),
        paid_at timestamptz,
        created_at timestamptz NOT NULL DEFAULT now(),
        CHECK ((staff_name IS NULL) <> (cost_id IS NULL))
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS payables_action_staff_key
        ON payables (action_id, staff_name) WHERE staff_name IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS payables_action_cost_key
        ON payables (action_id, cost_id) WHERE cost_id IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS receivables (
        id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        client_id text,
        action_ids jsonb NOT NULL DEFAULT '[]'::jsonb,
        description text NOT NULL,
        total double precision NOT NULL DEFAULT 0,
        recurring boolean NOT NULL DEFAULT false,
        installments jsonb NOT NULL DEFAULT '[]'::jsonb,
        document_date date,
        due_date date,
        received_date date,
        status text NOT NULL DEFAULT 'OPEN' CHECK (status IN ('OPEN', 'RECEIVED')),
        created_at timestamptz NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS fixed_costs (
        id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        description text NOT NULL,
        value double precision NOT NULL DEFAULT 0,
        due_date date,
        status text NOT NULL DEFAULT 'OPEN' CHECK (status IN ('OPEN', 'PAID')),
        created_at timestamptz NOT NULL DEFAULT now()
    )",
];

pub fn create_pool(config: &AppConfig) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL is not set; data routes will return 502");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections.max(1))
        .min_connections(config.db_pool_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect_lazy(url)?;
    Ok(Some(pool))
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(statements = SCHEMA.len(), "Schema ensured");
    Ok(())
}
