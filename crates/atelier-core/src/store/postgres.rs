//! PostgreSQL backend. Queries are plain (non-macro) sqlx so no live
//! database is needed at build time.
//!
//! The optimistic-concurrency contract is enforced in SQL: `save_workshop`
//! is a single `UPDATE` guarded on `(id, revision)`, so two racing writers
//! can never both commit against the same snapshot.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{RosterStore, StoreError, StoreResult, UserStore};
use crate::types::{
    AttendanceRecord, Role, User, UserId, UserStatus, Vacancies, Workshop, WorkshopId,
    WorkshopStatus,
};

const WORKSHOP_COLUMNS: &str = "id, name, description, status, start_date, seats_total, \
     seats_filled, teachers, tutors, enrolled_students, attendance, revision, created_at, \
     updated_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects a pool; call [`PostgresStore::ensure_schema`] before first use.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workshops (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                start_date TIMESTAMPTZ NOT NULL,
                seats_total BIGINT NOT NULL,
                seats_filled BIGINT NOT NULL,
                teachers TEXT[] NOT NULL DEFAULT '{}',
                tutors TEXT[] NOT NULL DEFAULT '{}',
                enrolled_students TEXT[] NOT NULL DEFAULT '{}',
                attendance JSONB NOT NULL DEFAULT '[]'::jsonb,
                revision BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("postgres schema create failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl RosterStore for PostgresStore {
    async fn get_workshop(&self, id: &WorkshopId) -> StoreResult<Option<Workshop>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKSHOP_COLUMNS} FROM workshops WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("postgres select workshop failed: {e}")))?;

        row.as_ref().map(workshop_from_row).transpose()
    }

    async fn list_workshops(&self) -> StoreResult<Vec<Workshop>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKSHOP_COLUMNS} FROM workshops ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("postgres list workshops failed: {e}")))?;

        rows.iter().map(workshop_from_row).collect()
    }

    async fn insert_workshop(&self, workshop: Workshop) -> StoreResult<Workshop> {
        let attendance = attendance_json(&workshop.attendance)?;
        let revision = revision_bigint(workshop.revision)?;
        sqlx::query(
            r#"
            INSERT INTO workshops (
                id, name, description, status, start_date, seats_total, seats_filled,
                teachers, tutors, enrolled_students, attendance, revision, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(workshop.id.as_str())
        .bind(&workshop.name)
        .bind(&workshop.description)
        .bind(workshop.status.as_str())
        .bind(workshop.start_date)
        .bind(i64::from(workshop.vacancies.total))
        .bind(i64::from(workshop.vacancies.filled))
        .bind(id_strings(&workshop.teachers))
        .bind(id_strings(&workshop.tutors))
        .bind(id_strings(&workshop.enrolled_students))
        .bind(&attendance)
        .bind(revision)
        .bind(workshop.created_at)
        .bind(workshop.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("workshop {} already exists", workshop.id))
            } else {
                StoreError::Query(format!("postgres insert workshop failed: {e}"))
            }
        })?;

        Ok(workshop)
    }

    async fn save_workshop(&self, workshop: Workshop) -> StoreResult<Workshop> {
        let attendance = attendance_json(&workshop.attendance)?;
        let revision = revision_bigint(workshop.revision)?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE workshops
            SET name = $2, description = $3, status = $4, start_date = $5,
                seats_total = $6, seats_filled = $7, teachers = $8, tutors = $9,
                enrolled_students = $10, attendance = $11,
                revision = revision + 1, updated_at = NOW()
            WHERE id = $1 AND revision = $12
            RETURNING {WORKSHOP_COLUMNS}
            "#
        ))
        .bind(workshop.id.as_str())
        .bind(&workshop.name)
        .bind(&workshop.description)
        .bind(workshop.status.as_str())
        .bind(workshop.start_date)
        .bind(i64::from(workshop.vacancies.total))
        .bind(i64::from(workshop.vacancies.filled))
        .bind(id_strings(&workshop.teachers))
        .bind(id_strings(&workshop.tutors))
        .bind(id_strings(&workshop.enrolled_students))
        .bind(&attendance)
        .bind(revision)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("postgres save workshop failed: {e}")))?;

        match row {
            Some(row) => workshop_from_row(&row),
            None => Err(StoreError::RevisionConflict),
        }
    }

    async fn delete_workshop(&self, id: &WorkshopId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM workshops WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("postgres delete workshop failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, email, role, status, created_at FROM users WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("postgres select user failed: {e}")))?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, name, email, role, status, created_at FROM users ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("postgres list users failed: {e}")))?;

        rows.iter().map(user_from_row).collect()
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, role, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("email {} already in use", user.email))
            } else {
                StoreError::Query(format!("postgres insert user failed: {e}"))
            }
        })?;

        Ok(user)
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, role, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, email = EXCLUDED.email,
                role = EXCLUDED.role, status = EXCLUDED.status
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("email {} already in use", user.email))
            } else {
                StoreError::Query(format!("postgres update user failed: {e}"))
            }
        })?;

        Ok(user)
    }

    async fn delete_user(&self, id: &UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("postgres delete user failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("postgres decode {name} failed: {e}")))
}

fn workshop_from_row(row: &PgRow) -> StoreResult<Workshop> {
    let status_str: String = column(row, "status")?;
    let status = WorkshopStatus::parse(&status_str).ok_or_else(|| {
        StoreError::Serialization(format!("unknown workshop status in storage: {status_str}"))
    })?;

    let attendance_value: serde_json::Value = column(row, "attendance")?;
    let attendance: Vec<AttendanceRecord> = serde_json::from_value(attendance_value)
        .map_err(|e| StoreError::Serialization(format!("postgres decode attendance failed: {e}")))?;

    let seats_total: i64 = column(row, "seats_total")?;
    let seats_filled: i64 = column(row, "seats_filled")?;
    let revision: i64 = column(row, "revision")?;
    let id: String = column(row, "id")?;
    let teachers: Vec<String> = column(row, "teachers")?;
    let tutors: Vec<String> = column(row, "tutors")?;
    let enrolled: Vec<String> = column(row, "enrolled_students")?;

    Ok(Workshop {
        id: WorkshopId::new(id),
        name: column(row, "name")?,
        description: column(row, "description")?,
        status,
        start_date: column(row, "start_date")?,
        vacancies: Vacancies {
            total: seats_total
                .try_into()
                .map_err(|_| StoreError::Serialization("negative seat total in storage".to_string()))?,
            filled: seats_filled
                .try_into()
                .map_err(|_| StoreError::Serialization("negative seat fill in storage".to_string()))?,
        },
        teachers: teachers.into_iter().map(UserId::new).collect(),
        tutors: tutors.into_iter().map(UserId::new).collect(),
        enrolled_students: enrolled.into_iter().map(UserId::new).collect(),
        attendance,
        revision: revision
            .try_into()
            .map_err(|_| StoreError::Serialization("negative revision in storage".to_string()))?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role_str: String = column(row, "role")?;
    let role = Role::parse(&role_str).ok_or_else(|| {
        StoreError::Serialization(format!("unknown user role in storage: {role_str}"))
    })?;

    let status_str: String = column(row, "status")?;
    let status = UserStatus::parse(&status_str).ok_or_else(|| {
        StoreError::Serialization(format!("unknown user status in storage: {status_str}"))
    })?;

    let id: String = column(row, "id")?;

    Ok(User {
        id: UserId::new(id),
        name: column(row, "name")?,
        email: column(row, "email")?,
        role,
        status,
        created_at: column(row, "created_at")?,
    })
}

fn id_strings(ids: &[UserId]) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

fn attendance_json(records: &[AttendanceRecord]) -> StoreResult<serde_json::Value> {
    serde_json::to_value(records)
        .map_err(|e| StoreError::Serialization(format!("encode attendance failed: {e}")))
}

fn revision_bigint(revision: u64) -> StoreResult<i64> {
    revision.try_into().map_err(|_| {
        StoreError::Serialization("revision exceeds postgres BIGINT range".to_string())
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
