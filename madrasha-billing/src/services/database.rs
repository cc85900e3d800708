//! Database service for madrasha-billing.

use crate::models::{
    Batch, CorrectExpense, Course, CreateLedgerEntry, CreatePaymentSession, CreateStudent,
    Department, Enrollment, FeeCandidates, FeeScope, FeeTier, FundBalance, GatewayTransaction,
    GenerationReport, Invoice, InvoiceRun, LedgerEntry, ListInvoicesFilter, ListLedgerFilter,
    PaymentSession, PaymentSessionStatus, Student, StudentFeeTier, TierFee,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Maps foreign-key violations to a 400 so callers learn which parent is missing.
fn insert_error(context: &str, parent: &str, e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
            AppError::BadRequest(anyhow::anyhow!("Referenced {} does not exist", parent))
        }
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("{}: duplicate record", context))
        }
        _ => db_error(context, e),
    }
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "madrasha-billing"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Academic Structure
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(name = %name))]
    pub async fn create_course(
        &self,
        name: &str,
        monthly_fee: Option<Decimal>,
    ) -> Result<Course, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_course"])
            .start_timer();

        let course = sqlx::query_as::<_, Course>(
            r#"
            INSERT INTO courses (course_id, name, monthly_fee)
            VALUES ($1, $2, $3)
            RETURNING course_id, name, monthly_fee, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(monthly_fee)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error("Failed to create course", "course", e))?;

        timer.observe_duration();

        info!(course_id = %course.course_id, "Course created");
        Ok(course)
    }

    #[instrument(skip(self), fields(course_id = %course_id, name = %name))]
    pub async fn create_department(
        &self,
        course_id: Uuid,
        name: &str,
        monthly_fee: Option<Decimal>,
    ) -> Result<Department, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_department"])
            .start_timer();

        let department = sqlx::query_as::<_, Department>(
            r#"
            INSERT INTO departments (department_id, course_id, name, monthly_fee)
            VALUES ($1, $2, $3, $4)
            RETURNING department_id, course_id, name, monthly_fee, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(name)
        .bind(monthly_fee)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error("Failed to create department", "course", e))?;

        timer.observe_duration();

        info!(department_id = %department.department_id, "Department created");
        Ok(department)
    }

    #[instrument(skip(self), fields(department_id = %department_id, name = %name))]
    pub async fn create_batch(
        &self,
        department_id: Uuid,
        name: &str,
        monthly_fee: Option<Decimal>,
    ) -> Result<Batch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, Batch>(
            r#"
            INSERT INTO batches (batch_id, department_id, name, monthly_fee)
            VALUES ($1, $2, $3, $4)
            RETURNING batch_id, department_id, name, monthly_fee, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(department_id)
        .bind(name)
        .bind(monthly_fee)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error("Failed to create batch", "department", e))?;

        timer.observe_duration();

        info!(batch_id = %batch.batch_id, "Batch created");
        Ok(batch)
    }

    /// Set or clear the default monthly fee of a course, department or batch.
    #[instrument(skip(self), fields(scope = %scope, target_id = %target_id))]
    pub async fn set_default_fee(
        &self,
        scope: FeeScope,
        target_id: Uuid,
        monthly_fee: Option<Decimal>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_default_fee"])
            .start_timer();

        let (table, id_column) = scope.table();
        let sql = format!(
            "UPDATE {} SET monthly_fee = $1 WHERE {} = $2",
            table, id_column
        );

        let result = sqlx::query(&sql)
            .bind(monthly_fee)
            .bind(target_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to set default fee", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "{} {} not found",
                scope,
                target_id
            )));
        }

        info!(fee = ?monthly_fee, "Default fee updated");
        Ok(())
    }

    #[instrument(skip(self, input), fields(full_name = %input.full_name))]
    pub async fn create_student(&self, input: &CreateStudent) -> Result<Student, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_student"])
            .start_timer();

        let student = sqlx::query_as::<_, Student>(
            r#"
            INSERT INTO students (student_id, full_name, email, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING student_id, full_name, email, phone, is_active, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.full_name)
        .bind(&input.email)
        .bind(&input.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create student", e))?;

        timer.observe_duration();

        info!(student_id = %student.student_id, "Student created");
        Ok(student)
    }

    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn get_student(&self, student_id: Uuid) -> Result<Option<Student>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_student"])
            .start_timer();

        let student = sqlx::query_as::<_, Student>(
            r#"
            SELECT student_id, full_name, email, phone, is_active, created_utc
            FROM students
            WHERE student_id = $1
            "#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get student", e))?;

        timer.observe_duration();

        Ok(student)
    }

    #[instrument(skip(self), fields(student_id = %student_id, is_active = is_active))]
    pub async fn set_student_active(
        &self,
        student_id: Uuid,
        is_active: bool,
    ) -> Result<Student, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_student_active"])
            .start_timer();

        let student = sqlx::query_as::<_, Student>(
            r#"
            UPDATE students SET is_active = $2
            WHERE student_id = $1
            RETURNING student_id, full_name, email, phone, is_active, created_utc
            "#,
        )
        .bind(student_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update student", e))?;

        timer.observe_duration();

        student.ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Student not found")))
    }

    /// Enroll a student in a batch, closing any previous active enrollment.
    #[instrument(skip(self), fields(student_id = %student_id, batch_id = %batch_id))]
    pub async fn enroll_student(
        &self,
        student_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Enrollment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["enroll_student"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            "UPDATE enrollments SET is_active = FALSE WHERE student_id = $1 AND is_active",
        )
        .bind(student_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to close previous enrollment", e))?;

        let enrollment = sqlx::query_as::<_, Enrollment>(
            r#"
            INSERT INTO enrollments (enrollment_id, student_id, batch_id)
            VALUES ($1, $2, $3)
            RETURNING enrollment_id, student_id, batch_id, is_active, enrolled_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| insert_error("Failed to enroll student", "student or batch", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(enrollment_id = %enrollment.enrollment_id, "Student enrolled");
        Ok(enrollment)
    }

    #[instrument(skip(self, description), fields(name = %name))]
    pub async fn create_fee_tier(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<FeeTier, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_fee_tier"])
            .start_timer();

        let tier = sqlx::query_as::<_, FeeTier>(
            r#"
            INSERT INTO fee_tiers (tier_id, name, description)
            VALUES ($1, $2, $3)
            RETURNING tier_id, name, description, is_active, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error("Failed to create fee tier", "tier", e))?;

        timer.observe_duration();

        info!(tier_id = %tier.tier_id, "Fee tier created");
        Ok(tier)
    }

    #[instrument(skip(self), fields(tier_id = %tier_id, is_active = is_active))]
    pub async fn set_fee_tier_active(
        &self,
        tier_id: Uuid,
        is_active: bool,
    ) -> Result<FeeTier, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_fee_tier_active"])
            .start_timer();

        let tier = sqlx::query_as::<_, FeeTier>(
            r#"
            UPDATE fee_tiers SET is_active = $2
            WHERE tier_id = $1
            RETURNING tier_id, name, description, is_active, created_utc
            "#,
        )
        .bind(tier_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update fee tier", e))?;

        timer.observe_duration();

        tier.ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Fee tier not found")))
    }

    /// Assign a fee tier to a student, replacing any active assignment.
    #[instrument(skip(self), fields(student_id = %student_id, tier_id = %tier_id))]
    pub async fn assign_fee_tier(
        &self,
        student_id: Uuid,
        tier_id: Uuid,
    ) -> Result<StudentFeeTier, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assign_fee_tier"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            "UPDATE student_fee_tiers SET is_active = FALSE WHERE student_id = $1 AND is_active",
        )
        .bind(student_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to close previous tier assignment", e))?;

        let assignment = sqlx::query_as::<_, StudentFeeTier>(
            r#"
            INSERT INTO student_fee_tiers (assignment_id, student_id, tier_id)
            VALUES ($1, $2, $3)
            RETURNING assignment_id, student_id, tier_id, is_active, assigned_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(tier_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| insert_error("Failed to assign fee tier", "student or tier", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(assignment_id = %assignment.assignment_id, "Fee tier assigned");
        Ok(assignment)
    }

    /// Remove a student's active tier so default fees apply again.
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn clear_fee_tier(&self, student_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clear_fee_tier"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE student_fee_tiers SET is_active = FALSE WHERE student_id = $1 AND is_active",
        )
        .bind(student_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to clear fee tier", e))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Create or replace a tier override for one level of the hierarchy.
    #[instrument(skip(self), fields(tier_id = %tier_id, scope = %scope, target_id = %target_id))]
    pub async fn upsert_tier_fee(
        &self,
        tier_id: Uuid,
        scope: FeeScope,
        target_id: Uuid,
        amount: Decimal,
    ) -> Result<TierFee, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_tier_fee"])
            .start_timer();

        let (table, id_column) = scope.table();
        let target_exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            table, id_column
        ))
        .bind(target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to check fee target", e))?;

        if !target_exists {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Referenced {} does not exist",
                scope
            )));
        }

        let fee = sqlx::query_as::<_, TierFee>(
            r#"
            INSERT INTO tier_fees (tier_id, scope, target_id, amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tier_id, scope, target_id)
            DO UPDATE SET amount = EXCLUDED.amount, updated_utc = NOW()
            RETURNING tier_id, scope, target_id, amount, updated_utc
            "#,
        )
        .bind(tier_id)
        .bind(scope.as_str())
        .bind(target_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error("Failed to upsert tier fee", "tier", e))?;

        timer.observe_duration();

        info!(amount = %fee.amount, "Tier fee saved");
        Ok(fee)
    }

    #[instrument(skip(self), fields(tier_id = %tier_id, scope = %scope, target_id = %target_id))]
    pub async fn delete_tier_fee(
        &self,
        tier_id: Uuid,
        scope: FeeScope,
        target_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_tier_fee"])
            .start_timer();

        let result = sqlx::query(
            "DELETE FROM tier_fees WHERE tier_id = $1 AND scope = $2 AND target_id = $3",
        )
        .bind(tier_id)
        .bind(scope.as_str())
        .bind(target_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to delete tier fee", e))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Fee Resolution Inputs
    // -------------------------------------------------------------------------

    /// Fetch every candidate fee for one student, or for all active students.
    ///
    /// A specific student is returned whether or not they are active. The
    /// most recent active enrollment and active assignment to an active tier
    /// are used; missing levels come back as NULL.
    #[instrument(skip(self), fields(student_id = ?student_id))]
    pub async fn fee_candidates(
        &self,
        student_id: Option<Uuid>,
    ) -> Result<Vec<FeeCandidates>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fee_candidates"])
            .start_timer();

        let rows = sqlx::query_as::<_, FeeCandidates>(
            r#"
            SELECT s.student_id,
                   e.batch_id,
                   b.department_id,
                   d.course_id,
                   t.tier_id,
                   tb.amount AS tier_batch_fee,
                   td.amount AS tier_department_fee,
                   tc.amount AS tier_course_fee,
                   b.monthly_fee AS batch_fee,
                   d.monthly_fee AS department_fee,
                   c.monthly_fee AS course_fee
            FROM students s
            LEFT JOIN LATERAL (
                SELECT en.batch_id
                FROM enrollments en
                WHERE en.student_id = s.student_id AND en.is_active
                ORDER BY en.enrolled_utc DESC
                LIMIT 1
            ) e ON TRUE
            LEFT JOIN batches b ON b.batch_id = e.batch_id
            LEFT JOIN departments d ON d.department_id = b.department_id
            LEFT JOIN courses c ON c.course_id = d.course_id
            LEFT JOIN LATERAL (
                SELECT sft.tier_id
                FROM student_fee_tiers sft
                JOIN fee_tiers ft ON ft.tier_id = sft.tier_id AND ft.is_active
                WHERE sft.student_id = s.student_id AND sft.is_active
                ORDER BY sft.assigned_utc DESC
                LIMIT 1
            ) t ON TRUE
            LEFT JOIN tier_fees tb
                ON tb.tier_id = t.tier_id AND tb.scope = 'batch' AND tb.target_id = b.batch_id
            LEFT JOIN tier_fees td
                ON td.tier_id = t.tier_id AND td.scope = 'department' AND td.target_id = d.department_id
            LEFT JOIN tier_fees tc
                ON tc.tier_id = t.tier_id AND tc.scope = 'course' AND tc.target_id = c.course_id
            WHERE ($1::uuid IS NULL AND s.is_active) OR s.student_id = $1
            ORDER BY s.student_id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch fee candidates", e))?;

        timer.observe_duration();

        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    /// Insert an invoice unless one already exists for the student and period.
    ///
    /// Returns `None` when the period is already invoiced.
    #[instrument(skip(self), fields(student_id = %student_id, month = month, year = year))]
    pub async fn insert_invoice_if_absent(
        &self,
        student_id: Uuid,
        month: i32,
        year: i32,
        amount: Decimal,
        due_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_id, student_id, month, year, amount, due_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_id, month, year) DO NOTHING
            RETURNING invoice_id, student_id, month, year, amount, status, due_date, paid_utc, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(month)
        .bind(year)
        .bind(amount)
        .bind(due_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Re-price an existing UNPAID invoice. PAID invoices and matching amounts are left alone.
    #[instrument(skip(self), fields(student_id = %student_id, month = month, year = year))]
    pub async fn refresh_unpaid_invoice_amount(
        &self,
        student_id: Uuid,
        month: i32,
        year: i32,
        amount: Decimal,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["refresh_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET amount = $4, updated_utc = NOW()
            WHERE student_id = $1 AND month = $2 AND year = $3
              AND status = 'UNPAID' AND amount <> $4
            "#,
        )
        .bind(student_id)
        .bind(month)
        .bind(year)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to refresh invoice", e))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, student_id, month, year, amount, status, due_date, paid_utc, created_utc, updated_utc
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, invoice_ids), fields(count = invoice_ids.len()))]
    pub async fn get_invoices(&self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, student_id, month, year, amount, status, due_date, paid_utc, created_utc, updated_utc
            FROM invoices
            WHERE invoice_id = ANY($1)
            ORDER BY year, month, invoice_id
            "#,
        )
        .bind(invoice_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get invoices", e))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// List invoices with optional filters, paginated by invoice id.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, student_id, month, year, amount, status, due_date, paid_utc, created_utc, updated_utc
            FROM invoices
            WHERE ($1::uuid IS NULL OR student_id = $1)
              AND ($2::int IS NULL OR month = $2)
              AND ($3::int IS NULL OR year = $3)
              AND ($4::varchar IS NULL OR status = $4)
              AND ($5::uuid IS NULL OR invoice_id > $5)
            ORDER BY invoice_id
            LIMIT $6
            "#,
        )
        .bind(filter.student_id)
        .bind(filter.month)
        .bind(filter.year)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list invoices", e))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self, report), fields(month = month, year = year))]
    pub async fn record_invoice_run(
        &self,
        month: i32,
        year: i32,
        refresh_unpaid: bool,
        report: &GenerationReport,
        started_utc: DateTime<Utc>,
    ) -> Result<InvoiceRun, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_invoice_run"])
            .start_timer();

        let run = sqlx::query_as::<_, InvoiceRun>(
            r#"
            INSERT INTO invoice_runs (run_id, month, year, refresh_unpaid, created, updated, skipped, existed, failed, started_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING run_id, month, year, refresh_unpaid, created, updated, skipped, existed, failed, started_utc, completed_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(month)
        .bind(year)
        .bind(refresh_unpaid)
        .bind(report.created as i32)
        .bind(report.updated as i32)
        .bind(report.skipped as i32)
        .bind(report.existed as i32)
        .bind(report.failed as i32)
        .bind(started_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record invoice run", e))?;

        timer.observe_duration();

        Ok(run)
    }

    #[instrument(skip(self))]
    pub async fn list_invoice_runs(&self, limit: i64) -> Result<Vec<InvoiceRun>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoice_runs"])
            .start_timer();

        let runs = sqlx::query_as::<_, InvoiceRun>(
            r#"
            SELECT run_id, month, year, refresh_unpaid, created, updated, skipped, existed, failed, started_utc, completed_utc
            FROM invoice_runs
            ORDER BY started_utc DESC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list invoice runs", e))?;

        timer.observe_duration();

        Ok(runs)
    }

    // -------------------------------------------------------------------------
    // Payment Sessions
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(tran_id = %input.tran_id, student_id = %input.student_id))]
    pub async fn create_payment_session(
        &self,
        input: &CreatePaymentSession,
    ) -> Result<PaymentSession, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment_session"])
            .start_timer();

        let session = sqlx::query_as::<_, PaymentSession>(
            r#"
            INSERT INTO payment_sessions (tran_id, student_id, invoice_ids, amount, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING tran_id, student_id, invoice_ids, amount, currency, status, gateway_session_key, val_id, failure_reason, created_utc, updated_utc
            "#,
        )
        .bind(&input.tran_id)
        .bind(input.student_id)
        .bind(&input.invoice_ids)
        .bind(input.amount)
        .bind(&input.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error("Failed to create payment session", "student", e))?;

        timer.observe_duration();

        info!(amount = %session.amount, "Payment session created");
        Ok(session)
    }

    #[instrument(skip(self), fields(tran_id = %tran_id))]
    pub async fn get_payment_session(
        &self,
        tran_id: &str,
    ) -> Result<Option<PaymentSession>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment_session"])
            .start_timer();

        let session = sqlx::query_as::<_, PaymentSession>(
            r#"
            SELECT tran_id, student_id, invoice_ids, amount, currency, status, gateway_session_key, val_id, failure_reason, created_utc, updated_utc
            FROM payment_sessions
            WHERE tran_id = $1
            "#,
        )
        .bind(tran_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get payment session", e))?;

        timer.observe_duration();

        Ok(session)
    }

    #[instrument(skip(self, session_key), fields(tran_id = %tran_id))]
    pub async fn set_gateway_session_key(
        &self,
        tran_id: &str,
        session_key: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_gateway_session_key"])
            .start_timer();

        sqlx::query(
            "UPDATE payment_sessions SET gateway_session_key = $2, updated_utc = NOW() WHERE tran_id = $1",
        )
        .bind(tran_id)
        .bind(session_key)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to store gateway session key", e))?;

        timer.observe_duration();

        Ok(())
    }

    /// Move a session to `next` only if its current status allows it.
    ///
    /// Returns `None` when the session is missing or in a status from which
    /// `next` is not reachable; the row is left unchanged in that case.
    #[instrument(skip(self, reason), fields(tran_id = %tran_id, next = %next))]
    pub async fn transition_payment_session(
        &self,
        tran_id: &str,
        next: PaymentSessionStatus,
        val_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Option<PaymentSession>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_payment_session"])
            .start_timer();

        let allowed_from: Vec<&str> = PaymentSessionStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .map(|from| from.as_str())
            .collect();

        let session = sqlx::query_as::<_, PaymentSession>(
            r#"
            UPDATE payment_sessions
            SET status = $2,
                val_id = COALESCE($3, val_id),
                failure_reason = COALESCE($4, failure_reason),
                updated_utc = NOW()
            WHERE tran_id = $1 AND status = ANY($5)
            RETURNING tran_id, student_id, invoice_ids, amount, currency, status, gateway_session_key, val_id, failure_reason, created_utc, updated_utc
            "#,
        )
        .bind(tran_id)
        .bind(next.as_str())
        .bind(val_id)
        .bind(reason)
        .bind(&allowed_from)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update payment session", e))?;

        timer.observe_duration();

        if session.is_none() {
            warn!("Payment session transition rejected");
        }

        Ok(session)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn list_gateway_transactions(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<GatewayTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_gateway_transactions"])
            .start_timer();

        let records = sqlx::query_as::<_, GatewayTransaction>(
            r#"
            SELECT record_id, invoice_id, tran_id, val_id, bank_tran_id, validation_status, payment_method, amount, raw_response, created_utc
            FROM gateway_transactions
            WHERE invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list gateway transactions", e))?;

        timer.observe_duration();

        Ok(records)
    }

    // -------------------------------------------------------------------------
    // Ledger
    // -------------------------------------------------------------------------

    /// Append a ledger entry that is not tied to an invoice.
    #[instrument(skip(self, input), fields(fund = %input.fund, direction = %input.direction))]
    pub async fn insert_ledger_entry(
        &self,
        input: &CreateLedgerEntry,
    ) -> Result<LedgerEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_ledger_entry"])
            .start_timer();

        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Entry amount must be positive"
            )));
        }

        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO ledger_entries (entry_id, fund, direction, amount, category, description, entry_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING entry_id, fund, direction, amount, invoice_id, category, description, entry_date, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.fund.as_str())
        .bind(input.direction.as_str())
        .bind(input.amount)
        .bind(&input.category)
        .bind(&input.description)
        .bind(input.entry_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert ledger entry", e))?;

        timer.observe_duration();

        info!(entry_id = %entry.entry_id, amount = %entry.amount, "Ledger entry recorded");
        Ok(entry)
    }

    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn get_ledger_entry(&self, entry_id: Uuid) -> Result<Option<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_ledger_entry"])
            .start_timer();

        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT entry_id, fund, direction, amount, invoice_id, category, description, entry_date, created_utc, updated_utc
            FROM ledger_entries
            WHERE entry_id = $1
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get ledger entry", e))?;

        timer.observe_duration();

        Ok(entry)
    }

    /// List ledger entries with optional filters, paginated by entry id.
    #[instrument(skip(self, filter))]
    pub async fn list_ledger_entries(
        &self,
        filter: &ListLedgerFilter,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_ledger_entries"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT entry_id, fund, direction, amount, invoice_id, category, description, entry_date, created_utc, updated_utc
            FROM ledger_entries
            WHERE ($1::varchar IS NULL OR fund = $1)
              AND ($2::varchar IS NULL OR direction = $2)
              AND ($3::uuid IS NULL OR invoice_id = $3)
              AND ($4::date IS NULL OR entry_date >= $4)
              AND ($5::date IS NULL OR entry_date <= $5)
              AND ($6::uuid IS NULL OR entry_id > $6)
            ORDER BY entry_id
            LIMIT $7
            "#,
        )
        .bind(filter.fund.map(|f| f.as_str()))
        .bind(filter.direction.map(|d| d.as_str()))
        .bind(filter.invoice_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list ledger entries", e))?;

        timer.observe_duration();

        Ok(entries)
    }

    /// Credits, debits and net balance for every fund, including empty ones.
    #[instrument(skip(self))]
    pub async fn fund_balances(&self) -> Result<Vec<FundBalance>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fund_balances"])
            .start_timer();

        let balances = sqlx::query_as::<_, FundBalance>(
            r#"
            SELECT f.fund,
                   COALESCE(SUM(le.amount) FILTER (WHERE le.direction = 'CREDIT'), 0) AS credits,
                   COALESCE(SUM(le.amount) FILTER (WHERE le.direction = 'DEBIT'), 0) AS debits,
                   COALESCE(SUM(CASE WHEN le.direction = 'CREDIT' THEN le.amount ELSE -le.amount END), 0) AS balance
            FROM (VALUES ('MONTHLY'), ('DONATION'), ('DANA_COMMITTEE'), ('GENERAL')) AS f(fund)
            LEFT JOIN ledger_entries le ON le.fund = f.fund
            GROUP BY f.fund
            ORDER BY f.fund
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to compute fund balances", e))?;

        timer.observe_duration();

        Ok(balances)
    }

    /// Correct an expense in place. Any other entry is immutable.
    #[instrument(skip(self, correction), fields(entry_id = %entry_id))]
    pub async fn correct_expense(
        &self,
        entry_id: Uuid,
        correction: &CorrectExpense,
    ) -> Result<LedgerEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["correct_expense"])
            .start_timer();

        if matches!(correction.amount, Some(amount) if amount <= Decimal::ZERO) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Entry amount must be positive"
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let existing = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT entry_id, fund, direction, amount, invoice_id, category, description, entry_date, created_utc, updated_utc
            FROM ledger_entries
            WHERE entry_id = $1
            FOR UPDATE
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load ledger entry", e))?;

        let existing = match existing {
            Some(entry) => entry,
            None => {
                tx.rollback().await.ok();
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Ledger entry not found"
                )));
            }
        };

        if !existing.is_correctable_expense() {
            tx.rollback().await.ok();
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Only expense entries can be corrected"
            )));
        }

        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            UPDATE ledger_entries
            SET amount = COALESCE($2, amount),
                category = COALESCE($3, category),
                description = COALESCE($4, description),
                updated_utc = NOW()
            WHERE entry_id = $1
            RETURNING entry_id, fund, direction, amount, invoice_id, category, description, entry_date, created_utc, updated_utc
            "#,
        )
        .bind(entry_id)
        .bind(correction.amount)
        .bind(&correction.category)
        .bind(&correction.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to correct expense", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(
            previous_amount = %existing.amount,
            amount = %entry.amount,
            "Expense corrected"
        );

        Ok(entry)
    }
}
