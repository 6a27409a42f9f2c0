//! Postgres-backed ledger store
//!
//! Transactions run at SERIALIZABLE. `lock_booking` and `meter_ownership`
//! take row locks so concurrent moves of one booking queue behind each other;
//! a serialization failure surfaces as [`LedgerError::SerializationConflict`].

use crate::domain::commands::{CommandStatus, EnqueueOutcome, PowerCommand};
use crate::domain::meters::{
    Booking, ExtraMeter, MeterAssignment, MeterOwnership, MeterReading, MeterRecord,
};
use crate::domain::packages::Package;
use crate::domain::types::{
    BookingNumber, Kwh, MeterId, OrganizationId, PackageId, PowerState, ShutdownReason,
};
use crate::error::{LedgerError, Result};
use crate::storage::{
    ConnectionPool, LedgerStore, LedgerTransaction, MeterReadingSource, OrganizationSettings,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Decode, PgExecutor, PgPool, Postgres, Row, Transaction, Type};
use std::str::FromStr;
use tracing::debug;

const SERIALIZATION_FAILURE: &str = "40001";

fn db_error(operation: &str, e: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(SERIALIZATION_FAILURE) {
            return LedgerError::SerializationConflict {
                operation: operation.to_string(),
            };
        }
    }
    LedgerError::Database {
        operation: operation.to_string(),
        source: Box::new(e),
    }
}

fn decode_error(operation: &str, message: String) -> LedgerError {
    LedgerError::Database {
        operation: operation.to_string(),
        source: message.into(),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str, operation: &str) -> Result<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name).map_err(|e| db_error(operation, e))
}

fn parse_column<T>(row: &PgRow, name: &str, operation: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = column(row, name, operation)?;
    raw.parse().map_err(|e| decode_error(operation, e))
}

fn parse_optional_column<T>(row: &PgRow, name: &str, operation: &str) -> Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    let raw: Option<String> = column(row, name, operation)?;
    raw.map(|value| value.parse().map_err(|e| decode_error(operation, e)))
        .transpose()
}

fn booking_from_row(row: &PgRow) -> Result<Booking> {
    const OP: &str = "decode_booking";
    let meter_id: Option<String> = column(row, "meter_id", OP)?;
    let start_energy: Option<Decimal> = column(row, "meter_start_energy", OP)?;
    let start_time: Option<DateTime<Utc>> = column(row, "meter_start_time", OP)?;

    let meter = match (meter_id, start_energy, start_time) {
        (Some(meter_id), Some(start_energy), Some(start_time)) => Some(MeterAssignment {
            meter_id: MeterId::new(meter_id),
            start_energy: Kwh::from_decimal(start_energy),
            start_time,
        }),
        _ => None,
    };

    Ok(Booking {
        organization_id: OrganizationId::from_uuid(column(row, "organization_id", OP)?),
        booking_number: BookingNumber::new(column::<String>(row, "booking_number", OP)?),
        customer_kind: parse_column(row, "customer_kind", OP)?,
        meter,
    })
}

fn package_from_row(row: &PgRow) -> Result<Package> {
    const OP: &str = "decode_package";
    let start_energy: Option<Decimal> = column(row, "start_energy", OP)?;
    let duration_hours: Option<i32> = column(row, "duration_hours", OP)?;

    Ok(Package {
        id: PackageId::from_uuid(column(row, "package_id", OP)?),
        organization_id: OrganizationId::from_uuid(column(row, "organization_id", OP)?),
        booking_number: BookingNumber::new(column::<String>(row, "booking_number", OP)?),
        category: parse_column(row, "category", OP)?,
        units: Kwh::from_decimal(column(row, "units", OP)?),
        payment_method: column(row, "payment_method", OP)?,
        customer_kind: parse_column(row, "customer_kind", OP)?,
        start_energy: start_energy.map(Kwh::from_decimal),
        accumulated_usage: Kwh::from_decimal(column(row, "accumulated_usage", OP)?),
        duration_hours: duration_hours.and_then(|h| u32::try_from(h).ok()),
        status: parse_column(row, "status", OP)?,
        created_at: column(row, "created_at", OP)?,
    })
}

fn meter_from_row(row: &PgRow) -> Result<MeterRecord> {
    const OP: &str = "decode_meter";
    let owner: Option<String> = column(row, "owner_booking", OP)?;

    Ok(MeterRecord {
        organization_id: OrganizationId::from_uuid(column(row, "organization_id", OP)?),
        meter_id: MeterId::new(column::<String>(row, "meter_id", OP)?),
        owner: owner.map(BookingNumber::new),
        power_state: parse_column(row, "power_state", OP)?,
        last_shutdown_reason: parse_optional_column(row, "last_shutdown_reason", OP)?,
        updated_at: column(row, "updated_at", OP)?,
    })
}

fn extra_meter_from_row(row: &PgRow) -> Result<ExtraMeter> {
    const OP: &str = "decode_extra_meter";
    Ok(ExtraMeter {
        organization_id: OrganizationId::from_uuid(column(row, "organization_id", OP)?),
        booking_number: BookingNumber::new(column::<String>(row, "booking_number", OP)?),
        meter_id: MeterId::new(column::<String>(row, "meter_id", OP)?),
        start_energy: Kwh::from_decimal(column(row, "start_energy", OP)?),
        attached_at: column(row, "attached_at", OP)?,
    })
}

fn reading_from_row(row: &PgRow) -> Result<MeterReading> {
    const OP: &str = "decode_reading";
    Ok(MeterReading {
        meter_id: MeterId::new(column::<String>(row, "meter_id", OP)?),
        time: column(row, "time", OP)?,
        energy: Kwh::from_decimal(column(row, "energy", OP)?),
        power: column(row, "power", OP)?,
        voltage: column(row, "voltage", OP)?,
        current: column(row, "current", OP)?,
        state: parse_column(row, "state", OP)?,
        online: column(row, "online", OP)?,
    })
}

const BOOKING_COLUMNS: &str = "organization_id, booking_number, customer_kind, meter_id, \
     meter_start_energy, meter_start_time";

const PACKAGE_COLUMNS: &str = "package_id, organization_id, booking_number, category, units, \
     payment_method, customer_kind, start_energy, accumulated_usage, duration_hours, status, \
     created_at";

async fn fetch_booking<'e>(
    executor: impl PgExecutor<'e>,
    org: &OrganizationId,
    booking: &BookingNumber,
    for_update: bool,
) -> Result<Option<Booking>> {
    let operation = if for_update { "lock_booking" } else { "get_booking" };
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings \
         WHERE organization_id = $1 AND booking_number = $2{}",
        if for_update { " FOR UPDATE" } else { "" }
    );

    sqlx::query(&sql)
        .bind(org.as_uuid())
        .bind(booking.as_str())
        .fetch_optional(executor)
        .await
        .map_err(|e| db_error(operation, e))?
        .as_ref()
        .map(booking_from_row)
        .transpose()
}

async fn fetch_packages<'e>(
    executor: impl PgExecutor<'e>,
    org: &OrganizationId,
    booking: &BookingNumber,
) -> Result<Vec<Package>> {
    let sql = format!(
        "SELECT {PACKAGE_COLUMNS} FROM packages \
         WHERE organization_id = $1 AND booking_number = $2 \
         ORDER BY created_at, package_id"
    );

    sqlx::query(&sql)
        .bind(org.as_uuid())
        .bind(booking.as_str())
        .fetch_all(executor)
        .await
        .map_err(|e| db_error("list_packages", e))?
        .iter()
        .map(package_from_row)
        .collect()
}

async fn fetch_extra_meters<'e>(
    executor: impl PgExecutor<'e>,
    org: &OrganizationId,
    booking: &BookingNumber,
) -> Result<Vec<ExtraMeter>> {
    sqlx::query(
        r#"
        SELECT organization_id, booking_number, meter_id, start_energy, attached_at
        FROM extra_meters
        WHERE organization_id = $1 AND booking_number = $2
        ORDER BY attached_at, meter_id
        "#,
    )
    .bind(org.as_uuid())
    .bind(booking.as_str())
    .fetch_all(executor)
    .await
    .map_err(|e| db_error("list_extra_meters", e))?
    .iter()
    .map(extra_meter_from_row)
    .collect()
}

async fn fetch_ownership<'e>(
    executor: impl PgExecutor<'e>,
    org: &OrganizationId,
    meter: &MeterId,
    for_update: bool,
) -> Result<Option<MeterOwnership>> {
    let operation = if for_update { "lock_meter" } else { "meter_ownership" };
    let sql = format!(
        r#"
        SELECT m.owner_booking,
               (SELECT e.booking_number FROM extra_meters e
                 WHERE e.organization_id = m.organization_id
                   AND e.meter_id = m.meter_id) AS extra_booking
        FROM meters m
        WHERE m.organization_id = $1 AND m.meter_id = $2
        {}
        "#,
        if for_update { "FOR UPDATE" } else { "" }
    );

    let Some(row) = sqlx::query(&sql)
        .bind(org.as_uuid())
        .bind(meter.as_str())
        .fetch_optional(executor)
        .await
        .map_err(|e| db_error(operation, e))?
    else {
        return Ok(None);
    };

    let extra: Option<String> = column(&row, "extra_booking", operation)?;
    let owner: Option<String> = column(&row, "owner_booking", operation)?;

    Ok(match (extra, owner) {
        (Some(booking), _) => Some(MeterOwnership::Extra(BookingNumber::new(booking))),
        (None, Some(booking)) => Some(MeterOwnership::Primary(BookingNumber::new(booking))),
        (None, None) => None,
    })
}

/// Ensures a registry row exists so it can be locked and updated.
async fn ensure_meter<'e>(
    executor: impl PgExecutor<'e>,
    org: &OrganizationId,
    meter: &MeterId,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO meters (organization_id, meter_id)
        VALUES ($1, $2)
        ON CONFLICT (organization_id, meter_id) DO NOTHING
        "#,
    )
    .bind(org.as_uuid())
    .bind(meter.as_str())
    .execute(executor)
    .await
    .map_err(|e| db_error("ensure_meter", e))?;
    Ok(())
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(connection: &ConnectionPool) -> Self {
        Self {
            pool: connection.pool().clone(),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("begin", e))?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn get_booking(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Option<Booking>> {
        fetch_booking(&self.pool, org, booking, false).await
    }

    async fn list_packages(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<Package>> {
        fetch_packages(&self.pool, org, booking).await
    }

    async fn list_extra_meters(
        &self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<ExtraMeter>> {
        fetch_extra_meters(&self.pool, org, booking).await
    }

    async fn get_meter(&self, org: &OrganizationId, meter: &MeterId) -> Result<Option<MeterRecord>> {
        sqlx::query(
            r#"
            SELECT organization_id, meter_id, owner_booking, power_state,
                   last_shutdown_reason, updated_at
            FROM meters
            WHERE organization_id = $1 AND meter_id = $2
            "#,
        )
        .bind(org.as_uuid())
        .bind(meter.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get_meter", e))?
        .as_ref()
        .map(meter_from_row)
        .transpose()
    }

    async fn meter_ownership(
        &self,
        org: &OrganizationId,
        meter: &MeterId,
    ) -> Result<Option<MeterOwnership>> {
        fetch_ownership(&self.pool, org, meter, false).await
    }

    async fn list_powered_meters(&self) -> Result<Vec<MeterRecord>> {
        sqlx::query(
            r#"
            SELECT organization_id, meter_id, owner_booking, power_state,
                   last_shutdown_reason, updated_at
            FROM meters
            WHERE power_state = 'ON'
            ORDER BY organization_id, meter_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list_powered_meters", e))?
        .iter()
        .map(meter_from_row)
        .collect()
    }

    async fn settings(&self, org: &OrganizationId) -> Result<Option<OrganizationSettings>> {
        const OP: &str = "get_settings";
        let row = sqlx::query(
            r#"
            SELECT basis_price_per_unit, low_balance_threshold
            FROM organization_settings
            WHERE organization_id = $1
            "#,
        )
        .bind(org.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(OP, e))?;

        row.map(|row| -> Result<OrganizationSettings> {
            Ok(OrganizationSettings {
                basis_price_per_unit: column(&row, "basis_price_per_unit", OP)?,
                low_balance_threshold: Kwh::from_decimal(column(
                    &row,
                    "low_balance_threshold",
                    OP,
                )?),
            })
        })
        .transpose()
    }
}

pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_booking(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Option<Booking>> {
        fetch_booking(&mut *self.tx, org, booking, true).await
    }

    async fn upsert_booking(&mut self, booking: &Booking) -> Result<()> {
        let meter = booking.meter.as_ref();
        sqlx::query(
            r#"
            INSERT INTO bookings (organization_id, booking_number, customer_kind,
                                  meter_id, meter_start_energy, meter_start_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (organization_id, booking_number) DO UPDATE
               SET customer_kind = EXCLUDED.customer_kind,
                   meter_id = EXCLUDED.meter_id,
                   meter_start_energy = EXCLUDED.meter_start_energy,
                   meter_start_time = EXCLUDED.meter_start_time,
                   updated_at = NOW()
            "#,
        )
        .bind(booking.organization_id.as_uuid())
        .bind(booking.booking_number.as_str())
        .bind(booking.customer_kind.as_str())
        .bind(meter.map(|m| m.meter_id.as_str()))
        .bind(meter.map(|m| m.start_energy.as_decimal()))
        .bind(meter.map(|m| m.start_time))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("upsert_booking", e))?;
        Ok(())
    }

    async fn set_booking_meter(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
        assignment: Option<&MeterAssignment>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
               SET meter_id = $3, meter_start_energy = $4, meter_start_time = $5,
                   updated_at = NOW()
             WHERE organization_id = $1 AND booking_number = $2
            "#,
        )
        .bind(org.as_uuid())
        .bind(booking.as_str())
        .bind(assignment.map(|m| m.meter_id.as_str()))
        .bind(assignment.map(|m| m.start_energy.as_decimal()))
        .bind(assignment.map(|m| m.start_time))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("set_booking_meter", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::BookingNotFound {
                booking: booking.clone(),
            });
        }
        Ok(())
    }

    async fn packages(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<Package>> {
        fetch_packages(&mut *self.tx, org, booking).await
    }

    async fn insert_package(&mut self, package: &Package) -> Result<()> {
        let duration_hours = package
            .duration_hours
            .map(i32::try_from)
            .transpose()
            .map_err(|_| {
                LedgerError::validation(
                    "duration_hours",
                    format!("duration {:?} does not fit the store", package.duration_hours),
                )
            })?;

        sqlx::query(
            r#"
            INSERT INTO packages (package_id, organization_id, booking_number, category, units,
                                  payment_method, customer_kind, start_energy, accumulated_usage,
                                  duration_hours, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(package.id.as_uuid())
        .bind(package.organization_id.as_uuid())
        .bind(package.booking_number.as_str())
        .bind(package.category.as_str())
        .bind(package.units.as_decimal())
        .bind(&package.payment_method)
        .bind(package.customer_kind.as_str())
        .bind(package.start_energy.map(|e| e.as_decimal()))
        .bind(package.accumulated_usage.as_decimal())
        .bind(duration_hours)
        .bind(package.status.as_str())
        .bind(package.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("insert_package", e))?;
        Ok(())
    }

    async fn update_package_carry_over(
        &mut self,
        id: &PackageId,
        accumulated_usage: Kwh,
        start_energy: Option<Kwh>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE packages
               SET accumulated_usage = $2, start_energy = $3
             WHERE package_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(accumulated_usage.as_decimal())
        .bind(start_energy.map(|e| e.as_decimal()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update_package_carry_over", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::validation(
                "package_id",
                format!("package {id} does not exist"),
            ));
        }
        Ok(())
    }

    async fn delete_packages(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM packages WHERE organization_id = $1 AND booking_number = $2",
        )
        .bind(org.as_uuid())
        .bind(booking.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("delete_packages", e))?;
        Ok(result.rows_affected())
    }

    async fn meter_ownership(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
    ) -> Result<Option<MeterOwnership>> {
        ensure_meter(&mut *self.tx, org, meter).await?;
        fetch_ownership(&mut *self.tx, org, meter, true).await
    }

    async fn set_meter_owner(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
        owner: Option<&BookingNumber>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meters (organization_id, meter_id, owner_booking)
            VALUES ($1, $2, $3)
            ON CONFLICT (organization_id, meter_id) DO UPDATE
               SET owner_booking = EXCLUDED.owner_booking, updated_at = NOW()
            "#,
        )
        .bind(org.as_uuid())
        .bind(meter.as_str())
        .bind(owner.map(|b| b.as_str()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("set_meter_owner", e))?;
        Ok(())
    }

    async fn extra_meters(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
    ) -> Result<Vec<ExtraMeter>> {
        fetch_extra_meters(&mut *self.tx, org, booking).await
    }

    async fn insert_extra_meter(&mut self, extra: &ExtraMeter) -> Result<()> {
        ensure_meter(&mut *self.tx, &extra.organization_id, &extra.meter_id).await?;
        sqlx::query(
            r#"
            INSERT INTO extra_meters (organization_id, meter_id, booking_number,
                                      start_energy, attached_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(extra.organization_id.as_uuid())
        .bind(extra.meter_id.as_str())
        .bind(extra.booking_number.as_str())
        .bind(extra.start_energy.as_decimal())
        .bind(extra.attached_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("insert_extra_meter", e))?;
        Ok(())
    }

    async fn delete_extra_meter(
        &mut self,
        org: &OrganizationId,
        booking: &BookingNumber,
        meter: &MeterId,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM extra_meters
             WHERE organization_id = $1 AND booking_number = $2 AND meter_id = $3
            "#,
        )
        .bind(org.as_uuid())
        .bind(booking.as_str())
        .bind(meter.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("delete_extra_meter", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn enqueue_command(&mut self, command: &PowerCommand) -> Result<EnqueueOutcome> {
        let already_pending: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM meter_commands
                 WHERE organization_id = $1 AND meter_id = $2
                   AND status = $3 AND command = $4 AND value = $5
            )
            "#,
        )
        .bind(command.organization_id.as_uuid())
        .bind(command.meter_id.as_str())
        .bind(CommandStatus::Pending.to_string())
        .bind(&command.command)
        .bind(command.value.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("enqueue_command", e))?;

        if already_pending {
            return Ok(EnqueueOutcome::AlreadyPending);
        }

        let superseded = sqlx::query(
            r#"
            UPDATE meter_commands SET status = $3
             WHERE organization_id = $1 AND meter_id = $2 AND status = $4
            "#,
        )
        .bind(command.organization_id.as_uuid())
        .bind(command.meter_id.as_str())
        .bind(CommandStatus::Superseded.to_string())
        .bind(CommandStatus::Pending.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("enqueue_command", e))?
        .rows_affected();

        if superseded > 0 {
            debug!(meter = %command.meter_id, superseded, "superseded pending commands");
        }

        sqlx::query(
            r#"
            INSERT INTO meter_commands (organization_id, meter_id, command, value, reason,
                                        status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(command.organization_id.as_uuid())
        .bind(command.meter_id.as_str())
        .bind(&command.command)
        .bind(command.value.as_str())
        .bind(command.reason.map(|r| r.as_str()))
        .bind(CommandStatus::Pending.to_string())
        .bind(command.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("enqueue_command", e))?;

        Ok(EnqueueOutcome::Enqueued)
    }

    async fn set_power_state(
        &mut self,
        org: &OrganizationId,
        meter: &MeterId,
        state: PowerState,
        reason: Option<ShutdownReason>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meters (organization_id, meter_id, power_state, last_shutdown_reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (organization_id, meter_id) DO UPDATE
               SET power_state = EXCLUDED.power_state,
                   last_shutdown_reason = EXCLUDED.last_shutdown_reason,
                   updated_at = NOW()
            "#,
        )
        .bind(org.as_uuid())
        .bind(meter.as_str())
        .bind(state.as_str())
        .bind(reason.map(|r| r.as_str()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("set_power_state", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(|e| db_error("commit", e))
    }
}

/// Telemetry read from the `meter_readings` table the device layer writes
#[derive(Clone)]
pub struct PgReadingSource {
    pool: PgPool,
}

impl PgReadingSource {
    pub fn new(connection: &ConnectionPool) -> Self {
        Self {
            pool: connection.pool().clone(),
        }
    }
}

const READING_COLUMNS: &str = "meter_id, time, energy, power, voltage, current, state, online";

#[async_trait]
impl MeterReadingSource for PgReadingSource {
    async fn latest(&self, meter_id: &MeterId) -> Result<Option<MeterReading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM meter_readings \
             WHERE meter_id = $1 ORDER BY time DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(meter_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("latest_reading", e))?
            .as_ref()
            .map(reading_from_row)
            .transpose()
    }

    async fn history(
        &self,
        meter_id: &MeterId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MeterReading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM meter_readings \
             WHERE meter_id = $1 AND time >= $2 AND time <= $3 ORDER BY time"
        );
        sqlx::query(&sql)
            .bind(meter_id.as_str())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("reading_history", e))?
            .iter()
            .map(reading_from_row)
            .collect()
    }
}
