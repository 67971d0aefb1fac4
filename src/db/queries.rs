//! SQL for every record the service reads or writes.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::{info, instrument};
use validator::Validate;

use super::{from_epoch, to_epoch, Database};
use crate::access;
use crate::audit::{self, AuditEntry, AuditEvent};
use crate::error::{AppError, AppResult};
use crate::models::{
    Campaign, CsvExport, HistoryOfPresentIllness, ImportMode, ImportSummary, Instance,
    InventoryEntry, Message, NewCampaign, NewEncounter, NewInventoryEntry, NewMessage, NewPatient,
    NewUser, Page, Patient, PatientEncounter, Role, SexAssignedAtBirth, StockChange, TimeWindow,
    Treatment, Units, User, Vitals,
};

// ===== Audit chain =====

/// Read the newest link and insert the next one on an open transaction.
async fn link_audit_entry(
    conn: &mut SqliteConnection,
    event: &AuditEvent<'_>,
    timestamp: DateTime<Utc>,
) -> Result<(i64, Option<String>, String), sqlx::Error> {
    let previous_hash: Option<String> = sqlx::query_scalar(
        "SELECT hash FROM audit_entries WHERE campaign_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(event.campaign_id)
    .fetch_optional(&mut *conn)
    .await?;

    let hash = audit::chain_hash(
        previous_hash.as_deref(),
        timestamp,
        event.action,
        event.username,
        event.campaign_id,
    );

    let id = sqlx::query(
        "INSERT INTO audit_entries (campaign_id, action, username, timestamp, previous_hash, hash)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(event.campaign_id)
    .bind(event.action)
    .bind(event.username)
    .bind(to_epoch(timestamp))
    .bind(&previous_hash)
    .bind(&hash)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok((id, previous_hash, hash))
}

// ===== Formulary rows =====

async fn insert_inventory_entry(
    conn: &mut SqliteConnection,
    campaign_id: i64,
    entry: &NewInventoryEntry,
    now: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    Ok(sqlx::query(
        "INSERT INTO inventory_entries (
            campaign_id, category, medication, form, strength, count, quantity,
            initial_quantity, item_number, box_number, expiration_date, manufacturer, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(campaign_id)
    .bind(&entry.category)
    .bind(entry.medication.trim())
    .bind(entry.form.trim())
    .bind(&entry.strength)
    .bind(entry.count)
    .bind(entry.quantity)
    .bind(entry.initial_quantity())
    .bind(&entry.item_number)
    .bind(&entry.box_number)
    .bind(entry.expiration_date)
    .bind(&entry.manufacturer)
    .bind(to_epoch(now))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid())
}

async fn store_stock_levels(
    conn: &mut SqliteConnection,
    entry: &InventoryEntry,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE inventory_entries SET quantity = ?, initial_quantity = ?, updated_at = ? WHERE id = ?",
    )
    .bind(entry.quantity)
    .bind(entry.initial_quantity)
    .bind(to_epoch(now))
    .bind(entry.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ===== Row mapping =====

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn campaign_from_row(row: &SqliteRow) -> Result<Campaign, sqlx::Error> {
    let units: String = row.try_get("units")?;
    Ok(Campaign {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        units: Units::from_code(&units)
            .ok_or_else(|| decode_error(format!("unknown units code '{}'", units)))?,
        telehealth: row.try_get("telehealth")?,
        encounter_close_days: row.try_get("encounter_close_days")?,
        country: row.try_get("country")?,
        timezone: row.try_get("timezone")?,
        instance_id: row.try_get("instance_id")?,
    })
}

fn patient_from_row(row: &SqliteRow) -> Result<Patient, sqlx::Error> {
    let sex: String = row.try_get("sex_assigned_at_birth")?;
    Ok(Patient {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        middle_name: row.try_get("middle_name")?,
        last_name: row.try_get("last_name")?,
        sex_assigned_at_birth: SexAssignedAtBirth::from_code(&sex)
            .ok_or_else(|| decode_error(format!("unknown sex code '{}'", sex)))?,
        date_of_birth: row.try_get("date_of_birth")?,
        age: row.try_get("age")?,
        phone_number: row.try_get("phone_number")?,
        email_address: row.try_get("email_address")?,
        city: row.try_get("city")?,
        timestamp: from_epoch(row.try_get("timestamp")?)?,
    })
}

fn encounter_from_row(row: &SqliteRow) -> Result<PatientEncounter, sqlx::Error> {
    Ok(PatientEncounter {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        campaign_id: row.try_get("campaign_id")?,
        body_height_primary: row.try_get("body_height_primary")?,
        body_height_secondary: row.try_get("body_height_secondary")?,
        body_weight: row.try_get("body_weight")?,
        body_mass_index: row.try_get("body_mass_index")?,
        smoking: row.try_get("smoking")?,
        history_of_diabetes: row.try_get("history_of_diabetes")?,
        history_of_hypertension: row.try_get("history_of_hypertension")?,
        history_of_high_cholesterol: row.try_get("history_of_high_cholesterol")?,
        alcohol: row.try_get("alcohol")?,
        patient_history: row.try_get("patient_history")?,
        community_health_worker_notes: row.try_get("community_health_worker_notes")?,
        procedure: row.try_get("procedure")?,
        pharmacy_notes: row.try_get("pharmacy_notes")?,
        medical_history: row.try_get("medical_history")?,
        social_history: row.try_get("social_history")?,
        current_medications: row.try_get("current_medications")?,
        family_history: row.try_get("family_history")?,
        active: row.try_get("active")?,
        timestamp: from_epoch(row.try_get("timestamp")?)?,
    })
}

fn vitals_from_row(row: &SqliteRow) -> Result<Vitals, sqlx::Error> {
    Ok(Vitals {
        id: row.try_get("id")?,
        encounter_id: row.try_get("encounter_id")?,
        systolic_blood_pressure: row.try_get("systolic_blood_pressure")?,
        diastolic_blood_pressure: row.try_get("diastolic_blood_pressure")?,
        mean_arterial_pressure: row.try_get("mean_arterial_pressure")?,
        heart_rate: row.try_get("heart_rate")?,
        respiratory_rate: row.try_get("respiratory_rate")?,
        body_temperature: row.try_get("body_temperature")?,
        oxygen_concentration: row.try_get("oxygen_concentration")?,
        glucose_level: row.try_get("glucose_level")?,
        timestamp: from_epoch(row.try_get("timestamp")?)?,
    })
}

fn csv_export_from_row(row: &SqliteRow) -> Result<CsvExport, sqlx::Error> {
    Ok(CsvExport {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        campaign_id: row.try_get("campaign_id")?,
        file_name: row.try_get("file_name")?,
        created_at: from_epoch(row.try_get("created_at")?)?,
    })
}

fn inventory_entry_from_row(row: &SqliteRow) -> Result<InventoryEntry, sqlx::Error> {
    Ok(InventoryEntry {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        category: row.try_get("category")?,
        medication: row.try_get("medication")?,
        form: row.try_get("form")?,
        strength: row.try_get("strength")?,
        count: row.try_get("count")?,
        quantity: row.try_get("quantity")?,
        initial_quantity: row.try_get("initial_quantity")?,
        item_number: row.try_get("item_number")?,
        box_number: row.try_get("box_number")?,
        expiration_date: row.try_get("expiration_date")?,
        manufacturer: row.try_get("manufacturer")?,
        updated_at: from_epoch(row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: row.try_get("id")?,
        subject: row.try_get("subject")?,
        content: row.try_get("content")?,
        sender_id: row.try_get("sender_id")?,
        recipient_id: row.try_get("recipient_id")?,
        read: row.try_get("read")?,
        created_at: from_epoch(row.try_get("created_at")?)?,
    })
}

fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditEntry, sqlx::Error> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        action: row.try_get("action")?,
        username: row.try_get("username")?,
        timestamp: from_epoch(row.try_get("timestamp")?)?,
        previous_hash: row.try_get("previous_hash")?,
        hash: row.try_get("hash")?,
    })
}

impl Database {
    // ===== Tenancy =====

    #[instrument(skip(self))]
    pub async fn create_instance(&self, name: &str) -> AppResult<Instance> {
        let id = sqlx::query("INSERT INTO instances (name, active) VALUES (?, 1)")
            .bind(name)
            .execute(self.pool())
            .await?
            .last_insert_rowid();
        Ok(Instance {
            id,
            name: name.to_string(),
            active: true,
        })
    }

    #[instrument(skip(self, campaign), fields(name = %campaign.name))]
    pub async fn create_campaign(&self, campaign: &NewCampaign) -> AppResult<Campaign> {
        let id = sqlx::query(
            "INSERT INTO campaigns (
                name, active, units, telehealth, encounter_close_days,
                country, timezone, instance_id
            ) VALUES (?, 1, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.name)
        .bind(campaign.units.code())
        .bind(campaign.telehealth)
        .bind(campaign.encounter_close_days)
        .bind(&campaign.country)
        .bind(&campaign.timezone)
        .bind(campaign.instance_id)
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        self.get_campaign(id).await
    }

    pub async fn get_campaign(&self, id: i64) -> AppResult<Campaign> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("campaign {}", id)))?;
        Ok(campaign_from_row(&row)?)
    }

    pub async fn list_campaigns(&self) -> AppResult<Vec<Campaign>> {
        let rows = sqlx::query("SELECT * FROM campaigns ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .iter()
            .map(campaign_from_row)
            .collect::<Result<_, _>>()?)
    }

    pub async fn set_campaign_active(&self, id: i64, active: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE campaigns SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("campaign {}", id)));
        }
        Ok(())
    }

    // ===== Users =====

    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn create_user(&self, user: &NewUser) -> AppResult<User> {
        let password_hash = access::hash_password(&user.password)?;
        let mut tx = self.pool().begin().await?;

        let id = sqlx::query(
            "INSERT INTO users (username, email, password_hash, active, created_at)
             VALUES (?, ?, ?, 1, ?)",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&password_hash)
        .bind(to_epoch(Utc::now()))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for role in &user.roles {
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
                .bind(id)
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }

        for campaign_id in &user.campaigns {
            sqlx::query("INSERT OR IGNORE INTO user_campaigns (user_id, campaign_id) VALUES (?, ?)")
                .bind(id)
                .bind(campaign_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(user_id = id, "user created");
        self.get_user(id).await
    }

    async fn roles_for(&self, user_id: i64) -> AppResult<Vec<Role>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = ? ORDER BY role")
                .bind(user_id)
                .fetch_all(self.pool())
                .await?;
        names.iter().map(|name| name.parse::<Role>()).collect()
    }

    async fn user_from_row(&self, row: &SqliteRow) -> AppResult<User> {
        let id: i64 = row.try_get("id")?;
        Ok(User {
            id,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            active: row.try_get("active")?,
            roles: self.roles_for(id).await?,
        })
    }

    pub async fn get_user(&self, id: i64) -> AppResult<User> {
        let row = sqlx::query("SELECT id, username, email, active FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))?;
        self.user_from_row(&row).await
    }

    /// The user with this username and their stored password hash.
    pub async fn find_user_by_username(&self, username: &str) -> AppResult<Option<(User, String)>> {
        let row = sqlx::query(
            "SELECT id, username, email, active, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some(row) => {
                let hash: String = row.try_get("password_hash")?;
                Ok(Some((self.user_from_row(&row).await?, hash)))
            }
            None => Ok(None),
        }
    }

    pub async fn user_in_campaign(&self, user_id: i64, campaign_id: i64) -> AppResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM user_campaigns WHERE user_id = ? AND campaign_id = ?",
        )
        .bind(user_id)
        .bind(campaign_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    // ===== Patients =====

    /// Validate and insert a patient, linking it to `campaign_id`.
    ///
    /// Age is derived from the date of birth as of `timestamp`.
    #[instrument(skip(self, patient, timestamp))]
    pub async fn create_patient(
        &self,
        patient: &NewPatient,
        campaign_id: i64,
        timestamp: DateTime<Utc>,
    ) -> AppResult<Patient> {
        let age = patient.checked_age(timestamp.date_naive())?;
        let mut tx = self.pool().begin().await?;

        let id = sqlx::query(
            "INSERT INTO patients (
                first_name, middle_name, last_name, sex_assigned_at_birth,
                date_of_birth, age, phone_number, email_address, city, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&patient.first_name)
        .bind(&patient.middle_name)
        .bind(&patient.last_name)
        .bind(patient.sex_assigned_at_birth.code())
        .bind(patient.date_of_birth)
        .bind(age)
        .bind(&patient.phone_number)
        .bind(&patient.email_address)
        .bind(&patient.city)
        .bind(to_epoch(timestamp))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("INSERT INTO campaign_patients (campaign_id, patient_id) VALUES (?, ?)")
            .bind(campaign_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(patient_id = id, "patient created");
        self.get_patient(id).await
    }

    pub async fn get_patient(&self, id: i64) -> AppResult<Patient> {
        let row = sqlx::query("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("patient {}", id)))?;
        Ok(patient_from_row(&row)?)
    }

    /// Add an existing patient to another campaign.
    pub async fn add_patient_to_campaign(&self, patient_id: i64, campaign_id: i64) -> AppResult<()> {
        sqlx::query("INSERT OR IGNORE INTO campaign_patients (campaign_id, patient_id) VALUES (?, ?)")
            .bind(campaign_id)
            .bind(patient_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn patient_in_campaign(&self, patient_id: i64, campaign_id: i64) -> AppResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM campaign_patients WHERE patient_id = ? AND campaign_id = ?",
        )
        .bind(patient_id)
        .bind(campaign_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    /// Patients of a campaign in id order.
    ///
    /// With a window, only patients created inside it or with at least one
    /// encounter inside it are returned, each once. Both window ends are
    /// inclusive at second precision.
    #[instrument(skip(self))]
    pub async fn patients_for_export(
        &self,
        campaign_id: i64,
        window: Option<TimeWindow>,
    ) -> AppResult<Vec<Patient>> {
        let rows = match window {
            None => {
                sqlx::query(
                    "SELECT p.* FROM patients p
                     JOIN campaign_patients cp ON cp.patient_id = p.id
                     WHERE cp.campaign_id = ?
                     ORDER BY p.id",
                )
                .bind(campaign_id)
                .fetch_all(self.pool())
                .await?
            }
            Some(window) => {
                let (from, to) = (to_epoch(window.from), to_epoch(window.to));
                sqlx::query(
                    "SELECT p.* FROM patients p
                     JOIN campaign_patients cp ON cp.patient_id = p.id
                     WHERE cp.campaign_id = ?
                       AND ((p.timestamp >= ? AND p.timestamp <= ?)
                            OR EXISTS (
                                SELECT 1 FROM patient_encounters e
                                WHERE e.patient_id = p.id
                                  AND e.timestamp >= ? AND e.timestamp <= ?))
                     ORDER BY p.id",
                )
                .bind(campaign_id)
                .bind(from)
                .bind(to)
                .bind(from)
                .bind(to)
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(rows
            .iter()
            .map(patient_from_row)
            .collect::<Result<_, _>>()?)
    }

    // ===== Encounters =====

    /// Insert an encounter with its vitals, treatments and histories.
    ///
    /// `encounter` must already be in metric form.
    #[instrument(skip(self, encounter, timestamp))]
    pub async fn create_encounter(
        &self,
        patient_id: i64,
        campaign_id: i64,
        prescriber_id: i64,
        encounter: &NewEncounter,
        timestamp: DateTime<Utc>,
    ) -> AppResult<PatientEncounter> {
        let now = to_epoch(timestamp);
        let mut tx = self.pool().begin().await?;

        let encounter_id = sqlx::query(
            "INSERT INTO patient_encounters (
                patient_id, campaign_id, body_height_primary, body_height_secondary,
                body_weight, body_mass_index, smoking, history_of_diabetes,
                history_of_hypertension, history_of_high_cholesterol, alcohol,
                patient_history, community_health_worker_notes, procedure,
                pharmacy_notes, medical_history, social_history,
                current_medications, family_history, active, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(patient_id)
        .bind(campaign_id)
        .bind(encounter.body_height_primary)
        .bind(encounter.body_height_secondary)
        .bind(encounter.body_weight)
        .bind(encounter.body_mass_index)
        .bind(encounter.smoking)
        .bind(encounter.history_of_diabetes)
        .bind(encounter.history_of_hypertension)
        .bind(encounter.history_of_high_cholesterol)
        .bind(encounter.alcohol)
        .bind(&encounter.patient_history)
        .bind(&encounter.community_health_worker_notes)
        .bind(&encounter.procedure)
        .bind(&encounter.pharmacy_notes)
        .bind(&encounter.medical_history)
        .bind(&encounter.social_history)
        .bind(&encounter.current_medications)
        .bind(&encounter.family_history)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for vitals in &encounter.vitals {
            sqlx::query(
                "INSERT INTO vitals (
                    encounter_id, systolic_blood_pressure, diastolic_blood_pressure,
                    mean_arterial_pressure, heart_rate, respiratory_rate,
                    body_temperature, oxygen_concentration, glucose_level, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(encounter_id)
            .bind(vitals.systolic_blood_pressure)
            .bind(vitals.diastolic_blood_pressure)
            .bind(vitals.mean_arterial_pressure)
            .bind(vitals.heart_rate)
            .bind(vitals.respiratory_rate)
            .bind(vitals.body_temperature)
            .bind(vitals.oxygen_concentration)
            .bind(vitals.glucose_level)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for treatment in &encounter.treatments {
            let treatment_id = sqlx::query(
                "INSERT INTO treatments (
                    encounter_id, diagnosis, administration_schedule, days,
                    prescriber_id, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(encounter_id)
            .bind(&treatment.diagnosis)
            .bind(&treatment.administration_schedule)
            .bind(treatment.days)
            .bind(prescriber_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for medication in &treatment.medications {
                sqlx::query(
                    "INSERT INTO treatment_medications (treatment_id, medication) VALUES (?, ?)",
                )
                .bind(treatment_id)
                .bind(medication)
                .execute(&mut *tx)
                .await?;
            }
        }

        for history in &encounter.histories {
            let hpi_id = sqlx::query(
                "INSERT INTO histories_of_present_illness (
                    encounter_id, chief_complaint, onset, provokes, palliates,
                    quality, radiation, severity, time_of_day, narrative,
                    physical_examination
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(encounter_id)
            .bind(&history.chief_complaint)
            .bind(&history.onset)
            .bind(&history.provokes)
            .bind(&history.palliates)
            .bind(&history.quality)
            .bind(&history.radiation)
            .bind(&history.severity)
            .bind(&history.time_of_day)
            .bind(&history.narrative)
            .bind(&history.physical_examination)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for test in &history.tests_ordered {
                sqlx::query("INSERT INTO hpi_tests (hpi_id, test) VALUES (?, ?)")
                    .bind(hpi_id)
                    .bind(test)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        info!(encounter_id, "encounter created");
        self.get_encounter(encounter_id).await
    }

    pub async fn get_encounter(&self, id: i64) -> AppResult<PatientEncounter> {
        let row = sqlx::query("SELECT * FROM patient_encounters WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("encounter {}", id)))?;
        Ok(encounter_from_row(&row)?)
    }

    /// A patient's encounters in insertion order.
    pub async fn encounters_for_patient(&self, patient_id: i64) -> AppResult<Vec<PatientEncounter>> {
        let rows = sqlx::query("SELECT * FROM patient_encounters WHERE patient_id = ? ORDER BY id")
            .bind(patient_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .iter()
            .map(encounter_from_row)
            .collect::<Result<_, _>>()?)
    }

    pub async fn vitals_for_encounter(&self, encounter_id: i64) -> AppResult<Vec<Vitals>> {
        let rows = sqlx::query("SELECT * FROM vitals WHERE encounter_id = ? ORDER BY id")
            .bind(encounter_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(vitals_from_row).collect::<Result<_, _>>()?)
    }

    pub async fn treatments_for_encounter(&self, encounter_id: i64) -> AppResult<Vec<Treatment>> {
        let rows = sqlx::query(
            "SELECT t.*, u.username AS prescriber FROM treatments t
             JOIN users u ON u.id = t.prescriber_id
             WHERE t.encounter_id = ?
             ORDER BY t.id",
        )
        .bind(encounter_id)
        .fetch_all(self.pool())
        .await?;

        let medication_rows = sqlx::query(
            "SELECT m.treatment_id, m.medication FROM treatment_medications m
             JOIN treatments t ON t.id = m.treatment_id
             WHERE t.encounter_id = ?
             ORDER BY m.id",
        )
        .bind(encounter_id)
        .fetch_all(self.pool())
        .await?;

        let mut medications: HashMap<i64, Vec<String>> = HashMap::new();
        for row in &medication_rows {
            medications
                .entry(row.try_get("treatment_id")?)
                .or_default()
                .push(row.try_get("medication")?);
        }

        let mut treatments = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            treatments.push(Treatment {
                id,
                encounter_id: row.try_get("encounter_id")?,
                diagnosis: row.try_get("diagnosis")?,
                medications: medications.remove(&id).unwrap_or_default(),
                administration_schedule: row.try_get("administration_schedule")?,
                days: row.try_get("days")?,
                prescriber: row.try_get("prescriber")?,
                timestamp: from_epoch(row.try_get("timestamp")?)?,
            });
        }
        Ok(treatments)
    }

    pub async fn histories_for_encounter(
        &self,
        encounter_id: i64,
    ) -> AppResult<Vec<HistoryOfPresentIllness>> {
        let rows = sqlx::query(
            "SELECT * FROM histories_of_present_illness WHERE encounter_id = ? ORDER BY id",
        )
        .bind(encounter_id)
        .fetch_all(self.pool())
        .await?;

        let test_rows = sqlx::query(
            "SELECT t.hpi_id, t.test FROM hpi_tests t
             JOIN histories_of_present_illness h ON h.id = t.hpi_id
             WHERE h.encounter_id = ?
             ORDER BY t.id",
        )
        .bind(encounter_id)
        .fetch_all(self.pool())
        .await?;

        let mut tests: HashMap<i64, Vec<String>> = HashMap::new();
        for row in &test_rows {
            tests
                .entry(row.try_get("hpi_id")?)
                .or_default()
                .push(row.try_get("test")?);
        }

        let mut histories = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            histories.push(HistoryOfPresentIllness {
                id,
                encounter_id: row.try_get("encounter_id")?,
                chief_complaint: row.try_get("chief_complaint")?,
                onset: row.try_get("onset")?,
                provokes: row.try_get("provokes")?,
                palliates: row.try_get("palliates")?,
                quality: row.try_get("quality")?,
                radiation: row.try_get("radiation")?,
                severity: row.try_get("severity")?,
                time_of_day: row.try_get("time_of_day")?,
                narrative: row.try_get("narrative")?,
                physical_examination: row.try_get("physical_examination")?,
                tests_ordered: tests.remove(&id).unwrap_or_default(),
            });
        }
        Ok(histories)
    }

    /// Mark encounters inactive once their campaign's close window has passed.
    ///
    /// Returns how many encounters were closed.
    #[instrument(skip(self))]
    pub async fn close_expired_encounters(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut closed = 0;
        for campaign in self.list_campaigns().await? {
            let cutoff = now - Duration::days(campaign.encounter_close_days);
            let result = sqlx::query(
                "UPDATE patient_encounters SET active = 0
                 WHERE active = 1
                   AND timestamp < ?
                   AND patient_id IN (
                       SELECT patient_id FROM campaign_patients WHERE campaign_id = ?)",
            )
            .bind(to_epoch(cutoff))
            .bind(campaign.id)
            .execute(self.pool())
            .await?;
            if result.rows_affected() > 0 {
                info!(campaign_id = campaign.id, closed = result.rows_affected(), "encounters closed");
            }
            closed += result.rows_affected();
        }
        Ok(closed)
    }

    // ===== CSV exports =====

    #[instrument(skip(self))]
    pub async fn insert_csv_export(
        &self,
        user_id: i64,
        campaign_id: i64,
        file_name: &str,
        created_at: DateTime<Utc>,
    ) -> AppResult<CsvExport> {
        let id = sqlx::query(
            "INSERT INTO csv_exports (user_id, campaign_id, file_name, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(campaign_id)
        .bind(file_name)
        .bind(to_epoch(created_at))
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        Ok(CsvExport {
            id,
            user_id,
            campaign_id,
            file_name: file_name.to_string(),
            created_at: from_epoch(to_epoch(created_at))?,
        })
    }

    pub async fn get_csv_export(&self, id: i64) -> AppResult<CsvExport> {
        let row = sqlx::query("SELECT * FROM csv_exports WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("export {}", id)))?;
        Ok(csv_export_from_row(&row)?)
    }

    /// One page of a user's exports, newest first. Out-of-range pages clamp.
    pub async fn list_csv_exports(
        &self,
        user_id: i64,
        page: u32,
        per_page: u32,
    ) -> AppResult<Page<CsvExport>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM csv_exports WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(self.pool())
            .await?;
        let total_pages = Page::<CsvExport>::page_count(total, per_page);
        let page = Page::<CsvExport>::clamp(page, total_pages);

        let rows = sqlx::query(
            "SELECT * FROM csv_exports WHERE user_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(i64::from(per_page))
        .bind(i64::from(page - 1) * i64::from(per_page))
        .fetch_all(self.pool())
        .await?;
        let items = rows
            .iter()
            .map(csv_export_from_row)
            .collect::<Result<_, _>>()?;
        Ok(Page::new(items, page, total_pages))
    }

    pub async fn count_csv_exports(&self, user_id: i64) -> AppResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM csv_exports WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(self.pool())
            .await?)
    }

    // ===== Inventory =====

    #[instrument(skip(self, entry, now), fields(medication = %entry.medication))]
    pub async fn create_inventory_entry(
        &self,
        campaign_id: i64,
        entry: &NewInventoryEntry,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryEntry> {
        entry.validate()?;
        let id = {
            let mut conn = self.pool().acquire().await?;
            insert_inventory_entry(&mut *conn, campaign_id, entry, now).await?
        };
        info!(entry_id = id, "inventory entry created");
        self.get_inventory_entry(campaign_id, id).await
    }

    /// The campaign's formulary, alphabetical by medication.
    pub async fn list_inventory(&self, campaign_id: i64) -> AppResult<Vec<InventoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM inventory_entries WHERE campaign_id = ?
             ORDER BY medication COLLATE NOCASE, id",
        )
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .iter()
            .map(inventory_entry_from_row)
            .collect::<Result<_, _>>()?)
    }

    /// An entry of this campaign; entries held by other campaigns are not found.
    pub async fn get_inventory_entry(&self, campaign_id: i64, id: i64) -> AppResult<InventoryEntry> {
        let row = sqlx::query("SELECT * FROM inventory_entries WHERE id = ? AND campaign_id = ?")
            .bind(id)
            .bind(campaign_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("inventory entry {}", id)))?;
        Ok(inventory_entry_from_row(&row)?)
    }

    pub async fn restock_inventory(
        &self,
        campaign_id: i64,
        id: i64,
        change: StockChange,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryEntry> {
        change.validate()?;
        self.change_stock(campaign_id, id, now, |entry| entry.restock(change.quantity))
            .await
    }

    pub async fn dispense_inventory(
        &self,
        campaign_id: i64,
        id: i64,
        change: StockChange,
        now: DateTime<Utc>,
    ) -> AppResult<InventoryEntry> {
        change.validate()?;
        self.change_stock(campaign_id, id, now, |entry| entry.dispense(change.quantity))
            .await
    }

    #[instrument(skip(self, now, apply))]
    async fn change_stock(
        &self,
        campaign_id: i64,
        id: i64,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut InventoryEntry),
    ) -> AppResult<InventoryEntry> {
        let mut tx = self.pool().begin().await?;
        let row = sqlx::query("SELECT * FROM inventory_entries WHERE id = ? AND campaign_id = ?")
            .bind(id)
            .bind(campaign_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("inventory entry {}", id)))?;
        let mut entry = inventory_entry_from_row(&row)?;

        apply(&mut entry);
        entry.updated_at = from_epoch(to_epoch(now))?;
        store_stock_levels(&mut *tx, &entry, now).await?;
        tx.commit().await?;

        info!(quantity = entry.quantity, "stock changed");
        Ok(entry)
    }

    pub async fn delete_inventory_entry(&self, campaign_id: i64, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM inventory_entries WHERE id = ? AND campaign_id = ?")
            .bind(id)
            .bind(campaign_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("inventory entry {}", id)));
        }
        Ok(())
    }

    /// Apply an uploaded sheet in one transaction.
    ///
    /// In `Added` mode a row restocks the first entry with the same
    /// medication, form and strength by its `Quantity`; other rows, and every
    /// row in `Initial` mode, become new entries.
    #[instrument(skip(self, entries, now), fields(rows = entries.len()))]
    pub async fn import_inventory(
        &self,
        campaign_id: i64,
        mode: ImportMode,
        entries: &[NewInventoryEntry],
        now: DateTime<Utc>,
    ) -> AppResult<ImportSummary> {
        let mut tx = self.pool().begin().await?;
        let mut existing = match mode {
            ImportMode::Initial => Vec::new(),
            ImportMode::Added => sqlx::query(
                "SELECT * FROM inventory_entries WHERE campaign_id = ? ORDER BY id",
            )
            .bind(campaign_id)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(inventory_entry_from_row)
            .collect::<Result<Vec<_>, _>>()?,
        };

        let mut summary = ImportSummary::default();
        for entry in entries {
            entry.validate()?;
            match existing.iter().position(|stock| stock.matches(entry)) {
                Some(found) => {
                    let stock = &mut existing[found];
                    stock.restock(entry.quantity);
                    store_stock_levels(&mut *tx, stock, now).await?;
                    summary.restocked += 1;
                }
                None => {
                    let id = insert_inventory_entry(&mut *tx, campaign_id, entry, now).await?;
                    summary.created += 1;
                    if mode == ImportMode::Added {
                        // later rows of the same sheet restock this one
                        let row = sqlx::query("SELECT * FROM inventory_entries WHERE id = ?")
                            .bind(id)
                            .fetch_one(&mut *tx)
                            .await?;
                        existing.push(inventory_entry_from_row(&row)?);
                    }
                }
            }
        }

        tx.commit().await?;
        info!(?mode, created = summary.created, restocked = summary.restocked, "inventory imported");
        Ok(summary)
    }

    // ===== Messages =====

    pub async fn insert_message(&self, message: &NewMessage, created_at: DateTime<Utc>) -> AppResult<Message> {
        let id = sqlx::query(
            "INSERT INTO messages (subject, content, sender_id, recipient_id, read, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&message.subject)
        .bind(&message.content)
        .bind(message.sender_id)
        .bind(message.recipient_id)
        .bind(to_epoch(created_at))
        .execute(self.pool())
        .await?
        .last_insert_rowid();
        Ok(Message {
            id,
            subject: message.subject.clone(),
            content: message.content.clone(),
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            read: false,
            created_at: from_epoch(to_epoch(created_at))?,
        })
    }

    /// A user's inbox, newest first.
    pub async fn messages_for_user(&self, user_id: i64) -> AppResult<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE recipient_id = ? ORDER BY id DESC")
            .bind(user_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(message_from_row).collect::<Result<_, _>>()?)
    }

    pub async fn mark_message_read(&self, id: i64, recipient_id: i64) -> AppResult<()> {
        let result = sqlx::query("UPDATE messages SET read = 1 WHERE id = ? AND recipient_id = ?")
            .bind(id)
            .bind(recipient_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("message {}", id)));
        }
        Ok(())
    }

    // ===== Audit =====

    /// Append to the campaign's chain.
    ///
    /// The transaction starts with `BEGIN IMMEDIATE` so the write lock is held
    /// before the previous link is read; two appends cannot both extend the
    /// same hash.
    pub async fn append_audit_entry(
        &self,
        event: AuditEvent<'_>,
        now: DateTime<Utc>,
    ) -> AppResult<AuditEntry> {
        let timestamp = from_epoch(to_epoch(now))?;
        let mut conn = self.pool().acquire().await?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let appended = link_audit_entry(&mut *conn, &event, timestamp).await;
        let finish = if appended.is_ok() { "COMMIT" } else { "ROLLBACK" };
        if let Err(e) = sqlx::query(finish).execute(&mut *conn).await {
            // the connection goes back to the pool; it must not stay inside a transaction
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(e.into());
        }

        let (id, previous_hash, hash) = appended?;
        Ok(AuditEntry {
            id,
            campaign_id: event.campaign_id,
            action: event.action.to_string(),
            username: event.username.to_string(),
            timestamp,
            previous_hash,
            hash,
        })
    }

    pub async fn last_audit_hash(&self, campaign_id: i64) -> AppResult<Option<String>> {
        Ok(sqlx::query_scalar(
            "SELECT hash FROM audit_entries WHERE campaign_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(campaign_id)
        .fetch_optional(self.pool())
        .await?)
    }

    /// A campaign's audit chain in insertion order.
    pub async fn audit_entries(&self, campaign_id: i64) -> AppResult<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_entries WHERE campaign_id = ? ORDER BY id")
            .bind(campaign_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .iter()
            .map(audit_entry_from_row)
            .collect::<Result<_, _>>()?)
    }
}
