#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};

use femr::db::Database;
use femr::models::{
    Campaign, NewCampaign, NewEncounter, NewHistoryOfPresentIllness, NewInventoryEntry,
    NewPatient, NewTreatment, NewUser, NewVitals, Patient, Role, SexAssignedAtBirth, Units, User,
};

pub const PASSWORD: &str = "s3cret-pass";

pub struct Seed {
    pub db: Database,
    pub campaign: Campaign,
    pub admin: User,
}

pub async fn campaign(db: &Database, instance_id: i64, name: &str, units: Units) -> Campaign {
    db.create_campaign(&NewCampaign {
        name: name.into(),
        units,
        telehealth: false,
        encounter_close_days: 7,
        country: "Nicaragua".into(),
        timezone: "America/Managua".into(),
        instance_id,
    })
    .await
    .unwrap()
}

pub async fn user(db: &Database, username: &str, roles: Vec<Role>, campaigns: Vec<i64>) -> User {
    db.create_user(&NewUser {
        username: username.into(),
        email: Some(format!("{}@example.org", username)),
        password: PASSWORD.into(),
        roles,
        campaigns,
    })
    .await
    .unwrap()
}

/// A fresh database with one campaign and an admin who belongs to it.
pub async fn seed(units: Units) -> Seed {
    let db = Database::connect_in_memory().await.unwrap();
    let instance = db.create_instance("Test Org").await.unwrap();
    let campaign = campaign(&db, instance.id, "Leon 2024", units).await;
    let admin = user(&db, "admin", vec![Role::Admin], vec![campaign.id]).await;
    Seed {
        db,
        campaign,
        admin,
    }
}

pub fn intake(first_name: &str) -> NewPatient {
    NewPatient {
        first_name: first_name.into(),
        middle_name: None,
        last_name: "Lopez".into(),
        sex_assigned_at_birth: SexAssignedAtBirth::Female,
        date_of_birth: NaiveDate::from_ymd_opt(1985, 4, 12).unwrap(),
        phone_number: None,
        email_address: None,
        city: Some("Leon".into()),
    }
}

pub async fn patient(db: &Database, campaign_id: i64, created: DateTime<Utc>) -> Patient {
    db.create_patient(&intake("Maria"), campaign_id, created)
        .await
        .unwrap()
}

pub fn vitals() -> NewVitals {
    NewVitals {
        systolic_blood_pressure: Some(120),
        diastolic_blood_pressure: Some(80),
        heart_rate: Some(72),
        body_temperature: Some(37.0),
        oxygen_concentration: Some(98),
        ..Default::default()
    }
}

pub fn treatment() -> NewTreatment {
    NewTreatment {
        diagnosis: "Hypertension".into(),
        medications: vec!["Amlodipine".into(), "Lisinopril".into()],
        administration_schedule: "Once daily".into(),
        days: 30,
    }
}

pub fn history() -> NewHistoryOfPresentIllness {
    NewHistoryOfPresentIllness {
        chief_complaint: "Headache".into(),
        severity: Some("7/10".into()),
        tests_ordered: vec!["CBC".into()],
        ..Default::default()
    }
}

/// A metric encounter with `count` vitals and nothing else.
pub fn encounter(count: usize) -> NewEncounter {
    NewEncounter {
        body_height_primary: Some(1),
        body_height_secondary: Some(82.0),
        body_weight: Some(70.0),
        vitals: (0..count).map(|_| vitals()).collect(),
        ..Default::default()
    }
}

pub fn supply(medication: &str, strength: &str, quantity: i64) -> NewInventoryEntry {
    NewInventoryEntry {
        category: Some("General".into()),
        medication: medication.into(),
        form: "Tablet".into(),
        strength: Some(strength.into()),
        count: 30,
        quantity,
        initial_quantity: None,
        item_number: None,
        box_number: Some("B1".into()),
        expiration_date: None,
        manufacturer: None,
    }
}
