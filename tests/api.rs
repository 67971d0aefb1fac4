mod common;

use std::time::Duration as StdDuration;

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use femr::access;
use femr::api::{self, AppState};
use femr::audit;
use femr::config::AuthConfig;
use femr::export::ExportContext;
use femr::jobs::ExportQueue;
use femr::models::{Role, Units};
use femr::storage::ExportStorage;

use common::{seed, user, Seed, PASSWORD};

const SECRET: &str = "test-secret";

fn state(seed: &Seed, dir: &tempfile::TempDir) -> AppState {
    let storage = ExportStorage::new(dir.path());
    let (queue, _workers) = ExportQueue::start(
        ExportContext {
            db: seed.db.clone(),
            storage: storage.clone(),
            mailer: None,
        },
        1,
        8,
    );
    AppState {
        db: seed.db.clone(),
        storage,
        queue,
        auth: AuthConfig {
            jwt_secret: SECRET.into(),
            token_ttl_minutes: 30,
        },
    }
}

fn bearer(user_id: i64, campaign_id: i64) -> (header::HeaderName, String) {
    let (token, _) =
        access::issue_token(SECRET, user_id, campaign_id, Duration::minutes(5), Utc::now()).unwrap();
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(api::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn health_is_public() {
    let seed = seed(Units::Metric).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "status": "ok" }));
}

#[actix_web::test]
async fn token_requires_valid_credentials_and_membership() {
    let seed = seed(Units::Metric).await;
    let outsider = user(&seed.db, "visitor", vec![Role::Clinician], vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let attempt = |username: &str, password: &str| {
        test::TestRequest::post()
            .uri("/api/auth/token")
            .set_json(json!({
                "username": username,
                "password": password,
                "campaign_id": seed.campaign.id,
            }))
            .to_request()
    };

    let resp = test::call_service(&app, attempt("admin", "wrong")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = test::call_service(&app, attempt("nobody", PASSWORD)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = test::call_service(&app, attempt(&outsider.username, PASSWORD)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(&app, attempt("admin", PASSWORD)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let claims = access::decode_token(SECRET, body["token"].as_str().unwrap()).unwrap();
    assert_eq!(claims.sub, seed.admin.id);
    assert_eq!(claims.campaign, seed.campaign.id);
}

#[actix_web::test]
async fn export_trigger_is_gated() {
    let seed = seed(Units::Metric).await;
    let clinician = user(&seed.db, "clinician", vec![Role::Clinician], vec![seed.campaign.id]).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/exports").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/exports?timeframe=1")
        .insert_header(bearer(clinician.id, seed.campaign.id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/exports?timeframe=9")
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    seed.db.set_campaign_active(seed.campaign.id, false).await.unwrap();
    let req = test::TestRequest::post()
        .uri("/api/exports?timeframe=1")
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn export_is_queued_listed_and_downloaded() {
    let seed = seed(Units::Metric).await;
    let other = user(&seed.db, "manager", vec![Role::CampaignManager], vec![seed.campaign.id]).await;
    common::patient(&seed.db, seed.campaign.id, Utc::now()).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let req = test::TestRequest::post()
        .uri("/api/exports?timeframe=3")
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(
        body["message"],
        "We're building your CSV - you'll receive a message once it's done."
    );

    let mut finished = false;
    for _ in 0..100 {
        if seed.db.count_csv_exports(seed.admin.id).await.unwrap() == 1 {
            finished = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert!(finished, "export worker did not finish");

    let req = test::TestRequest::get()
        .uri("/api/exports?page=7")
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["page"], 1);
    assert_eq!(page["total_pages"], 1);
    assert_eq!(page["has_next"], false);
    let export_id = page["items"][0]["id"].as_i64().unwrap();
    let file_name = page["items"][0]["file_name"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/exports/{}/download", export_id))
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/csv");
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(disposition, format!("attachment; filename=\"{}\"", file_name));
    let body = test::read_body(resp).await;
    assert_eq!(String::from_utf8_lossy(&body).lines().count(), 1);

    // exports belong to their requester only
    let req = test::TestRequest::get()
        .uri(&format!("/api/exports/{}/download", export_id))
        .insert_header(bearer(other.id, seed.campaign.id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let entries = seed.db.audit_entries(seed.campaign.id).await.unwrap();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec![audit::EXPORT_REQUESTED, audit::EXPORT_DOWNLOADED]);
    assert_eq!(audit::verify_chain(&entries), None);
}

#[actix_web::test]
async fn export_listing_pages_newest_first() {
    let seed = seed(Units::Metric).await;
    for n in 0..12 {
        seed.db
            .insert_csv_export(seed.admin.id, seed.campaign.id, &format!("export-{}.csv", n), Utc::now())
            .await
            .unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let list = |page: &str| {
        test::TestRequest::get()
            .uri(&format!("/api/exports?page={}", page))
            .insert_header(bearer(seed.admin.id, seed.campaign.id))
            .to_request()
    };

    let first: Value = test::call_and_read_body_json(&app, list("abc")).await;
    assert_eq!(first["page"], 1);
    assert_eq!(first["total_pages"], 2);
    assert_eq!(first["items"].as_array().unwrap().len(), 10);
    assert_eq!(first["items"][0]["file_name"], "export-11.csv");

    let last: Value = test::call_and_read_body_json(&app, list("99")).await;
    assert_eq!(last["page"], 2);
    assert_eq!(last["has_previous"], true);
    assert_eq!(last["items"].as_array().unwrap().len(), 2);
    assert_eq!(last["items"][1]["file_name"], "export-0.csv");
}

#[actix_web::test]
async fn imperial_encounters_are_stored_metric() {
    let seed = seed(Units::Imperial).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let req = test::TestRequest::post()
        .uri("/api/patients")
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .set_json(json!({
            "first_name": "Rosa",
            "last_name": "Martinez",
            "sex_assigned_at_birth": "female",
            "date_of_birth": "1990-02-01",
            "city": "Leon",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let patient: Value = test::read_body_json(resp).await;
    let patient_id = patient["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/patients/{}/encounters", patient_id))
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .set_json(json!({
            "body_height_primary": 6,
            "body_height_secondary": 0.0,
            "body_weight": 154.32,
            "smoking": true,
            "vitals": [{ "systolic_blood_pressure": 120, "body_temperature": 98.6 }],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;

    let encounter = seed.db.get_encounter(created["id"].as_i64().unwrap()).await.unwrap();
    assert_eq!(encounter.body_height_primary, Some(1));
    assert!((encounter.body_height_secondary.unwrap() - 82.88).abs() < 1e-6);
    assert!((encounter.body_weight.unwrap() - 70.0).abs() < 0.01);
    assert!(encounter.smoking);
    let vitals = seed.db.vitals_for_encounter(encounter.id).await.unwrap();
    assert_eq!(vitals[0].body_temperature, Some(37.0));
}

#[actix_web::test]
async fn encounter_for_foreign_patient_is_not_found() {
    let seed = seed(Units::Metric).await;
    let other = common::campaign(&seed.db, seed.campaign.instance_id, "Granada 2024", Units::Metric).await;
    let outsider = common::patient(&seed.db, other.id, Utc::now()).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let req = test::TestRequest::post()
        .uri(&format!("/api/patients/{}/encounters", outsider.id))
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .set_json(json!({}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn out_of_range_vitals_are_rejected() {
    let seed = seed(Units::Metric).await;
    let p = common::patient(&seed.db, seed.campaign.id, Utc::now()).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let req = test::TestRequest::post()
        .uri(&format!("/api/patients/{}/encounters", p.id))
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .set_json(json!({ "vitals": [{ "oxygen_concentration": 40 }] }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    assert!(seed.db.encounters_for_patient(p.id).await.unwrap().is_empty());
}

#[actix_web::test]
async fn messages_can_be_listed_and_read() {
    let seed = seed(Units::Metric).await;
    let other = user(&seed.db, "manager", vec![Role::CampaignManager], vec![seed.campaign.id]).await;
    let message = femr::notify::notify_export_finished(&seed.db, None, &seed.admin, Utc::now())
        .await
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));

    let req = test::TestRequest::get()
        .uri("/api/messages")
        .insert_header(bearer(seed.admin.id, seed.campaign.id))
        .to_request();
    let inbox: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(inbox[0]["subject"], "CSV Export Finished");
    assert_eq!(inbox[0]["read"], false);

    let read = |user_id: i64| {
        test::TestRequest::post()
            .uri(&format!("/api/messages/{}/read", message.id))
            .insert_header(bearer(user_id, seed.campaign.id))
            .to_request()
    };
    assert_eq!(test::call_service(&app, read(other.id)).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(test::call_service(&app, read(seed.admin.id)).await.status(), StatusCode::NO_CONTENT);
    assert!(seed.db.messages_for_user(seed.admin.id).await.unwrap()[0].read);
}

#[actix_web::test]
async fn formulary_is_managed_over_http() {
    let seed = seed(Units::Metric).await;
    let clinician = user(&seed.db, "clinician", vec![Role::Clinician], vec![seed.campaign.id]).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app!(state(&seed, &dir));
    let admin = || bearer(seed.admin.id, seed.campaign.id);

    let req = test::TestRequest::get()
        .uri("/api/inventory")
        .insert_header(bearer(clinician.id, seed.campaign.id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/inventory")
        .insert_header(admin())
        .set_json(json!({
            "medication": "Amoxicillin",
            "form": "Tablet",
            "strength": "500mg",
            "quantity": 20,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["initial_quantity"], 20);

    let req = test::TestRequest::post()
        .uri(&format!("/api/inventory/{}/dispense", id))
        .insert_header(admin())
        .set_json(json!({ "quantity": 5 }))
        .to_request();
    let entry: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(entry["quantity"], 15);

    let sheet = "Medication,Form,Strength,Quantity\nAmoxicillin,Tablet,500mg,10\nIbuprofen,Tablet,200mg,40\n";
    let req = test::TestRequest::post()
        .uri("/api/inventory/import?mode=added")
        .insert_header(admin())
        .insert_header((header::CONTENT_TYPE, "text/csv"))
        .set_payload(sheet)
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary, json!({ "created": 1, "restocked": 1 }));

    let req = test::TestRequest::post()
        .uri("/api/inventory/import?mode=9")
        .insert_header(admin())
        .set_payload(sheet)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/inventory/export")
        .insert_header(admin())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"formulary.csv\""
    );
    let body = test::read_body(resp).await;
    let text = String::from_utf8_lossy(&body);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with(",Amoxicillin,Tablet,500mg,0,25,25,"));

    let req = test::TestRequest::delete()
        .uri(&format!("/api/inventory/{}", id))
        .insert_header(admin())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    let req = test::TestRequest::get()
        .uri("/api/inventory")
        .insert_header(admin())
        .to_request();
    let remaining: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(remaining.as_array().unwrap().len(), 1);
}
