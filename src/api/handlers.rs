use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::{AppState, RequestContext};
use crate::access;
use crate::audit::{self, AuditEvent};
use crate::error::{AppError, AppResult};
use crate::inventory;
use crate::jobs::ExportJob;
use crate::models::{
    Capability, ImportMode, NewEncounter, NewInventoryEntry, NewPatient, StockChange, Timeframe,
};

pub const EXPORTS_PER_PAGE: u32 = 10;
pub const EXPORT_QUEUED_MESSAGE: &str =
    "We're building your CSV - you'll receive a message once it's done.";

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// ===== Authentication =====

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
    pub campaign_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[instrument(skip(state, body), fields(username = %body.username, campaign_id = body.campaign_id))]
pub async fn issue_token(
    state: web::Data<AppState>,
    body: web::Json<TokenRequest>,
) -> AppResult<HttpResponse> {
    let (user, hash) = state
        .db
        .find_user_by_username(&body.username)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !access::verify_password(&body.password, &hash) {
        warn!("rejected credentials");
        return Err(AppError::Unauthorized);
    }
    if !user.active {
        return Err(AppError::Forbidden("account is inactive".into()));
    }

    let campaign = state.db.get_campaign(body.campaign_id).await?;
    if !campaign.active {
        return Err(AppError::Forbidden(format!("campaign '{}' is inactive", campaign.name)));
    }
    if !state.db.user_in_campaign(user.id, campaign.id).await? {
        return Err(AppError::Forbidden(format!(
            "not a member of campaign '{}'",
            campaign.name
        )));
    }

    let (token, expires_at) = access::issue_token(
        &state.auth.jwt_secret,
        user.id,
        campaign.id,
        Duration::minutes(state.auth.token_ttl_minutes),
        Utc::now(),
    )?;
    info!(user_id = user.id, "token issued");
    Ok(HttpResponse::Ok().json(TokenResponse { token, expires_at }))
}

// ===== Patients and encounters =====

#[instrument(skip_all, fields(campaign_id = ctx.campaign.id))]
pub async fn create_patient(
    ctx: RequestContext,
    state: web::Data<AppState>,
    body: web::Json<NewPatient>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::EditPatients)?;
    let patient = state
        .db
        .create_patient(&body, ctx.campaign.id, Utc::now())
        .await?;
    Ok(HttpResponse::Created().json(patient))
}

/// Record an encounter entered in the campaign's units.
#[instrument(skip_all, fields(campaign_id = ctx.campaign.id, patient_id = *path))]
pub async fn create_encounter(
    ctx: RequestContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<NewEncounter>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::EditPatients)?;
    let patient_id = path.into_inner();
    if !state.db.patient_in_campaign(patient_id, ctx.campaign.id).await? {
        return Err(AppError::NotFound(format!("patient {}", patient_id)));
    }

    let encounter = body.into_inner().into_metric(ctx.campaign.units);
    encounter.validate()?;

    let created = state
        .db
        .create_encounter(patient_id, ctx.campaign.id, ctx.user.id, &encounter, Utc::now())
        .await?;
    Ok(HttpResponse::Created().json(json!({ "id": created.id })))
}

// ===== Exports =====

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub timeframe: Option<u8>,
}

/// Queue an export of the caller's campaign and acknowledge at once.
#[instrument(skip_all, fields(user_id = ctx.user.id, campaign_id = ctx.campaign.id))]
pub async fn trigger_export(
    ctx: RequestContext,
    state: web::Data<AppState>,
    query: web::Query<ExportQuery>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ExportPatients)?;
    let timeframe = match query.timeframe {
        Some(selector) => Timeframe::try_from(selector)?,
        None => Timeframe::default(),
    };

    let now = Utc::now();
    state.queue.enqueue(ExportJob {
        user_id: ctx.user.id,
        campaign_id: ctx.campaign.id,
        timeframe,
        requested_at: now,
    })?;
    audit::record(
        &state.db,
        AuditEvent {
            campaign_id: ctx.campaign.id,
            action: audit::EXPORT_REQUESTED,
            username: &ctx.user.username,
        },
        now,
    )
    .await?;

    info!(?timeframe, "export queued");
    Ok(HttpResponse::Accepted().json(json!({
        "status": "queued",
        "message": EXPORT_QUEUED_MESSAGE,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    /// Requested page; anything that is not a positive number means the first.
    pub fn number(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|page| *page >= 1)
            .unwrap_or(1)
    }
}

pub async fn list_exports(
    ctx: RequestContext,
    state: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ViewExports)?;
    let page = state
        .db
        .list_csv_exports(ctx.user.id, query.number(), EXPORTS_PER_PAGE)
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Stream a stored artifact back to its owner.
#[instrument(skip_all, fields(user_id = ctx.user.id, export_id = *path))]
pub async fn download_export(
    ctx: RequestContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ViewExports)?;
    let export_id = path.into_inner();
    let export = state.db.get_csv_export(export_id).await?;
    if export.user_id != ctx.user.id {
        return Err(AppError::NotFound(format!("export {}", export_id)));
    }

    let contents = state.storage.read(&export.file_name).await?;
    audit::record(
        &state.db,
        AuditEvent {
            campaign_id: ctx.campaign.id,
            action: audit::EXPORT_DOWNLOADED,
            username: &ctx.user.username,
        },
        Utc::now(),
    )
    .await?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(export.file_name)],
        })
        .body(contents))
}

// ===== Inventory =====

pub async fn list_inventory(
    ctx: RequestContext,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ManageInventory)?;
    let entries = state.db.list_inventory(ctx.campaign.id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

pub async fn create_inventory_entry(
    ctx: RequestContext,
    state: web::Data<AppState>,
    body: web::Json<NewInventoryEntry>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ManageInventory)?;
    let entry = state
        .db
        .create_inventory_entry(ctx.campaign.id, &body, Utc::now())
        .await?;
    Ok(HttpResponse::Created().json(entry))
}

pub async fn delete_inventory_entry(
    ctx: RequestContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ManageInventory)?;
    state
        .db
        .delete_inventory_entry(ctx.campaign.id, path.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn restock_inventory(
    ctx: RequestContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<StockChange>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ManageInventory)?;
    let entry = state
        .db
        .restock_inventory(ctx.campaign.id, path.into_inner(), body.into_inner(), Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(entry))
}

pub async fn dispense_inventory(
    ctx: RequestContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<StockChange>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ManageInventory)?;
    let entry = state
        .db
        .dispense_inventory(ctx.campaign.id, path.into_inner(), body.into_inner(), Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(entry))
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub mode: Option<String>,
}

/// Apply a formulary sheet sent as the raw request body.
#[instrument(skip_all, fields(campaign_id = ctx.campaign.id, bytes = body.len()))]
pub async fn import_inventory(
    ctx: RequestContext,
    state: web::Data<AppState>,
    query: web::Query<ImportQuery>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ManageInventory)?;
    let mode = match query.mode.as_deref() {
        Some(raw) => raw.parse::<ImportMode>()?,
        None => ImportMode::default(),
    };
    let entries = inventory::read_sheet(&body)?;
    let summary = state
        .db
        .import_inventory(ctx.campaign.id, mode, &entries, Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn export_inventory(
    ctx: RequestContext,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ManageInventory)?;
    let entries = state.db.list_inventory(ctx.campaign.id).await?;
    let contents = inventory::write_sheet(&entries)?;
    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(
                inventory::FORMULARY_FILE_NAME.to_string(),
            )],
        })
        .body(contents))
}

// ===== Messages =====

pub async fn list_messages(
    ctx: RequestContext,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ReadMessages)?;
    let messages = state.db.messages_for_user(ctx.user.id).await?;
    Ok(HttpResponse::Ok().json(messages))
}

pub async fn mark_message_read(
    ctx: RequestContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    ctx.require(Capability::ReadMessages)?;
    state
        .db
        .mark_message_read(path.into_inner(), ctx.user.id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use test_case::test_case;
    use tokio::sync::mpsc;

    use crate::config::AuthConfig;
    use crate::db::Database;
    use crate::jobs::ExportQueue;
    use crate::models::{NewCampaign, NewUser, Role, Units};
    use crate::storage::ExportStorage;

    #[actix_web::test]
    async fn full_queue_turns_export_away_without_auditing() {
        let db = Database::connect_in_memory().await.unwrap();
        let instance = db.create_instance("Test Org").await.unwrap();
        let campaign = db
            .create_campaign(&NewCampaign {
                name: "Leon 2024".into(),
                units: Units::Metric,
                telehealth: false,
                encounter_close_days: 7,
                country: "Nicaragua".into(),
                timezone: "America/Managua".into(),
                instance_id: instance.id,
            })
            .await
            .unwrap();
        let user = db
            .create_user(&NewUser {
                username: "admin".into(),
                email: None,
                password: "s3cret-pass".into(),
                roles: vec![Role::Admin],
                campaigns: vec![campaign.id],
            })
            .await
            .unwrap();

        // one slot, already taken, and nobody draining it
        let (sender, _receiver) = mpsc::channel(1);
        let queue = ExportQueue { sender };
        queue
            .enqueue(ExportJob {
                user_id: user.id,
                campaign_id: campaign.id,
                timeframe: Timeframe::All,
                requested_at: Utc::now(),
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            db: db.clone(),
            storage: ExportStorage::new(dir.path()),
            queue,
            auth: AuthConfig {
                jwt_secret: "test-secret".into(),
                token_ttl_minutes: 30,
            },
        };
        let ctx = RequestContext {
            user,
            campaign: campaign.clone(),
        };

        let err = trigger_export(
            ctx,
            web::Data::new(state),
            web::Query(ExportQuery { timeframe: None }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::QueueFull));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(db.audit_entries(campaign.id).await.unwrap().is_empty());
    }

    #[test_case(None, 1)]
    #[test_case(Some("3"), 3)]
    #[test_case(Some("0"), 1)]
    #[test_case(Some("-2"), 1)]
    #[test_case(Some("abc"), 1)]
    fn page_numbers_default_to_first(raw: Option<&str>, expected: u32) {
        let query = PageQuery {
            page: raw.map(String::from),
        };
        assert_eq!(query.number(), expected);
    }
}
