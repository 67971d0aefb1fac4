//! Export orchestration: select, aggregate, render, store, notify.

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::aggregate::{collect, Aggregation};
use super::rows::RowBuilder;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::jobs::ExportJob;
use crate::models::{Campaign, CsvExport};
use crate::notify::{self, Mailer};
use crate::storage::{self, ExportStorage};

/// Everything an export run needs besides the job itself.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub db: Database,
    pub storage: ExportStorage,
    pub mailer: Option<Mailer>,
}

/// Serialize an aggregation to CSV text.
///
/// The writer rejects ragged records, so a row whose width differs from the
/// title row fails the export instead of producing a malformed file.
pub fn render_csv(campaign: &Campaign, aggregation: &Aggregation) -> AppResult<Vec<u8>> {
    let builder = RowBuilder::new(campaign, aggregation.widths);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(builder.title())?;
    for row in builder.rows(aggregation) {
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))
}

/// Produce one CSV artifact for `job` and notify the requester.
///
/// Exactly one export record and one in-app message are written per
/// successful run, including runs that select no patients.
#[instrument(skip(ctx, job), fields(user_id = job.user_id, campaign_id = job.campaign_id, timeframe = ?job.timeframe))]
pub async fn run_export(ctx: &ExportContext, job: &ExportJob) -> AppResult<CsvExport> {
    let campaign = ctx.db.get_campaign(job.campaign_id).await?;
    let user = ctx.db.get_user(job.user_id).await?;

    let window = job.timeframe.window(job.requested_at);
    let patients = ctx.db.patients_for_export(campaign.id, window).await?;
    let aggregation = collect(&ctx.db, patients).await?;
    let contents = render_csv(&campaign, &aggregation)?;

    let generated_at = Utc::now();
    let file_name = storage::artifact_name(&campaign.name, generated_at);
    ctx.storage.save(&file_name, &contents).await?;

    let export = match ctx
        .db
        .insert_csv_export(user.id, campaign.id, &file_name, generated_at)
        .await
    {
        Ok(export) => export,
        Err(e) => {
            // no record points at the file, so nobody could download it
            if let Err(cleanup) = ctx.storage.remove(&file_name).await {
                warn!(error = %cleanup, %file_name, "unrecorded artifact left on disk");
            }
            return Err(e);
        }
    };
    notify::notify_export_finished(&ctx.db, ctx.mailer.as_ref(), &user, generated_at).await?;

    info!(
        export_id = export.id,
        file_name = %export.file_name,
        patients = aggregation.patients.len(),
        rows = aggregation.encounter_count(),
        "export finished"
    );
    Ok(export)
}
