use actix_web::web;

use super::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/auth/token", web::post().to(handlers::issue_token))
            .route("/patients", web::post().to(handlers::create_patient))
            .route(
                "/patients/{id}/encounters",
                web::post().to(handlers::create_encounter),
            )
            .service(
                web::resource("/exports")
                    .route(web::post().to(handlers::trigger_export))
                    .route(web::get().to(handlers::list_exports)),
            )
            .route(
                "/exports/{id}/download",
                web::get().to(handlers::download_export),
            )
            .service(
                web::resource("/inventory")
                    .route(web::get().to(handlers::list_inventory))
                    .route(web::post().to(handlers::create_inventory_entry)),
            )
            .route("/inventory/import", web::post().to(handlers::import_inventory))
            .route("/inventory/export", web::get().to(handlers::export_inventory))
            .route(
                "/inventory/{id}",
                web::delete().to(handlers::delete_inventory_entry),
            )
            .route(
                "/inventory/{id}/restock",
                web::post().to(handlers::restock_inventory),
            )
            .route(
                "/inventory/{id}/dispense",
                web::post().to(handlers::dispense_inventory),
            )
            .route("/messages", web::get().to(handlers::list_messages))
            .route(
                "/messages/{id}/read",
                web::post().to(handlers::mark_message_read),
            ),
    );
}
