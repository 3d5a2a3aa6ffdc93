use actix_web::{middleware::Logger, web, App, HttpServer};
use actix_web::dev::Server;
use sqlx::PgPool;
use std::net::TcpListener;

use crate::configuration::JwtSettings;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    activate_user, admin_change_password, approve_question, create_question, create_tracking,
    dashboard_stats, deactivate_user, delete_question, get_current_user, get_question,
    get_tracking, get_tracking_with_questions, health_check, list_approved_questions,
    list_disciplines, list_modules, list_questions, list_subjects, list_trackings, list_users,
    login, refresh, register, update_question,
};

pub fn run(
    listener: TcpListener,
    connection: PgPool,
    jwt_config: JwtSettings,
) -> Result<Server, std::io::Error> {
    let connection = web::Data::new(connection);
    let jwt_config_data = web::Data::new(jwt_config.clone());

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())      // Standard logging
            .wrap(LoggerMiddleware)       // Custom logging

            // Shared state
            .app_data(connection.clone())
            .app_data(jwt_config_data.clone())

            // Public routes (no authentication required)
            .route("/health_check", web::get().to(health_check))

            // Auth: login and refresh are public, the rest needs a bearer token
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .service(
                        web::scope("")
                            .wrap(JwtMiddleware::new(jwt_config.clone()))
                            .route("/register", web::post().to(register))
                            .route("/me", web::get().to(get_current_user))
                            .route(
                                "/admin/change-password",
                                web::patch().to(admin_change_password),
                            ),
                    ),
            )

            // Protected resource routes
            .service(
                web::scope("/users")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("", web::get().to(list_users))
                    .route("/{uuid}/deactivate", web::patch().to(deactivate_user))
                    .route("/{uuid}/activate", web::patch().to(activate_user)),
            )
            .service(
                web::scope("/disciplines")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("", web::get().to(list_disciplines)),
            )
            .service(
                web::scope("/questions")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("", web::post().to(create_question))
                    .route("", web::get().to(list_questions))
                    .route("/approved", web::get().to(list_approved_questions))
                    .route("/{uuid}", web::get().to(get_question))
                    .route("/{uuid}", web::patch().to(update_question))
                    .route("/{uuid}/approve", web::patch().to(approve_question))
                    .route("/{uuid}", web::delete().to(delete_question)),
            )
            .service(
                web::scope("/trackings")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("", web::post().to(create_tracking))
                    .route("", web::get().to(list_trackings))
                    .route("/{uuid}", web::get().to(get_tracking))
                    .route(
                        "/{uuid}/with-questions",
                        web::get().to(get_tracking_with_questions),
                    ),
            )
            .service(
                web::scope("/modules")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("", web::get().to(list_modules)),
            )
            .service(
                web::scope("/subjects")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("", web::get().to(list_subjects)),
            )
            .service(
                web::scope("/dashboard")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("/stats", web::get().to(dashboard_stats)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
