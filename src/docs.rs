use utoipa::openapi::security::HttpAuthScheme;
use utoipa::OpenApi;

use crate::entitlement::Plan;
use crate::server::{
    Audience, BroadcastReport, BroadcastRequest, ErrorResponse, PlanChange,
};
use crate::types::{BotStats, User, UserUsage};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::server::stats_handler,
        crate::server::users_handler,
        crate::server::usage_handler,
        crate::server::plan_handler,
        crate::server::broadcast_handler,
    ),
    components(
        schemas(
            BotStats,
            User,
            UserUsage,
            Plan,
            PlanChange,
            Audience,
            BroadcastRequest,
            BroadcastReport,
            ErrorResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "footbot", description = "Footbot admin endpoints")
    ),
    info(
        title = "Footbot Admin API",
        version = "1.0",
        description = "Usage statistics, plan management and broadcasts",
        license(
            name = "BSD-3-Clause"
        )
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
