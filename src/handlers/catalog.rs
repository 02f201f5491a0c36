use axum::Json;

use crate::models::catalog::{AmcPlan, CatalogService, AMC_PLANS, SERVICES};

// GET /api/services
pub async fn list_services() -> Json<&'static [CatalogService]> {
    Json(SERVICES)
}

// GET /api/plans
pub async fn list_plans() -> Json<&'static [AmcPlan]> {
    Json(AMC_PLANS)
}
