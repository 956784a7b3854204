use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ScrapeAPI",
        version = "0.1.0",
        description = "Asynchronous job API for LLM-driven web scraping and structured extraction."
    ),
    paths(
        crate::routes::start_scrape,
        crate::routes::get_scrape,
        crate::routes::start_smartscraper,
        crate::routes::health,
        crate::routes::metrics,
    ),
    components(schemas(
        crate::dto::GraphParam,
        crate::dto::ScrapeFields,
        crate::dto::ScrapeRequestBody,
        crate::dto::SmartScraperBody,
        crate::dto::JobResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "scrape", description = "Scrape job submission and polling"),
        (name = "system", description = "Health and metrics"),
    )
)]
pub struct ApiDoc;
