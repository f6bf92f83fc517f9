use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::cache::keys::{
    catalog_categories_key, catalog_course_key, catalog_list_key, CATALOG_PREFIX, CATALOG_TTL,
};
use crate::db::operations::content::{self, ContentRef, TopicOutline};
use crate::db::operations::courses::{
    self, CatalogFilter, Course, CourseDeletion, CourseDraft, CourseListItem, CoursePatch,
};
use crate::db::operations::users::{self, UserSummary};
use crate::db::DatabaseProxy;
use crate::middleware::auth::ensure_role;
use crate::response::{created, ok, paginate, AppError, Page};
use crate::services::enrollment::{can_access, ensure_access};
use crate::services::validation::{
    is_http_url, normalize_currency, required_text, slugify, unique_slug,
};
use crate::state::AppState;
use crate::types::{CourseLevel, Role};

const CATALOG_PAGE_SIZE: i64 = 12;
const CATALOG_PAGE_MAX: i64 = 50;
const TITLE_MAX: usize = 160;
const DESCRIPTION_MAX: usize = 5000;
const CATEGORY_MAX: usize = 60;

/// Public catalog. Mounted behind `optional_auth`.
pub fn catalog_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_catalog))
        .route("/categories", get(list_categories))
        .route("/materials/:id", get(read_material))
        .route("/:id_or_slug", get(course_detail))
}

/// Course authoring. Mounted behind `require_auth`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_course))
        .route("/mine", get(my_courses))
        .route(
            "/:id",
            get(owned_course).put(update_course).delete(delete_course),
        )
        .route("/:id/publish", post(publish_course))
        .route("/:id/unpublish", post(unpublish_course))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogQuery {
    q: Option<String>,
    category: Option<String>,
    level: Option<CourseLevel>,
    tutor_id: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseDetail {
    #[serde(flatten)]
    course: Course,
    tutor: Option<UserSummary>,
    enrollment_count: i64,
    topics: Vec<TopicOutline>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseDetailView {
    #[serde(flatten)]
    detail: CourseDetail,
    has_access: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
    category: String,
    #[serde(default)]
    level: Option<CourseLevel>,
    #[serde(default)]
    price_cents: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    cover_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoursePatchRequest {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    level: Option<CourseLevel>,
    price_cents: Option<i64>,
    currency: Option<String>,
    cover_url: Option<String>,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn catalog_fingerprint(filter: &CatalogFilter, page: i64, page_size: i64) -> String {
    let part = |value: Option<&str>| urlencoding::encode(value.unwrap_or("")).into_owned();
    format!(
        "q={}&category={}&level={}&tutor={}&page={page}&size={page_size}",
        part(filter.q.as_deref()),
        part(filter.category.as_deref()),
        part(filter.level.as_ref().map(CourseLevel::as_str)),
        part(filter.tutor_id.as_deref()),
    )
}

async fn list_catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let (page, page_size, offset) =
        paginate(query.page, query.page_size, CATALOG_PAGE_SIZE, CATALOG_PAGE_MAX);
    let filter = CatalogFilter {
        q: blank_to_none(query.q),
        category: blank_to_none(query.category),
        level: query.level,
        tutor_id: blank_to_none(query.tutor_id),
    };

    let cache = state.cache();
    let key = catalog_list_key(&catalog_fingerprint(&filter, page, page_size));
    if let Some(cached) = cache.get::<Page<CourseListItem>>(&key).await {
        return Ok(ok(cached));
    }

    let (items, total) = courses::list_published(&proxy, &filter, page_size, offset).await?;
    let page = Page::new(items, total, page, page_size);
    cache.set(&key, &page, CATALOG_TTL).await;
    Ok(ok(page))
}

async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let cache = state.cache();
    let key = catalog_categories_key();
    if let Some(cached) = cache.get::<Vec<courses::CategoryCount>>(&key).await {
        return Ok(ok(cached));
    }

    let categories = courses::list_categories(&proxy).await?;
    cache.set(&key, &categories, CATALOG_TTL).await;
    Ok(ok(categories))
}

async fn load_detail(proxy: &DatabaseProxy, course: Course) -> Result<CourseDetail, AppError> {
    let tutor = users::find_summary(proxy, &course.tutor_id).await?;
    let enrollment_count = courses::count_active_enrollments(proxy, &course.id).await?;
    let topics = content::course_outline(proxy, &course.id).await?;
    Ok(CourseDetail {
        course,
        tutor,
        enrollment_count,
        topics,
    })
}

async fn course_detail(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path(id_or_slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let cache = state.cache();
    let key = catalog_course_key(&id_or_slug);

    let detail = match cache.get::<CourseDetail>(&key).await {
        Some(cached) => cached,
        None => {
            let course = courses::find_course_by_id_or_slug(&proxy, &id_or_slug)
                .await?
                .filter(|course| course.published)
                .ok_or_else(|| AppError::not_found("Course not found"))?;
            let detail = load_detail(&proxy, course).await?;
            cache.set(&key, &detail, CATALOG_TTL).await;
            detail
        }
    };

    let has_access = match user {
        Some(Extension(user)) => can_access(&proxy, &user, &detail.course).await?,
        None => false,
    };
    Ok(ok(CourseDetailView { detail, has_access }))
}

/// Preview materials of published courses are public; everything else needs
/// course access.
async fn read_material(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Path(material_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let not_found = || AppError::not_found("Material not found");

    let owner = content::find_owner(&proxy, ContentRef::Material(&material_id))
        .await?
        .ok_or_else(not_found)?;
    let material = content::find_material(&proxy, &material_id)
        .await?
        .ok_or_else(not_found)?;

    if owner.published && material.is_preview {
        return Ok(ok(material));
    }

    let Some(Extension(user)) = user else {
        return Err(AppError::unauthorized("Sign in to view this material"));
    };
    ensure_access(&proxy, &user, &owner).await?;
    Ok(ok(material))
}

/// Loads a course the caller may edit: its tutor or any admin.
pub(super) async fn load_owned_course(
    proxy: &DatabaseProxy,
    user: &AuthUser,
    course_id: &str,
) -> Result<Course, AppError> {
    let course = courses::find_course(proxy, course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    if course.tutor_id != user.id && !user.is_admin() {
        return Err(AppError::forbidden("You do not own this course"));
    }
    Ok(course)
}

pub(super) async fn invalidate_catalog(state: &AppState) {
    state.cache().invalidate_prefix(CATALOG_PREFIX).await;
}

fn validate_cover(cover_url: Option<String>) -> Result<Option<String>, AppError> {
    match blank_to_none(cover_url) {
        Some(url) if !is_http_url(&url) => Err(AppError::validation("coverUrl must be an http(s) URL")),
        other => Ok(other),
    }
}

fn validate_price(price_cents: i64) -> Result<i64, AppError> {
    if price_cents < 0 {
        return Err(AppError::validation("priceCents must not be negative"));
    }
    Ok(price_cents)
}

fn validate_currency(raw: &str) -> Result<String, AppError> {
    normalize_currency(raw).ok_or_else(|| AppError::validation("currency must be a 3-letter code"))
}

fn optional_description(raw: Option<&str>) -> Result<String, AppError> {
    let description = raw.unwrap_or("").trim();
    if description.chars().count() > DESCRIPTION_MAX {
        return Err(AppError::validation(format!(
            "description must be at most {DESCRIPTION_MAX} characters"
        )));
    }
    Ok(description.to_string())
}

async fn create_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CourseRequest>,
) -> Result<Response, AppError> {
    ensure_role(&user, &[Role::Tutor, Role::Admin])?;

    let title = required_text(&payload.title, "title", TITLE_MAX).map_err(AppError::validation)?;
    let category =
        required_text(&payload.category, "category", CATEGORY_MAX).map_err(AppError::validation)?;
    let description = optional_description(payload.description.as_deref())?;
    let price_cents = validate_price(payload.price_cents.unwrap_or(0))?;
    let currency = validate_currency(payload.currency.as_deref().unwrap_or("USD"))?;
    let cover_url = validate_cover(payload.cover_url)?;

    let proxy = state.require_db()?;
    let base = slugify(&title);
    let taken = courses::slugs_like(&proxy, &base).await?;
    let draft = CourseDraft {
        slug: unique_slug(&base, &taken),
        title,
        description,
        category,
        level: payload.level.unwrap_or(CourseLevel::Beginner),
        price_cents,
        currency,
        cover_url,
    };

    let course = courses::insert_course(&proxy, &user.id, &draft).await?;
    tracing::info!(course_id = %course.id, tutor_id = %user.id, slug = %course.slug, "course created");
    Ok(created(course))
}

async fn my_courses(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    ensure_role(&user, &[Role::Tutor, Role::Admin])?;
    let proxy = state.require_db()?;
    let tutor_filter = (!user.is_admin()).then_some(user.id.as_str());
    Ok(ok(courses::list_owned(&proxy, tutor_filter).await?))
}

async fn owned_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let course = load_owned_course(&proxy, &user, &course_id).await?;
    Ok(ok(load_detail(&proxy, course).await?))
}

async fn update_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
    Json(payload): Json<CoursePatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    load_owned_course(&proxy, &user, &course_id).await?;

    let patch = CoursePatch {
        title: payload
            .title
            .map(|t| required_text(&t, "title", TITLE_MAX))
            .transpose()
            .map_err(AppError::validation)?,
        description: payload
            .description
            .map(|d| optional_description(Some(&d)))
            .transpose()?,
        category: payload
            .category
            .map(|c| required_text(&c, "category", CATEGORY_MAX))
            .transpose()
            .map_err(AppError::validation)?,
        level: payload.level,
        price_cents: payload.price_cents.map(validate_price).transpose()?,
        currency: payload.currency.as_deref().map(validate_currency).transpose()?,
        cover_url: validate_cover(payload.cover_url)?,
    };

    let course = courses::update_course(&proxy, &course_id, &patch)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    invalidate_catalog(&state).await;
    Ok(ok(course))
}

async fn delete_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    load_owned_course(&proxy, &user, &course_id).await?;

    match courses::delete_course(&proxy, &course_id).await? {
        CourseDeletion::Deleted => {}
        CourseDeletion::NotFound => return Err(AppError::not_found("Course not found")),
        CourseDeletion::HasActiveEnrollments => {
            return Err(AppError::conflict("Courses with active enrollments cannot be deleted"))
        }
    }

    invalidate_catalog(&state).await;
    tracing::info!(course_id = %course_id, user_id = %user.id, "course deleted");
    Ok(ok(serde_json::json!({ "deleted": true })))
}

async fn publish_course(
    state: State<AppState>,
    user: Extension<AuthUser>,
    path: Path<String>,
) -> Result<impl IntoResponse, AppError> {
    set_published(state, user, path, true).await
}

async fn unpublish_course(
    state: State<AppState>,
    user: Extension<AuthUser>,
    path: Path<String>,
) -> Result<impl IntoResponse, AppError> {
    set_published(state, user, path, false).await
}

async fn set_published(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
    published: bool,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    load_owned_course(&proxy, &user, &course_id).await?;

    let course = courses::set_published(&proxy, &course_id, published)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    invalidate_catalog(&state).await;
    tracing::info!(course_id = %course.id, published, "course visibility changed");
    Ok(ok(course))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_distinguishes_filters() {
        let base = CatalogFilter::default();
        let search = CatalogFilter {
            q: Some("rust & go".to_string()),
            ..CatalogFilter::default()
        };
        let a = catalog_fingerprint(&base, 1, 12);
        let b = catalog_fingerprint(&search, 1, 12);
        assert_ne!(a, b);
        assert!(b.contains("q=rust%20%26%20go"));
        assert_ne!(a, catalog_fingerprint(&base, 2, 12));
    }

    #[test]
    fn cover_must_be_http() {
        assert_eq!(validate_cover(Some("  ".to_string())).unwrap(), None);
        assert!(validate_cover(Some("ftp://x".to_string())).is_err());
        assert_eq!(
            validate_cover(Some("https://cdn.example.com/a.png".to_string())).unwrap(),
            Some("https://cdn.example.com/a.png".to_string())
        );
    }
}
