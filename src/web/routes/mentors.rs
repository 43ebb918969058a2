//! Mentor search ranked by the rule-based matcher.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use chrono::{Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    booking::{
        BookingError, BookingResult, MatchPreferences, MentorMatch, SkillLevel, StudentNeeds,
        matching::{self, PriceRange, WeeklyWindow},
        recurring::parse_time,
    },
    model::{
        DatabaseError, ResourceTyped,
        entity::{MentorDirectory, UserEntity},
    },
    web::{AppState, RequestContext, WebError, WebResult, error::ErrorResponse, middlewares},
};

/// Only slots starting within this many days describe a mentor.
pub const SEARCH_HORIZON_DAYS: i64 = 28;
pub const DEFAULT_RESULTS: usize = 5;
pub const MAX_RESULTS: usize = 10;
/// Matches below this are dropped, unless an instrument already narrowed the field.
pub const MIN_SCORE: u32 = 70;
pub const MIN_SCORE_WITH_INSTRUMENT: u32 = 30;

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct MentorSearchQuery {
    /// Defaults to beginner.
    pub skill_level: Option<SkillLevel>,
    /// Comma separated, e.g. `technique,improvisation`
    pub goals: Option<String>,
    /// Comma separated, e.g. `jazz,classical`
    pub genres: Option<String>,
    /// Keeps only mentors with a matching slot tag.
    pub instrument: Option<String>,
    /// Per lesson hour.
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    /// Comma separated, 0 = Sunday .. 6 = Saturday. All days when only times are given.
    pub days: Option<String>,
    /// `HH:MM`, UTC
    pub from_time: Option<String>,
    /// `HH:MM`, UTC
    pub to_time: Option<String>,
    #[serde(default)]
    pub prioritize_schedule: bool,
    #[serde(default)]
    pub prioritize_price: bool,
    #[serde(default)]
    pub prioritize_experience: bool,
    /// Drops mentors who already taught the caller.
    #[serde(default)]
    pub exclude_previous: bool,
    pub min_score: Option<u32>,
    pub limit: Option<usize>,
}

fn list(value: &Option<String>) -> Vec<String> {
    value
        .iter()
        .flat_map(|v| v.split(','))
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn minute_of_day(value: &str) -> BookingResult<u32> {
    let time = parse_time(value)?;
    Ok(time.hour() * 60 + time.minute())
}

impl MentorSearchQuery {
    fn availability(&self) -> BookingResult<Vec<WeeklyWindow>> {
        let days = list(&self.days);
        if days.is_empty() && self.from_time.is_none() && self.to_time.is_none() {
            return Ok(vec![]);
        }

        let start = self.from_time.as_deref().map(minute_of_day).transpose()?.unwrap_or(0);
        let end = self
            .to_time
            .as_deref()
            .map(minute_of_day)
            .transpose()?
            .unwrap_or(24 * 60);

        let days: Vec<u8> = if days.is_empty() {
            (0..=6).collect()
        } else {
            days.iter()
                .map(|d| {
                    d.parse()
                        .map_err(|_| BookingError::InvalidValue(format!("day `{d}`, expected 0..=6")))
                })
                .collect::<BookingResult<_>>()?
        };
        days.into_iter()
            .map(|day| WeeklyWindow::new(day, start, end))
            .collect()
    }

    fn needs(&self) -> BookingResult<StudentNeeds> {
        Ok(StudentNeeds {
            skill_level: self.skill_level.unwrap_or(SkillLevel::Beginner),
            goals: list(&self.goals),
            genres: list(&self.genres),
            price_range: PriceRange::new(self.min_price, self.max_price)?,
            availability: self.availability()?,
            previous_mentors: vec![],
        })
    }

    fn preferences(&self) -> MatchPreferences {
        MatchPreferences {
            prioritize_schedule: self.prioritize_schedule,
            prioritize_price: self.prioritize_price,
            prioritize_experience: self.prioritize_experience,
            exclude_previous: self.exclude_previous,
        }
    }

    fn instrument(&self) -> Option<&str> {
        self.instrument.as_deref().map(str::trim).filter(|i| !i.is_empty())
    }

    fn min_score(&self) -> u32 {
        self.min_score.unwrap_or(match self.instrument() {
            Some(_) => MIN_SCORE_WITH_INSTRUMENT,
            None => MIN_SCORE,
        })
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS)
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MentorSearchResponse {
    pub mentors: Vec<MentorMatch>,
    /// Mentors scored, before the score cut and the limit.
    pub total_found: usize,
    /// Mean score of the returned mentors, 0..=1.
    pub search_quality: f64,
}

impl MentorSearchResponse {
    fn new(ranked: Vec<MentorMatch>, min_score: u32, limit: usize) -> Self {
        let total_found = ranked.len();
        let mentors: Vec<MentorMatch> = ranked
            .into_iter()
            .filter(|m| m.score.total >= min_score)
            .take(limit)
            .collect();
        let search_quality = match mentors.len() {
            0 => 0.0,
            n => {
                let sum: u32 = mentors.iter().map(|m| m.score.total).sum();
                f64::from(sum) / n as f64 / f64::from(matching::MAX_SCORE)
            }
        };
        Self {
            mentors,
            total_found,
            search_quality,
        }
    }
}

pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/search", get(mentor_search_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::extract_context_fn,
        ))
        .with_state(state)
}

fn mentor_error(e: DatabaseError) -> WebError {
    WebError::database(UserEntity::get_resource_type(), e)
}

#[utoipa::path(
    get,
    path = "/api/v1/mentors/search",
    params(MentorSearchQuery),
    responses(
        (status = 200, description = "Mentors with open slots, best match first", body = MentorSearchResponse),
        (status = 400, description = "Invalid price range, day or time", body = ErrorResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse),
    ),
    tag = "mentors",
    security(("cookie" = []))
)]
pub async fn mentor_search_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Query(query): Query<MentorSearchQuery>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let mut needs = query.needs()?;
    let prefs = query.preferences();
    if prefs.exclude_previous {
        needs.previous_mentors = MentorDirectory::previous_mentors(state.pool(), user.user_id())
            .await
            .map_err(mentor_error)?;
    }

    let now = Utc::now();
    let horizon = now + Duration::days(SEARCH_HORIZON_DAYS);
    let mut mentors = MentorDirectory::open_profiles(state.pool(), now, horizon)
        .await
        .map_err(mentor_error)?;
    if let Some(instrument) = query.instrument() {
        mentors.retain(|m| m.teaches(instrument));
    }

    let ranked = matching::rank(&needs, mentors, prefs);
    let response = MentorSearchResponse::new(ranked, query.min_score(), query.limit());
    tracing::info!(
        total_found = response.total_found,
        returned = response.mentors.len(),
        search_quality = response.search_quality,
        "mentor search"
    );

    Ok((StatusCode::OK, Json(response)))
}
