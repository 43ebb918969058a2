//! Rule-based mentor ranking.
//!
//! Every rule yields a small integer score, the weighted sum is capped at 100.
//! Mentor profiles are derived from open lesson slots: slot tags describe
//! what a mentor teaches, slot times when they teach.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::booking::{BookingError, BookingResult, text_enum};

text_enum! {
    SkillLevel, "skill level" {
        Beginner => "beginner",
        Intermediate => "intermediate",
        Advanced => "advanced",
        Professional => "professional",
    }
}

impl SkillLevel {
    fn rank(self) -> i32 {
        Self::ALL.iter().position(|l| *l == self).unwrap_or(0) as i32
    }
}

/// Level assumed for every mentor until profiles carry one.
pub const MENTOR_LEVEL: SkillLevel = SkillLevel::Advanced;
pub const RECOMMENDED_SCORE: u32 = 80;
pub const PERFECT_SCORE: u32 = 90;
pub const MAX_SCORE: u32 = 100;

const FULL_OVERLAP_MINUTES: u32 = 120;
const EXPERIENCED_AFTER: i64 = 10;
const MINUTES_PER_DAY: u32 = 24 * 60;

/// A recurring weekly window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct WeeklyWindow {
    /// 0 = Sunday .. 6 = Saturday
    pub day: u8,
    pub start_minute: u32,
    pub end_minute: u32,
}

impl WeeklyWindow {
    pub fn new(day: u8, start_minute: u32, end_minute: u32) -> BookingResult<Self> {
        if day > 6 {
            return Err(BookingError::InvalidValue(String::from("days must hold values 0..=6")));
        }
        if start_minute >= end_minute || end_minute > MINUTES_PER_DAY {
            return Err(BookingError::InvalidTimeRange);
        }
        Ok(Self {
            day,
            start_minute,
            end_minute,
        })
    }

    /// The part of a lesson that falls on its start day.
    fn of_lesson(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let start_minute = start.hour() * 60 + start.minute();
        let end_minute = if end.date_naive() == start.date_naive() {
            end.hour() * 60 + end.minute()
        } else {
            MINUTES_PER_DAY
        };
        Self {
            day: start.weekday().num_days_from_sunday() as u8,
            start_minute,
            end_minute: end_minute.max(start_minute),
        }
    }

    fn overlap(&self, other: &Self) -> u32 {
        if self.day != other.day {
            return 0;
        }
        let start = self.start_minute.max(other.start_minute);
        let end = self.end_minute.min(other.end_minute);
        end.saturating_sub(start)
    }
}

/// Inclusive budget per lesson hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PriceRange {
    pub min: i64,
    pub max: i64,
}

impl PriceRange {
    pub fn new(min: Option<i64>, max: Option<i64>) -> BookingResult<Self> {
        let range = Self {
            min: min.unwrap_or(0),
            max: max.unwrap_or(i64::MAX),
        };
        if range.min < 0 || range.min > range.max {
            return Err(BookingError::InvalidValue(String::from(
                "price range must satisfy 0 <= min_price <= max_price",
            )));
        }
        Ok(range)
    }
}

/// What the student is looking for.
#[derive(Debug, Clone)]
pub struct StudentNeeds {
    pub skill_level: SkillLevel,
    pub goals: Vec<String>,
    pub genres: Vec<String>,
    pub price_range: PriceRange,
    pub availability: Vec<WeeklyWindow>,
    /// Mentors who already taught the student.
    pub previous_mentors: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchPreferences {
    pub prioritize_schedule: bool,
    pub prioritize_price: bool,
    pub prioritize_experience: bool,
    pub exclude_previous: bool,
}

/// One lesson slot a mentor still offers.
#[derive(Debug, Clone)]
pub struct OpenSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MentorProfile {
    pub id: Uuid,
    pub username: String,
    pub skill_level: SkillLevel,
    /// Lower-cased slot tags: instruments, genres and teaching goals.
    pub tags: Vec<String>,
    pub hourly_price: i64,
    pub availability: Vec<WeeklyWindow>,
    pub completed_lessons: i64,
    pub open_slots: usize,
}

impl MentorProfile {
    /// `None` when the mentor offers nothing.
    pub fn from_slots(
        id: Uuid,
        username: String,
        slots: &[OpenSlot],
        completed_lessons: i64,
    ) -> Option<Self> {
        if slots.is_empty() {
            return None;
        }

        let tags: BTreeSet<String> = slots
            .iter()
            .flat_map(|s| s.tags.iter())
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let hourly: Vec<i128> = slots
            .iter()
            .filter_map(|s| {
                let minutes = (s.end_time - s.start_time).num_minutes();
                (minutes > 0).then(|| i128::from(s.price) * 60 / i128::from(minutes))
            })
            .collect();
        let hourly_price = match hourly.len() {
            0 => 0,
            n => i64::try_from(hourly.iter().sum::<i128>() / n as i128).unwrap_or(i64::MAX),
        };

        let mut availability: Vec<WeeklyWindow> = slots
            .iter()
            .map(|s| WeeklyWindow::of_lesson(s.start_time, s.end_time))
            .collect();
        availability.sort_by_key(|w| (w.day, w.start_minute, w.end_minute));
        availability.dedup();

        Some(Self {
            id,
            username,
            skill_level: MENTOR_LEVEL,
            tags: tags.into_iter().collect(),
            hourly_price,
            availability,
            completed_lessons,
            open_slots: slots.len(),
        })
    }

    pub fn teaches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        !term.is_empty()
            && self
                .tags
                .iter()
                .any(|tag| tag.contains(&term) || term.contains(tag.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct ScoreBreakdown {
    pub skill_level: u32,
    pub goal_alignment: u32,
    pub schedule_overlap: u32,
    pub price_compatibility: u32,
    pub experience: u32,
    pub genre_match: u32,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MatchScore {
    pub total: u32,
    pub breakdown: ScoreBreakdown,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MentorMatch {
    pub mentor: MentorProfile,
    pub score: MatchScore,
    pub is_recommended: bool,
    pub is_perfect_match: bool,
}

/// A mentor one level above the student fits best.
fn skill_level_score(student: SkillLevel, mentor: SkillLevel) -> u32 {
    let (s, m) = (student.rank(), mentor.rank());
    if m == s + 1 {
        return 25;
    }
    match (s - m).abs() {
        0 => 20,
        1 => 15,
        2 => 8,
        _ => 0,
    }
}

fn shared<'a>(wanted: &'a [String], offered: &[String]) -> Vec<&'a str> {
    wanted
        .iter()
        .filter(|w| offered.contains(w))
        .map(String::as_str)
        .collect()
}

/// Share of `wanted` found in `offered`, scaled to `points`. `default` when nothing is wanted.
fn share_score(wanted: &[String], offered: &[String], points: u32, default: u32) -> u32 {
    if wanted.is_empty() {
        return default;
    }
    let hits = shared(wanted, offered).len() as u32;
    let total = wanted.len() as u32;
    (hits * points * 2 + total) / (total * 2)
}

/// Full score from two hours of common weekly time.
fn schedule_score(student: &[WeeklyWindow], mentor: &[WeeklyWindow]) -> u32 {
    let minutes: u32 = student
        .iter()
        .flat_map(|s| mentor.iter().map(move |m| s.overlap(m)))
        .sum();
    let capped = minutes.min(FULL_OVERLAP_MINUTES);
    (capped * 20 * 2 + FULL_OVERLAP_MINUTES) / (FULL_OVERLAP_MINUTES * 2)
}

/// Full score inside the budget, less the further outside it.
fn price_score(range: PriceRange, price: i64) -> u32 {
    if (range.min..=range.max).contains(&price) {
        return 15;
    }
    let outside = if price < range.min {
        i128::from(range.min) - i128::from(price)
    } else {
        i128::from(price) - i128::from(range.max)
    };
    let width = i128::from(range.max) - i128::from(range.min);
    if outside * 2 <= width {
        10
    } else if outside <= width {
        5
    } else {
        0
    }
}

fn experience_score(completed_lessons: i64) -> u32 {
    completed_lessons.clamp(0, EXPERIENCED_AFTER) as u32
}

fn reasons(student: &StudentNeeds, mentor: &MentorProfile, breakdown: &ScoreBreakdown) -> Vec<String> {
    let mut out = Vec::new();
    if breakdown.skill_level >= 20 {
        out.push(format!("suits a {} student", student.skill_level));
    }
    let goals = shared(&student.goals, &mentor.tags);
    if !goals.is_empty() {
        out.push(format!("teaches {}", goals.join(", ")));
    }
    if breakdown.schedule_overlap >= 15 {
        out.push(String::from("schedules overlap"));
    }
    if breakdown.price_compatibility >= 12 {
        out.push(String::from("within budget"));
    }
    if mentor.completed_lessons >= EXPERIENCED_AFTER {
        out.push(format!("{} lessons taught", mentor.completed_lessons));
    }
    let genres = shared(&student.genres, &mentor.tags);
    if !genres.is_empty() {
        out.push(format!("plays {}", genres.join(", ")));
    }
    out
}

pub fn score(student: &StudentNeeds, mentor: &MentorProfile, prefs: MatchPreferences) -> MatchScore {
    if prefs.exclude_previous && student.previous_mentors.contains(&mentor.id) {
        return MatchScore {
            total: 0,
            breakdown: ScoreBreakdown::default(),
            reasons: vec![String::from("already taught this student")],
        };
    }

    let breakdown = ScoreBreakdown {
        skill_level: skill_level_score(student.skill_level, mentor.skill_level),
        goal_alignment: share_score(&student.goals, &mentor.tags, 20, 10),
        schedule_overlap: schedule_score(&student.availability, &mentor.availability),
        price_compatibility: price_score(student.price_range, mentor.hourly_price),
        experience: experience_score(mentor.completed_lessons),
        genre_match: share_score(&student.genres, &mentor.tags, 10, 5),
    };

    // weights in tenths
    let weight = |prioritized: bool| if prioritized { 15 } else { 10 };
    let weighted = breakdown.skill_level * 10
        + breakdown.goal_alignment * 10
        + breakdown.schedule_overlap * weight(prefs.prioritize_schedule)
        + breakdown.price_compatibility * weight(prefs.prioritize_price)
        + breakdown.experience * weight(prefs.prioritize_experience)
        + breakdown.genre_match * 10;

    MatchScore {
        total: ((weighted + 5) / 10).min(MAX_SCORE),
        reasons: reasons(student, mentor, &breakdown),
        breakdown,
    }
}

/// All mentors, best match first. Ties keep the input order.
pub fn rank(student: &StudentNeeds, mentors: Vec<MentorProfile>, prefs: MatchPreferences) -> Vec<MentorMatch> {
    let mut matches: Vec<MentorMatch> = mentors
        .into_iter()
        .map(|mentor| {
            let score = score(student, &mentor, prefs);
            MentorMatch {
                is_recommended: score.total >= RECOMMENDED_SCORE,
                is_perfect_match: score.total >= PERFECT_SCORE,
                mentor,
                score,
            }
        })
        .collect();
    matches.sort_by(|a, b| b.score.total.cmp(&a.score.total));
    matches
}
