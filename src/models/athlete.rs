// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Athlete physiology used by calorie estimation.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    /// Not reported; sex-specific regressions are skipped.
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    Light,
    Moderate,
    Active,
    VeryActive,
}

impl ActivityLevel {
    /// Classify from the number of workouts in the last 30 days.
    pub fn from_monthly_workouts(count: usize) -> Self {
        match count {
            n if n > 20 => ActivityLevel::VeryActive,
            n if n > 12 => ActivityLevel::Active,
            n if n > 6 => ActivityLevel::Moderate,
            n if n > 0 => ActivityLevel::Light,
            _ => ActivityLevel::Sedentary,
        }
    }
}

/// Resting heart rate assumed when the profile has none.
pub const DEFAULT_RESTING_HR: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AthleteProfile {
    #[validate(length(min = 1))]
    pub athlete_id: String,
    #[validate(range(min = 10, max = 110))]
    pub age: u32,
    pub gender: Gender,
    #[validate(range(min = 25.0, max = 350.0))]
    pub weight_kg: f64,
    #[validate(range(min = 100.0, max = 250.0))]
    pub height_cm: Option<f64>,
    #[validate(range(min = 10.0, max = 100.0))]
    pub vo2max: Option<f64>,
    #[validate(range(min = 25.0, max = 120.0))]
    pub resting_hr: Option<f64>,
    #[validate(range(min = 100.0, max = 230.0))]
    pub max_hr: Option<f64>,
    pub activity_level: ActivityLevel,
}

impl AthleteProfile {
    /// Conservative stand-in used until a real profile is stored.
    pub fn default_for(athlete_id: &str) -> Self {
        Self {
            athlete_id: athlete_id.to_string(),
            age: 35,
            gender: Gender::Male,
            weight_kg: 70.0,
            height_cm: None,
            vo2max: None,
            resting_hr: None,
            max_hr: None,
            activity_level: ActivityLevel::Moderate,
        }
    }

    /// Max heart rate, falling back to `220 - age`.
    pub fn effective_max_hr(&self) -> f64 {
        self.max_hr.unwrap_or(220.0 - self.age as f64)
    }

    pub fn effective_resting_hr(&self) -> f64 {
        self.resting_hr.unwrap_or(DEFAULT_RESTING_HR)
    }

    /// Heart-rate reserve in bpm; `None` if max is not above resting.
    pub fn heart_rate_reserve(&self) -> Option<f64> {
        let reserve = self.effective_max_hr() - self.effective_resting_hr();
        (reserve > 0.0).then_some(reserve)
    }

    /// Basal metabolic rate (kcal/day, Mifflin-St Jeor). Needs height.
    pub fn bmr(&self) -> Option<f64> {
        let height = self.height_cm?;
        let base = 10.0 * self.weight_kg + 6.25 * height - 5.0 * self.age as f64;
        match self.gender {
            Gender::Male => Some(base + 5.0),
            Gender::Female => Some(base - 161.0),
            Gender::Unspecified => Some(base - 78.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        let profile = AthleteProfile::default_for("a1");
        assert!(profile.validate().is_ok());
        assert_eq!(profile.effective_max_hr(), 185.0);
        assert_eq!(profile.heart_rate_reserve(), Some(125.0));
    }

    #[test]
    fn test_validation_rejects_implausible_weight() {
        let mut profile = AthleteProfile::default_for("a1");
        profile.weight_kg = 3.0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_bmr_needs_height() {
        let mut profile = AthleteProfile::default_for("a1");
        assert_eq!(profile.bmr(), None);
        profile.height_cm = Some(180.0);
        // 700 + 1125 - 175 + 5
        assert_eq!(profile.bmr(), Some(1655.0));
    }

    #[test]
    fn test_activity_level_buckets() {
        assert_eq!(
            ActivityLevel::from_monthly_workouts(25),
            ActivityLevel::VeryActive
        );
        assert_eq!(
            ActivityLevel::from_monthly_workouts(13),
            ActivityLevel::Active
        );
        assert_eq!(
            ActivityLevel::from_monthly_workouts(7),
            ActivityLevel::Moderate
        );
        assert_eq!(
            ActivityLevel::from_monthly_workouts(2),
            ActivityLevel::Light
        );
        assert_eq!(
            ActivityLevel::from_monthly_workouts(0),
            ActivityLevel::Sedentary
        );
    }
}
