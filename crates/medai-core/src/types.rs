use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::MedaiError;

// =============================================================================
// Enums
// =============================================================================

/// Classification tag stored with every conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// The classifier accepted the message as medical.
    Medical,
    /// The classifier rejected the message; the canned refusal was returned.
    NonMedical,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Medical => "medical",
            QueryType::NonMedical => "non_medical",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = MedaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medical" => Ok(QueryType::Medical),
            "non_medical" => Ok(QueryType::NonMedical),
            other => Err(MedaiError::Validation(format!(
                "unknown query type '{}'",
                other
            ))),
        }
    }
}

/// ABO/Rh blood group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodGroup {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodGroup {
    pub const ALL: [BloodGroup; 8] = [
        BloodGroup::APositive,
        BloodGroup::ANegative,
        BloodGroup::BPositive,
        BloodGroup::BNegative,
        BloodGroup::AbPositive,
        BloodGroup::AbNegative,
        BloodGroup::OPositive,
        BloodGroup::ONegative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloodGroup::APositive => "A+",
            BloodGroup::ANegative => "A-",
            BloodGroup::BPositive => "B+",
            BloodGroup::BNegative => "B-",
            BloodGroup::AbPositive => "AB+",
            BloodGroup::AbNegative => "AB-",
            BloodGroup::OPositive => "O+",
            BloodGroup::ONegative => "O-",
        }
    }
}

impl fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodGroup {
    type Err = MedaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        BloodGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == wanted)
            .ok_or_else(|| MedaiError::Validation(format!("invalid blood group '{}'", s.trim())))
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// A registered account.
#[derive(Clone, Debug, Serialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    /// Encoded PBKDF2 hash; never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The authenticated caller attached to a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

impl From<&UserAccount> for Identity {
    fn from(user: &UserAccount) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
        }
    }
}

// =============================================================================
// Medical profile
// =============================================================================

/// Structured medical attributes owned by exactly one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MedicalProfile {
    pub user_id: Uuid,
    pub age: Option<u32>,
    pub blood_group: Option<BloodGroup>,
    /// Height in centimetres.
    pub height: Option<f64>,
    /// Weight in kilograms.
    pub weight: Option<f64>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
    pub current_medications: Option<String>,
    pub previous_surgeries: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MedicalProfile {
    /// A profile with every field absent.
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            age: None,
            blood_group: None,
            height: None,
            weight: None,
            allergies: None,
            chronic_conditions: None,
            current_medications: None,
            previous_surgeries: None,
            updated_at: now,
        }
    }

    /// Replace every attribute with the values of `update`.
    pub fn apply(&mut self, update: &ProfileUpdate, now: DateTime<Utc>) {
        self.age = update.age;
        self.blood_group = update.blood_group;
        self.height = update.height;
        self.weight = update.weight;
        self.allergies = update.allergies.clone();
        self.chronic_conditions = update.chronic_conditions.clone();
        self.current_medications = update.current_medications.clone();
        self.previous_surgeries = update.previous_surgeries.clone();
        self.updated_at = now;
    }
}

/// Full replacement of a profile's attributes, as submitted by its owner.
///
/// Accepts JSON numbers or form strings; empty strings mean "absent".
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, deserialize_with = "lenient_opt")]
    pub age: Option<u32>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub blood_group: Option<BloodGroup>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub height: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub weight: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub allergies: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub chronic_conditions: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub current_medications: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub previous_surgeries: Option<String>,
}

impl ProfileUpdate {
    /// Reject values no human profile can hold.
    pub fn validate(&self) -> Result<(), MedaiError> {
        if let Some(age) = self.age {
            if age > 150 {
                return Err(MedaiError::Validation(format!(
                    "age must be between 0 and 150, got {}",
                    age
                )));
            }
        }
        for (label, value) in [("height", self.height), ("weight", self.weight)] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(MedaiError::Validation(format!(
                        "{} must be a positive number",
                        label
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Conversation log
// =============================================================================

/// One persisted message/response pair. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_message: String,
    pub ai_response: String,
    pub timestamp: DateTime<Utc>,
    pub query_type: QueryType,
}

impl ConversationTurn {
    pub fn new(
        user_id: Uuid,
        user_message: impl Into<String>,
        ai_response: impl Into<String>,
        query_type: QueryType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            timestamp: Utc::now(),
            query_type,
        }
    }
}

// =============================================================================
// Deserialization helpers for form-or-JSON input
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueOrText<T> {
    Value(T),
    Text(String),
}

/// Accept a typed value, a parseable string, an empty string or null.
fn lenient_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    match Option::<ValueOrText<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(ValueOrText::Value(v)) => Ok(Some(v)),
        Some(ValueOrText::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                trimmed
                    .parse::<T>()
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
        }
    }
}

/// Trim free text; blank becomes `None`.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_round_trip_str() {
        for qt in [QueryType::Medical, QueryType::NonMedical] {
            assert_eq!(qt.as_str().parse::<QueryType>().unwrap(), qt);
        }
        assert!("other".parse::<QueryType>().is_err());
    }

    #[test]
    fn test_query_type_serde() {
        assert_eq!(
            serde_json::to_string(&QueryType::NonMedical).unwrap(),
            "\"non_medical\""
        );
    }

    #[test]
    fn test_blood_group_parse() {
        assert_eq!("O+".parse::<BloodGroup>().unwrap(), BloodGroup::OPositive);
        assert_eq!(" ab- ".parse::<BloodGroup>().unwrap(), BloodGroup::AbNegative);
        assert!("C+".parse::<BloodGroup>().is_err());
        assert!("".parse::<BloodGroup>().is_err());
    }

    #[test]
    fn test_blood_group_all_distinct_labels() {
        let labels: std::collections::HashSet<_> =
            BloodGroup::ALL.iter().map(|g| g.as_str()).collect();
        assert_eq!(labels.len(), 8);
    }

    #[test]
    fn test_blood_group_serde_uses_symbols() {
        assert_eq!(
            serde_json::to_string(&BloodGroup::AbPositive).unwrap(),
            "\"AB+\""
        );
        let g: BloodGroup = serde_json::from_str("\"O-\"").unwrap();
        assert_eq!(g, BloodGroup::ONegative);
    }

    #[test]
    fn test_profile_update_from_json_numbers() {
        let update: ProfileUpdate = serde_json::from_str(
            r#"{"age": 34, "blood_group": "O+", "height": 175.5, "weight": 70, "allergies": "penicillin"}"#,
        )
        .unwrap();
        assert_eq!(update.age, Some(34));
        assert_eq!(update.blood_group, Some(BloodGroup::OPositive));
        assert_eq!(update.height, Some(175.5));
        assert_eq!(update.weight, Some(70.0));
        assert_eq!(update.allergies.as_deref(), Some("penicillin"));
        assert!(update.chronic_conditions.is_none());
    }

    #[test]
    fn test_profile_update_from_json_strings_and_blanks() {
        let update: ProfileUpdate = serde_json::from_str(
            r#"{"age": "41", "blood_group": "", "height": " ", "weight": null, "allergies": "   "}"#,
        )
        .unwrap();
        assert_eq!(update.age, Some(41));
        assert!(update.blood_group.is_none());
        assert!(update.height.is_none());
        assert!(update.weight.is_none());
        assert!(update.allergies.is_none());
    }

    #[test]
    fn test_profile_update_rejects_garbage_number() {
        let result: Result<ProfileUpdate, _> = serde_json::from_str(r#"{"age": "old"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_profile_update_validate() {
        let ok = ProfileUpdate {
            age: Some(0),
            height: Some(50.0),
            ..ProfileUpdate::default()
        };
        assert!(ok.validate().is_ok());

        let too_old = ProfileUpdate {
            age: Some(151),
            ..ProfileUpdate::default()
        };
        assert!(matches!(too_old.validate(), Err(MedaiError::Validation(_))));

        let negative = ProfileUpdate {
            weight: Some(-1.0),
            ..ProfileUpdate::default()
        };
        assert!(negative.validate().is_err());

        let nan = ProfileUpdate {
            height: Some(f64::NAN),
            ..ProfileUpdate::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_profile_apply_replaces_all_fields() {
        let user_id = Uuid::new_v4();
        let start = Utc::now() - chrono::Duration::hours(1);
        let mut profile = MedicalProfile::empty(user_id, start);
        profile.allergies = Some("dust".to_string());

        let now = Utc::now();
        let update = ProfileUpdate {
            age: Some(34),
            blood_group: Some(BloodGroup::OPositive),
            ..ProfileUpdate::default()
        };
        profile.apply(&update, now);

        assert_eq!(profile.age, Some(34));
        assert_eq!(profile.blood_group, Some(BloodGroup::OPositive));
        assert!(profile.allergies.is_none());
        assert_eq!(profile.updated_at, now);
    }

    #[test]
    fn test_user_account_hides_password_hash() {
        let user = UserAccount {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: None,
            password_hash: "pbkdf2-sha256$1$00$00".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert_eq!(Identity::from(&user).username, "alice");
    }
}
