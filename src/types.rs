//! Enumerations shared by the data layer, services and routes.
//!
//! Every enum is stored as `TEXT` in Postgres using its `SCREAMING_SNAKE_CASE`
//! name and serialized the same way over JSON, so row structs can decode
//! them directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::Postgres;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let normalized = value.trim().to_ascii_uppercase();
                match normalized.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $label, value: value.to_string() }),
                }
            }
        }

        impl sqlx::Type<Postgres> for $name {
            fn type_info() -> PgTypeInfo {
                <&str as sqlx::Type<Postgres>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <&str as sqlx::Type<Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, Postgres> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let raw = <&str as sqlx::Decode<Postgres>>::decode(value)?;
                Ok(raw.parse::<$name>()?)
            }
        }

        impl<'q> sqlx::Encode<'q, Postgres> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

text_enum!(Role, "role", {
    Student => "STUDENT",
    Tutor => "TUTOR",
    Admin => "ADMIN",
});

text_enum!(CourseLevel, "course level", {
    Beginner => "BEGINNER",
    Intermediate => "INTERMEDIATE",
    Advanced => "ADVANCED",
});

text_enum!(MaterialKind, "material kind", {
    Pdf => "PDF",
    Video => "VIDEO",
    Audio => "AUDIO",
    Link => "LINK",
    Text => "TEXT",
});

text_enum!(QuestionKind, "question kind", {
    SingleChoice => "SINGLE_CHOICE",
    MultipleChoice => "MULTIPLE_CHOICE",
    TrueFalse => "TRUE_FALSE",
    ShortAnswer => "SHORT_ANSWER",
});

text_enum!(PaymentChannel, "payment channel", {
    Whatsapp => "WHATSAPP",
    Telegram => "TELEGRAM",
});

text_enum!(EnrollmentStatus, "enrollment status", {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
    Active => "ACTIVE",
});

text_enum!(ChallengeMetric, "challenge metric", {
    MaterialsCompleted => "MATERIALS_COMPLETED",
    TestsPassed => "TESTS_PASSED",
    StudyDays => "STUDY_DAYS",
    PointsEarned => "POINTS_EARNED",
});

text_enum!(LeaderboardPeriod, "leaderboard period", {
    Week => "WEEK",
    Month => "MONTH",
    All => "ALL",
});

impl MaterialKind {
    pub fn requires_url(&self) -> bool {
        !matches!(self, MaterialKind::Text)
    }
}

impl LeaderboardPeriod {
    pub fn lookback_days(&self) -> Option<i64> {
        match self {
            LeaderboardPeriod::Week => Some(7),
            LeaderboardPeriod::Month => Some(30),
            LeaderboardPeriod::All => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("tutor".parse::<Role>(), Ok(Role::Tutor));
        assert_eq!(" single_choice ".parse::<QuestionKind>(), Ok(QuestionKind::SingleChoice));
        assert!("MANAGER".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&ChallengeMetric::MaterialsCompleted).unwrap();
        assert_eq!(json, "\"MATERIALS_COMPLETED\"");
        let parsed: PaymentChannel = serde_json::from_str("\"TELEGRAM\"").unwrap();
        assert_eq!(parsed, PaymentChannel::Telegram);
    }

    #[test]
    fn as_str_matches_serde_name() {
        for kind in MaterialKind::ALL {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.as_str());
        }
    }
}
