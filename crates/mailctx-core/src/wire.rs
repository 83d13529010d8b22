//! Closed enumerations shared by records, storage and the CLI.
//!
//! Each enum is declared once through [`wire_enum!`], which emits the variant
//! list, a numeric code and a symbolic name per variant, and the conversions
//! built on them. Adding a variant without both mappings does not compile.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($variant:ident = $code:literal => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
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

            /// Accepts the wire name in any case, with `-` or spaces for `_`.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
                match normalized.as_str() {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: s.to_owned(),
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

wire_enum! {
    /// Lifecycle of a project derived from email topics.
    ProjectStatus ("project status") {
        Active = 1 => "ACTIVE",
        Completed = 2 => "COMPLETED",
        OnHold = 3 => "ON_HOLD",
        Archived = 4 => "ARCHIVED",
    }
}

wire_enum! {
    /// How a correspondent relates to the mailbox owner.
    RelationshipType ("relationship type") {
        TeamMember = 1 => "TEAM_MEMBER",
        Stakeholder = 2 => "STAKEHOLDER",
        Client = 3 => "CLIENT",
        Vendor = 4 => "VENDOR",
    }
}

wire_enum! {
    ResponseTone ("response tone") {
        Professional = 1 => "PROFESSIONAL",
        Friendly = 2 => "FRIENDLY",
        Formal = 3 => "FORMAL",
        Casual = 4 => "CASUAL",
    }
}

wire_enum! {
    ResponseStatus ("response status") {
        Draft = 1 => "DRAFT",
        Generated = 2 => "GENERATED",
        Customized = 3 => "CUSTOMIZED",
        Sent = 4 => "SENT",
    }
}

wire_enum! {
    /// Grouping used to pick a template for an incoming message.
    TemplateCategory ("template category") {
        Acknowledgement = 1 => "ACKNOWLEDGEMENT",
        FollowUp = 2 => "FOLLOW_UP",
        MeetingRequest = 3 => "MEETING_REQUEST",
        StatusUpdate = 4 => "STATUS_UPDATE",
        Inquiry = 5 => "INQUIRY",
        General = 6 => "GENERAL",
    }
}

impl Default for ResponseTone {
    fn default() -> Self {
        Self::Professional
    }
}

impl Default for TemplateCategory {
    fn default() -> Self {
        Self::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn check_table<T>(all: &[T], code: fn(T) -> u8, name: fn(T) -> &'static str, from_code: fn(u8) -> Option<T>)
    where
        T: Copy + PartialEq + fmt::Debug + FromStr + Serialize + for<'de> Deserialize<'de>,
        <T as FromStr>::Err: fmt::Debug,
    {
        let mut codes = HashSet::new();
        let mut names = HashSet::new();
        for &v in all {
            assert!(codes.insert(code(v)), "duplicate code for {v:?}");
            assert!(names.insert(name(v)), "duplicate name for {v:?}");
            assert_eq!(from_code(code(v)), Some(v));
            assert_eq!(name(v).parse::<T>().unwrap(), v);
            let json = serde_json::to_string(&v).unwrap();
            assert_eq!(json, format!("\"{}\"", name(v)));
            assert_eq!(serde_json::from_str::<T>(&json).unwrap(), v);
        }
        assert_eq!(from_code(0), None);
    }

    #[test]
    fn project_status_table() {
        check_table(ProjectStatus::ALL, ProjectStatus::code, ProjectStatus::as_str, ProjectStatus::from_code);
    }

    #[test]
    fn relationship_type_table() {
        check_table(
            RelationshipType::ALL,
            RelationshipType::code,
            RelationshipType::as_str,
            RelationshipType::from_code,
        );
    }

    #[test]
    fn response_tone_table() {
        check_table(ResponseTone::ALL, ResponseTone::code, ResponseTone::as_str, ResponseTone::from_code);
    }

    #[test]
    fn response_status_table() {
        check_table(ResponseStatus::ALL, ResponseStatus::code, ResponseStatus::as_str, ResponseStatus::from_code);
    }

    #[test]
    fn template_category_table() {
        check_table(
            TemplateCategory::ALL,
            TemplateCategory::code,
            TemplateCategory::as_str,
            TemplateCategory::from_code,
        );
    }

    #[test]
    fn lenient_parsing() {
        assert_eq!("follow-up".parse::<TemplateCategory>().unwrap(), TemplateCategory::FollowUp);
        assert_eq!("on hold".parse::<ProjectStatus>().unwrap(), ProjectStatus::OnHold);
        assert_eq!(" casual ".parse::<ResponseTone>().unwrap(), ResponseTone::Casual);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let err = "sarcastic".parse::<ResponseTone>().unwrap_err();
        assert_eq!(err.kind, "response tone");
        assert!(serde_json::from_str::<ResponseStatus>("\"LOST\"").is_err());
    }
}
