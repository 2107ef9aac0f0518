//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data in the
//! corresponding `*_statuses` database table, and its name matches the
//! table's `name` column.

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in id order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Return the lowercase name used in API payloads.
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                Self::ALL.iter().copied().find(|s| s.id() == id)
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }
    };
}

define_status_enum! {
    /// Sample job lifecycle status.
    SampleJobStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Paused = 3 => "paused",
        Completed = 4 => "completed",
        Failed = 5 => "failed",
    }
}

define_status_enum! {
    /// Status of one work item within a sample job.
    SampleJobItemStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
        Skipped = 5 => "skipped",
    }
}

impl SampleJobStatus {
    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl SampleJobItemStatus {
    /// `completed`, `failed` and `skipped` items are never executed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(SampleJobStatus::Pending.id(), 1);
        assert_eq!(SampleJobStatus::Running.id(), 2);
        assert_eq!(SampleJobStatus::Paused.id(), 3);
        assert_eq!(SampleJobStatus::Completed.id(), 4);
        assert_eq!(SampleJobStatus::Failed.id(), 5);
    }

    #[test]
    fn item_status_ids_match_seed_data() {
        assert_eq!(SampleJobItemStatus::Pending.id(), 1);
        assert_eq!(SampleJobItemStatus::Running.id(), 2);
        assert_eq!(SampleJobItemStatus::Completed.id(), 3);
        assert_eq!(SampleJobItemStatus::Failed.id(), 4);
        assert_eq!(SampleJobItemStatus::Skipped.id(), 5);
    }

    #[test]
    fn from_id_round_trips_and_rejects_unknown() {
        for status in SampleJobStatus::ALL {
            assert_eq!(SampleJobStatus::from_id(status.id()), Some(*status));
        }
        assert_eq!(SampleJobItemStatus::from_id(0), None);
        assert_eq!(SampleJobItemStatus::from_id(6), None);
    }

    #[test]
    fn status_serializes_as_name() {
        let json = serde_json::to_string(&SampleJobStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!SampleJobStatus::Paused.is_terminal());
        assert!(SampleJobStatus::Failed.is_terminal());
        assert!(SampleJobItemStatus::Skipped.is_terminal());
        assert!(!SampleJobItemStatus::Running.is_terminal());
    }
}
