use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(GroupId);
id_newtype!(MessageId);
id_newtype!(NotificationId);

// The server reports presence status as plain integers, so the enum
// round-trips through u8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PresenceStatus {
    Offline,
    Online,
    Busy,
    DoNotDisturb,
    Unknown(u8),
}

impl From<u8> for PresenceStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => PresenceStatus::Offline,
            1 => PresenceStatus::Online,
            2 => PresenceStatus::Busy,
            3 => PresenceStatus::DoNotDisturb,
            other => PresenceStatus::Unknown(other),
        }
    }
}

impl From<PresenceStatus> for u8 {
    fn from(status: PresenceStatus) -> Self {
        match status {
            PresenceStatus::Offline => 0,
            PresenceStatus::Online => 1,
            PresenceStatus::Busy => 2,
            PresenceStatus::DoNotDisturb => 3,
            PresenceStatus::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberProfile {
    pub user_id: UserId,
    pub full_name: String,
}
