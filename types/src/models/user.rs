use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Role;
use crate::Amount;

/// A registered account together with its wallet balances.
///
/// The password hash and refresh token never leave the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub bgmi_id: String,
    pub phone: String,
    pub upi_id: String,
    pub upi_name: String,
    pub team_name: String,
    pub avatar: String,
    pub file_id: String,
    pub role: Role,
    pub balance: Amount,
    pub bonus: Amount,
    pub referral_code: String,
    pub referred_by: Option<String>,
    #[serde(skip_serializing, default)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Players must have a game id and a phone number before joining anything.
    pub fn missing_player_details(&self) -> Option<&'static str> {
        if self.bgmi_id.trim().is_empty() {
            Some("BGMI ID missing please update your profile")
        } else if self.phone.trim().is_empty() {
            Some("Phone number missing please update your profile")
        } else {
            None
        }
    }
}

/// Fields a user may change on their own profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub bgmi_id: Option<String>,
    pub phone: Option<String>,
    pub upi_id: Option<String>,
    pub upi_name: Option<String>,
    pub team_name: Option<String>,
    pub avatar: Option<String>,
    pub file_id: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self == &ProfilePatch::default()
    }
}

/// Fields an admin may change on any account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountPatch {
    pub profile: ProfilePatch,
    pub role: Option<Role>,
    pub balance: Option<Amount>,
    pub bonus: Option<Amount>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self.profile.is_empty()
            && self.role.is_none()
            && self.balance.is_none()
            && self.bonus.is_none()
    }
}

impl ProfilePatch {
    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(bgmi_id) = self.bgmi_id {
            user.bgmi_id = bgmi_id;
        }
        if let Some(phone) = self.phone {
            user.phone = phone;
        }
        if let Some(upi_id) = self.upi_id {
            user.upi_id = upi_id;
        }
        if let Some(upi_name) = self.upi_name {
            user.upi_name = upi_name;
        }
        if let Some(team_name) = self.team_name {
            user.team_name = team_name;
        }
        if let Some(avatar) = self.avatar {
            user.avatar = avatar;
        }
        if let Some(file_id) = self.file_id {
            user.file_id = file_id;
        }
    }
}

impl AccountPatch {
    pub fn apply(self, user: &mut User) {
        self.profile.apply(user);
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(balance) = self.balance {
            user.balance = balance;
        }
        if let Some(bonus) = self.bonus {
            user.bonus = bonus;
        }
    }
}
