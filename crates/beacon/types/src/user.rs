//! User records

use crate::{Provider, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user created at external-login upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub public_picture_url: String,
    #[serde(skip)]
    pub provider: Option<Provider>,
    #[serde(skip)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Build the user row for a login, keyed by the provider-derived id.
    pub fn from_login(
        profile: UserProfile,
        provider: Provider,
        provider_key: &[u8],
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UserId::from_provider(provider, provider_key),
            email: profile.email,
            given_name: profile.given_name,
            family_name: profile.family_name,
            public_picture_url: profile.public_picture_url,
            provider: Some(provider),
            created_at: Some(created_at),
        }
    }
}

/// Profile fields reported by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub public_picture_url: String,
}

/// How to locate a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(UserId),
    Email(String),
}

impl std::fmt::Display for UserLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserLookup::Id(id) => write!(f, "id={id}"),
            UserLookup::Email(email) => write!(f, "email={email}"),
        }
    }
}
