//! External collaborator seams: the identity and profile directories.
//!
//! The engine only consumes these; real deployments back them with the
//! platform's user service. [`InMemoryDirectory`] is enough for tests and
//! single-process embedding.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Suspended,
    Deactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Limited,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    pub status: UserStatus,
    pub email_verified: bool,
    pub admin: bool,
}

#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub id: String,
    pub user_id: String,
    pub availability: Availability,
    pub average_rating: f64,
    pub total_reviews: u32,
    pub headline: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub availability: Option<Availability>,
    pub average_rating: Option<f64>,
    pub total_reviews: Option<u32>,
}

pub trait UserDirectory {
    fn find_user_by_id(&self, id: &str) -> Option<UserRecord>;
}

pub trait ProfileDirectory {
    fn find_profile_by_id(&self, id: &str) -> Option<ProfileRecord>;
    fn update_profile(&self, id: &str, patch: ProfilePatch) -> anyhow::Result<()>;
}

impl<T: UserDirectory> UserDirectory for Arc<T> {
    fn find_user_by_id(&self, id: &str) -> Option<UserRecord> {
        (**self).find_user_by_id(id)
    }
}

impl<T: ProfileDirectory> ProfileDirectory for Arc<T> {
    fn find_profile_by_id(&self, id: &str) -> Option<ProfileRecord> {
        (**self).find_profile_by_id(id)
    }
    fn update_profile(&self, id: &str, patch: ProfilePatch) -> anyhow::Result<()> {
        (**self).update_profile(id, patch)
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
    profiles: RwLock<HashMap<String, ProfileRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.users.write().unwrap().insert(user.id.clone(), user);
    }

    pub fn insert_profile(&self, profile: ProfileRecord) {
        self.profiles
            .write()
            .unwrap()
            .insert(profile.id.clone(), profile);
    }
}

impl UserDirectory for InMemoryDirectory {
    fn find_user_by_id(&self, id: &str) -> Option<UserRecord> {
        self.users.read().unwrap().get(id).cloned()
    }
}

impl ProfileDirectory for InMemoryDirectory {
    fn find_profile_by_id(&self, id: &str) -> Option<ProfileRecord> {
        self.profiles.read().unwrap().get(id).cloned()
    }

    fn update_profile(&self, id: &str, patch: ProfilePatch) -> anyhow::Result<()> {
        let mut profiles = self.profiles.write().unwrap();
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("profile {id} not found"))?;
        if let Some(availability) = patch.availability {
            profile.availability = availability;
        }
        if let Some(rating) = patch.average_rating {
            profile.average_rating = rating;
        }
        if let Some(reviews) = patch.total_reviews {
            profile.total_reviews = reviews;
        }
        Ok(())
    }
}
