use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ROLE: &str = "user";

/// A storefront account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated registration data, password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Profile fields a user may change about themselves. Absent fields are
/// left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_never_serialized() {
        let now = Utc::now();
        let user = User {
            id: 1,
            username: "shopper".to_string(),
            email: "shopper@example.com".to_string(),
            password_hash: "$2b$04$secret".to_string(),
            role: DEFAULT_ROLE.to_string(),
            active: true,
            email_verified: false,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["username"], "shopper");
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_user_patch_fields_are_optional() {
        let patch: UserPatch = serde_json::from_str(r#"{"username": "newname"}"#).unwrap();
        assert_eq!(patch.username.as_deref(), Some("newname"));
        assert!(patch.email.is_none());
        assert!(!patch.is_empty());

        let empty: UserPatch = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
