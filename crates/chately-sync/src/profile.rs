use crate::{
    validate_identity, DocumentPath, DocumentStore, Error, FieldUpdates, Result, UserIdentity,
    UserProfile,
};
use serde::{Deserialize, Serialize};

/// Fields a user may change on their own profile. `None` leaves a field as it is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ProfileEdit {
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.bio.is_none() && self.location.is_none()
    }

    fn field_updates(&self) -> Result<FieldUpdates> {
        let mut fields = FieldUpdates::new();
        let edits = [
            ("displayName", &self.display_name),
            ("bio", &self.bio),
            ("location", &self.location),
        ];
        for (field, value) in edits {
            let Some(value) = value else { continue };
            let value = value.trim();
            if value.is_empty() {
                return Err(Error::InvalidProfile(format!("{} is blank", field)));
            }
            fields = fields.set(field, value);
        }
        Ok(fields)
    }
}

/// Reads `users/{uid}`.
pub fn load_profile(store: &dyn DocumentStore, uid: &UserIdentity) -> Result<Option<UserProfile>> {
    validate_identity(uid)?;
    let snapshot = store.get_document(&DocumentPath::user(uid)?)?;
    match snapshot.data {
        Some(data) => Ok(Some(serde_json::from_value(data)?)),
        None => Ok(None),
    }
}

/// Applies `edit` to an existing `users/{uid}` and returns the stored result.
///
/// Fails with [`crate::StoreError::NotFound`] when the profile was never created.
pub fn update_profile(
    store: &dyn DocumentStore,
    uid: &UserIdentity,
    edit: &ProfileEdit,
) -> Result<UserProfile> {
    validate_identity(uid)?;
    let fields = edit.field_updates()?;
    let path = DocumentPath::user(uid)?;
    if !fields.is_empty() {
        store.update_fields(&path, fields)?;
        tracing::info!(user = %uid, "updated profile");
    }
    load_profile(store, uid)?.ok_or_else(|| crate::StoreError::NotFound(path.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ensure_user_documents, AuthUser, InMemoryStore, StoreError};

    fn signed_up(store: &InMemoryStore, uid: &str) -> UserIdentity {
        let user = AuthUser::new(uid).with_display_name("Alice");
        ensure_user_documents(store, &user).unwrap();
        user.uid
    }

    #[test]
    fn display_name_change_keeps_other_fields() {
        let store = InMemoryStore::new();
        let alice = signed_up(&store, "alice");

        let profile = update_profile(&store, &alice, &ProfileEdit::display_name("  Ally ")).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ally"));
        assert_eq!(profile.bio, crate::DEFAULT_BIO);
        assert_eq!(profile.location, crate::DEFAULT_LOCATION);
        assert_eq!(load_profile(&store, &alice).unwrap(), Some(profile));
    }

    #[test]
    fn blank_field_is_rejected_without_writing() {
        let store = InMemoryStore::new();
        let alice = signed_up(&store, "alice");
        let edit = ProfileEdit {
            bio: Some("Rustacean".to_string()),
            location: Some("   ".to_string()),
            ..ProfileEdit::default()
        };

        assert!(matches!(
            update_profile(&store, &alice, &edit),
            Err(Error::InvalidProfile(_))
        ));
        let profile = load_profile(&store, &alice).unwrap().unwrap();
        assert_eq!(profile.bio, crate::DEFAULT_BIO);
    }

    #[test]
    fn missing_profile_is_not_found() {
        let store = InMemoryStore::new();
        let result = update_profile(&store, &UserIdentity::new("ghost"), &ProfileEdit::display_name("G"));
        assert!(matches!(result, Err(Error::Store(StoreError::NotFound(_)))));
    }

    #[test]
    fn empty_edit_returns_current_profile() {
        let store = InMemoryStore::new();
        let alice = signed_up(&store, "alice");
        assert!(ProfileEdit::default().is_empty());
        let profile = update_profile(&store, &alice, &ProfileEdit::default()).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Alice"));
    }
}
