use crate::{ConversationId, Error, Result, UserIdentity};

/// Joins the two identities of a conversation key. Never valid inside an identity.
pub const CONVERSATION_SEPARATOR: char = '+';

/// Checks that an identity can be used as a document id and as a field-path segment.
pub fn validate_identity(id: &UserIdentity) -> Result<()> {
    let raw = id.as_str();
    if raw.is_empty() {
        return Err(Error::InvalidIdentity("identity is empty".to_string()));
    }
    if raw.contains(['/', '.']) {
        return Err(Error::InvalidIdentity(format!(
            "identity {:?} contains a path separator",
            raw
        )));
    }
    if raw.contains(CONVERSATION_SEPARATOR) {
        return Err(Error::InvalidIdentity(format!(
            "identity {:?} contains {:?}",
            raw, CONVERSATION_SEPARATOR
        )));
    }
    Ok(())
}

/// Derives the key of the conversation between `a` and `b`.
///
/// The lexicographically greater identity comes first, so the result does not
/// depend on argument order. Identities cannot contain the separator, so two
/// different pairs never share a key.
pub fn derive_conversation_id(a: &UserIdentity, b: &UserIdentity) -> Result<ConversationId> {
    validate_identity(a)?;
    validate_identity(b)?;

    let (high, low) = if a >= b { (a, b) } else { (b, a) };
    Ok(ConversationId::from_canonical(format!(
        "{}{}{}",
        high.as_str(),
        CONVERSATION_SEPARATOR,
        low.as_str()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> UserIdentity {
        UserIdentity::new(raw)
    }

    #[test]
    fn derivation_is_commutative() {
        let pairs = [
            ("alice", "bob"),
            ("bob", "alice"),
            ("Zed", "zed"),
            ("u1", "u10"),
            ("same", "same"),
            ("KpX3", "9aQ"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                derive_conversation_id(&id(a), &id(b)).unwrap(),
                derive_conversation_id(&id(b), &id(a)).unwrap(),
                "pair ({}, {})",
                a,
                b
            );
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let first = derive_conversation_id(&id("alice"), &id("bob")).unwrap();
        let second = derive_conversation_id(&id("alice"), &id("bob")).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "bob+alice");
    }

    #[test]
    fn identical_identities_are_ordered_consistently() {
        let conversation = derive_conversation_id(&id("alice"), &id("alice")).unwrap();
        assert_eq!(conversation.as_str(), "alice+alice");
    }

    #[test]
    fn empty_identity_is_rejected() {
        assert!(matches!(
            derive_conversation_id(&id(""), &id("bob")),
            Err(Error::InvalidIdentity(_))
        ));
        assert!(matches!(
            derive_conversation_id(&id("alice"), &id("")),
            Err(Error::InvalidIdentity(_))
        ));
    }

    #[test]
    fn separators_are_rejected() {
        assert!(derive_conversation_id(&id("a/b"), &id("bob")).is_err());
        assert!(derive_conversation_id(&id("alice"), &id("b.ob")).is_err());
        assert!(matches!(
            derive_conversation_id(&id("al+ice"), &id("bob")),
            Err(Error::InvalidIdentity(_))
        ));
    }

    #[test]
    fn split_points_give_distinct_keys() {
        let left = derive_conversation_id(&id("c"), &id("ab")).unwrap();
        let right = derive_conversation_id(&id("ca"), &id("b")).unwrap();
        assert_ne!(left, right);
        assert_eq!(left.as_str(), "c+ab");
        assert_eq!(right.as_str(), "ca+b");
    }
}
