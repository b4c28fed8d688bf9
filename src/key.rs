use crate::error::{ProviderError, ProviderResult};
use std::fmt;

/// Reserved scope marker for data that does not belong to any guild.
pub const GLOBAL_SCOPE: &str = "global";

/// Separates the scope part of an absolute key from the logical key.
pub const SCOPE_SEPARATOR: char = ':';

/// Where a value lives: inside one guild, or in the global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope<'a> {
    Guild(&'a str),
    Global,
}

impl<'a> Scope<'a> {
    pub fn guild(id: &'a str) -> Self {
        Scope::Guild(id)
    }

    /// The guild id, or `None` for the global scope.
    pub fn id(&self) -> Option<&'a str> {
        match self {
            Scope::Guild(id) => Some(*id),
            Scope::Global => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    /// The prefix every absolute key in this scope starts with, separator included.
    pub fn prefix(&self) -> ProviderResult<String> {
        let name = match self {
            Scope::Guild(id) => validate_guild_id(id)?,
            Scope::Global => GLOBAL_SCOPE,
        };
        Ok(format!("{}{}", name, SCOPE_SEPARATOR))
    }
}

impl<'a> From<Option<&'a str>> for Scope<'a> {
    fn from(id: Option<&'a str>) -> Self {
        id.map_or(Scope::Global, Scope::Guild)
    }
}

impl fmt::Display for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Guild(id) => write!(f, "guild {}", id),
            Scope::Global => f.write_str(GLOBAL_SCOPE),
        }
    }
}

/// Resolve a logical key into the absolute key stored in the backend.
///
/// Guild ids can never contain the separator nor equal [`GLOBAL_SCOPE`], so the
/// first separator in an absolute key always ends the scope part. That keeps
/// every `(scope, key)` pair distinct and makes one scope's prefix unable to
/// match keys of another.
pub fn resolve_key(key: &str, scope: Scope<'_>) -> ProviderResult<String> {
    Ok(format!("{}{}", scope.prefix()?, key))
}

fn validate_guild_id(id: &str) -> ProviderResult<&str> {
    if id.is_empty() {
        return Err(ProviderError::InvalidScope(
            "guild id cannot be empty".to_string(),
        ));
    }

    if id.contains(SCOPE_SEPARATOR) {
        return Err(ProviderError::InvalidScope(format!(
            "guild id '{}' cannot contain '{}'",
            id, SCOPE_SEPARATOR
        )));
    }

    if id == GLOBAL_SCOPE {
        return Err(ProviderError::InvalidScope(format!(
            "guild id cannot be the reserved name '{}'",
            GLOBAL_SCOPE
        )));
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_keys_are_prefixed_with_the_guild_id() {
        assert_eq!(resolve_key("prefix", Scope::guild("123")).unwrap(), "123:prefix");
    }

    #[test]
    fn global_keys_use_the_reserved_marker() {
        assert_eq!(resolve_key("prefix", Scope::Global).unwrap(), "global:prefix");
    }

    #[test]
    fn logical_keys_may_contain_the_separator() {
        assert_eq!(
            resolve_key("music:volume", Scope::guild("42")).unwrap(),
            "42:music:volume"
        );
    }

    #[test]
    fn scope_prefix_ends_with_separator() {
        assert_eq!(Scope::guild("12").prefix().unwrap(), "12:");
        assert_eq!(Scope::Global.prefix().unwrap(), "global:");

        // "12:" is not a prefix of any key under "123".
        let other = resolve_key("a", Scope::guild("123")).unwrap();
        assert!(!other.starts_with(&Scope::guild("12").prefix().unwrap()));
    }

    #[test]
    fn rejects_ids_that_could_collide() {
        for id in ["", "a:b", "global"] {
            let err = resolve_key("k", Scope::guild(id)).unwrap_err();
            assert!(matches!(err, ProviderError::InvalidScope(_)), "id {:?}", id);
        }
    }

    #[test]
    fn option_converts_into_scope() {
        assert_eq!(Scope::from(Some("1")), Scope::Guild("1"));
        assert_eq!(Scope::from(None), Scope::Global);
        assert_eq!(Scope::Guild("1").id(), Some("1"));
        assert!(Scope::Global.is_global());
    }
}
