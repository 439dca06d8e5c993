//! Naming conventions that derive table and key names from entity type names.

/// Strips any module path from a type name (`app::models::User` -> `User`).
#[must_use]
pub fn basename(type_name: &str) -> &str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}

/// Pluralizes an English word with the suffix rules the table names use.
#[must_use]
pub fn plural(word: &str) -> String {
    let lower = word.to_lowercase();
    let sibilant = ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| lower.ends_with(suffix));
    if sibilant {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

/// Table name for an entity type: pluralized, then lower-cased.
#[must_use]
pub fn table_name(type_name: &str) -> String {
    plural(basename(type_name)).to_lowercase()
}

/// Foreign-key column referencing an entity type: `{lowercased}_id`.
#[must_use]
pub fn foreign_key(type_name: &str) -> String {
    format!("{}_id", basename(type_name).to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(table_name("User"), "users");
        assert_eq!(table_name("Box"), "boxes");
        assert_eq!(table_name("Match"), "matches");
        assert_eq!(table_name("BlogPost"), "blogposts");
        assert_eq!(table_name("app::models::Address"), "addresses");
    }

    #[test]
    fn test_foreign_keys() {
        assert_eq!(foreign_key("User"), "user_id");
        assert_eq!(foreign_key("BlogPost"), "blogpost_id");
        assert_eq!(foreign_key("crate::Role"), "role_id");
    }
}
