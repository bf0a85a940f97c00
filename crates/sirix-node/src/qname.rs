use sirix_types::{Result, SirixError};

/// A parsed, validated element/attribute/PI name: an optional namespace
/// prefix plus a local part (spec §3.1 glossary: QName). Namespace URI
/// resolution is a separate concern (`NamedData::uri_key`) — this type only
/// owns the lexical `prefix:local` structure and its NCName validity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local_name: String,
}

impl QName {
    /// Parses `qualified` as `[prefix:]local-name`, rejecting anything that
    /// isn't a valid NCName in either position.
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.split_once(':') {
            Some((prefix, local)) => {
                validate_ncname(prefix)?;
                validate_ncname(local)?;
                Ok(Self { prefix: Some(prefix.to_string()), local_name: local.to_string() })
            }
            None => {
                validate_ncname(qualified)?;
                Ok(Self { prefix: None, local_name: qualified.to_string() })
            }
        }
    }

    pub fn new(prefix: Option<&str>, local_name: &str) -> Result<Self> {
        if let Some(p) = prefix {
            validate_ncname(p)?;
        }
        validate_ncname(local_name)?;
        Ok(Self { prefix: prefix.map(str::to_string), local_name: local_name.to_string() })
    }

    /// Renders back to `prefix:local` or bare `local` form.
    pub fn to_qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }
}

/// Validates `name` against a practical subset of the XML NCName grammar:
/// non-empty, first character a letter or underscore, remaining characters
/// letters, digits, `-`, `_`, or `.`, and never containing `:` (that's the
/// prefix separator handled by the caller).
fn validate_ncname(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first = chars.next().ok_or(SirixError::Usage("NCName must not be empty"))?;
    if !(first.is_alphabetic() || first == '_') {
        return Err(SirixError::Usage("NCName must start with a letter or '_'"));
    }
    for c in chars {
        if !(c.is_alphanumeric() || c == '-' || c == '_' || c == '.') {
            return Err(SirixError::Usage(
                "NCName characters must be alphanumeric, '-', '_', or '.'",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_local_name() {
        let q = QName::parse("book").unwrap();
        assert_eq!(q.prefix, None);
        assert_eq!(q.local_name, "book");
    }

    #[test]
    fn parses_prefixed_name() {
        let q = QName::parse("ns1:book").unwrap();
        assert_eq!(q.prefix.as_deref(), Some("ns1"));
        assert_eq!(q.local_name, "book");
    }

    #[test]
    fn rejects_empty_local_name() {
        assert!(QName::parse("").is_err());
        assert!(QName::parse("ns1:").is_err());
    }

    #[test]
    fn rejects_name_starting_with_a_digit() {
        assert!(QName::parse("1book").is_err());
    }

    #[test]
    fn to_qualified_round_trips() {
        let q = QName::parse("ns1:book").unwrap();
        assert_eq!(q.to_qualified(), "ns1:book");
        let bare = QName::parse("book").unwrap();
        assert_eq!(bare.to_qualified(), "book");
    }
}
