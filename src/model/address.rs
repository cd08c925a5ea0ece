//! Sender address parsing (RFC 5322 §3.4) and sender-key normalization.

/// Sender key used when a message carries no usable `From` value.
pub const UNKNOWN_SENDER: &str = "unknown";

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Build an address from its parts.
    pub fn new(display_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            address: address.into(),
        }
    }

    /// Parse a single email address from a header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    ///
    /// If parsing fails, the raw string is stored as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::new("", "");
        }

        // "Display Name <address>" or "<address>"
        if let (Some(angle_start), Some(angle_end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if angle_end > angle_start {
                let addr = trimmed[angle_start + 1..angle_end].trim();
                let display_name = strip_quotes(&trimmed[..angle_start]);
                return Self::new(display_name, addr);
            }
        }

        Self::new("", trimmed)
    }

    /// Normalized grouping key for this sender.
    ///
    /// The local part is kept exactly as written; the domain is compared
    /// case-insensitively, so it is lowercased. Values without an `@` are
    /// lowercased whole, and an empty address maps to [`UNKNOWN_SENDER`].
    pub fn sender_key(&self) -> String {
        let addr = self.address.trim();
        if addr.is_empty() {
            return UNKNOWN_SENDER.to_string();
        }
        match addr.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                format!("{local}@{}", domain.to_lowercase())
            }
            _ => addr.to_lowercase(),
        }
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr = EmailAddress::parse("user@example.com");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "");
    }

    #[test]
    fn test_parse_angle_address() {
        let addr = EmailAddress::parse("<user@example.com>");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "");
    }

    #[test]
    fn test_parse_quoted_name() {
        let addr = EmailAddress::parse("\"Last, First\" <user@example.com>");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "Last, First");
    }

    #[test]
    fn test_sender_key_lowercases_domain_only() {
        let addr = EmailAddress::parse("News <Deals@Shop.EXAMPLE.com>");
        assert_eq!(addr.sender_key(), "Deals@shop.example.com");
    }

    #[test]
    fn test_sender_key_same_for_display_variants() {
        let a = EmailAddress::parse("Alice <alice@x.com>");
        let b = EmailAddress::parse("alice@X.COM");
        assert_eq!(a.sender_key(), b.sender_key());
    }

    #[test]
    fn test_sender_key_local_part_is_case_sensitive() {
        let a = EmailAddress::parse("Alice@x.com");
        let b = EmailAddress::parse("alice@x.com");
        assert_ne!(a.sender_key(), b.sender_key());
    }

    #[test]
    fn test_sender_key_fallbacks() {
        assert_eq!(EmailAddress::parse("").sender_key(), UNKNOWN_SENDER);
        assert_eq!(
            EmailAddress::parse("Mailer Daemon").sender_key(),
            "mailer daemon"
        );
    }

    #[test]
    fn test_display_with_name() {
        let addr = EmailAddress::new("Alice", "alice@example.com");
        assert_eq!(addr.display(), "Alice <alice@example.com>");
        assert_eq!(addr.to_string(), "Alice <alice@example.com>");
    }
}
