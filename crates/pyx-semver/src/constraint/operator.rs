//! Operator types for version constraints

use std::fmt;
use std::str::FromStr;

use crate::VersionError;

/// Comparison operators accepted in version constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal (==)
    Equal,
    /// Arbitrary equality (===)
    ArbitraryEqual,
    /// Not equal (!=)
    NotEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal (<=)
    LessThanOrEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal (>=)
    GreaterThanOrEqual,
    /// Compatible release (~=)
    Compatible,
    /// Caret requirement (^)
    Caret,
    /// Tilde requirement (~)
    Tilde,
}

impl Operator {
    /// Get the string representation of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::ArbitraryEqual => "===",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::Compatible => "~=",
            Operator::Caret => "^",
            Operator::Tilde => "~",
        }
    }

    /// Get all supported operators
    pub fn supported_operators() -> &'static [&'static str] {
        &["=", "==", "===", "!=", "<", "<=", ">", ">=", "~=", "^", "~"]
    }
}

impl FromStr for Operator {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(Operator::Equal),
            "===" => Ok(Operator::ArbitraryEqual),
            "!=" => Ok(Operator::NotEqual),
            "<" => Ok(Operator::LessThan),
            "<=" => Ok(Operator::LessThanOrEqual),
            ">" => Ok(Operator::GreaterThan),
            ">=" => Ok(Operator::GreaterThanOrEqual),
            "~=" => Ok(Operator::Compatible),
            "^" => Ok(Operator::Caret),
            "~" => Ok(Operator::Tilde),
            _ => Err(VersionError::InvalidOperator(s.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::Equal);
        assert_eq!("~=".parse::<Operator>().unwrap(), Operator::Compatible);
        assert_eq!("^".parse::<Operator>().unwrap(), Operator::Caret);
        assert!("<>".parse::<Operator>().is_err());
    }

    #[test]
    fn test_supported_operators_parse() {
        for op in Operator::supported_operators() {
            assert!(op.parse::<Operator>().is_ok(), "{} should parse", op);
        }
    }
}
