//! Metadata tokens identifying types and methods of a module.
//!
//! A token packs a table identifier into the high byte and a 1-based row into the low
//! 24 bits, as in ECMA-335 II.22. The rewriter only allocates `TypeDef` and `MethodDef`
//! tokens; they identify definitions in events and log output.

use std::fmt;

/// Table identifier of the `TypeDef` table.
pub const TYPE_DEF_TABLE: u8 = 0x02;
/// Table identifier of the `MethodDef` table.
pub const METHOD_DEF_TABLE: u8 = 0x06;

/// A metadata token (table byte + row).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Creates a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table identifier and a row.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Creates a `TypeDef` token for the given row.
    #[must_use]
    pub fn type_def(row: u32) -> Self {
        Self::from_parts(TYPE_DEF_TABLE, row)
    }

    /// Creates a `MethodDef` token for the given row.
    #[must_use]
    pub fn method_def(row: u32) -> Self {
        Self::from_parts(METHOD_DEF_TABLE, row)
    }

    /// Returns the raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table identifier.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the row within the table.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token::method_def(5);
        assert_eq!(token.value(), 0x0600_0005);
        assert_eq!(token.table(), METHOD_DEF_TABLE);
        assert_eq!(token.row(), 5);

        let token = Token::type_def(0x0100_0002);
        assert_eq!(token.table(), TYPE_DEF_TABLE);
        assert_eq!(token.row(), 2);
    }

    #[test]
    fn test_token_null_and_display() {
        assert!(Token::default().is_null());
        assert!(!Token::type_def(1).is_null());
        assert_eq!(Token::type_def(1).to_string(), "0x02000001");
    }
}
