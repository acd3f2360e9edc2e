//! UUID utilities
//!
//! Ids are stored as TEXT; a row that fails to parse is reported as invalid
//! input rather than panicking.

use crate::{Error, Result};
use uuid::Uuid;

/// Parse a stored UUID
pub fn parse(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::InvalidInput(format!("Invalid UUID '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let id = Uuid::new_v4();
        assert_eq!(parse(&id.to_string()).unwrap(), id);
        assert!(matches!(parse("not-a-uuid"), Err(Error::InvalidInput(_))));
    }
}
